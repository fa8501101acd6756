//! Core library for symbol-level change-impact analysis of Rush-style
//! TypeScript monorepos.
//!
//! Given a git baseline and HEAD, the orchestrator computes which declared
//! e2e targets must re-run: it diffs changed source files per symbol,
//! propagates taint through intra-package import graphs and the
//! cross-package workspace dependency graph, and evaluates target rules
//! against the accumulated taint.

pub mod analyzer;
pub mod css;
pub mod diff;
pub mod entrypoints;
pub mod error;
pub mod git;
pub mod lockfile;
pub mod orchestrator;
pub mod path_utils;
pub mod project_config;
pub mod selector;
pub mod targets;
pub mod workspace;

pub use analyzer::{
    analyze_library_package, AffectedExport, AnalyzerInput, BaselineSource, GitBaseline, TaintMap,
};
pub use entrypoints::{find_entrypoints, Entrypoint};
pub use error::{Error, Result};
pub use orchestrator::{run, RunOptions};
pub use project_config::{ProjectConfig, TargetDef};
pub use targets::TargetHit;
pub use workspace::{PackageManifest, Project, ProjectInfo, Workspace};
