//! Per-project configuration: ignore globs and e2e target declarations.

use std::fs;
use std::path::Path;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::workspace::Workspace;

/// The config file name. The file itself never triggers anything.
pub const CONFIG_FILE_NAME: &str = ".goodchangesrc.json";

/// One watched directory of a virtual target.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeDir {
    pub glob: String,
    /// `None` means coarse change detection; `"fine-grained"` switches to
    /// affected-file tracing.
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    /// Output filter glob, fine-grained mode only.
    #[serde(default)]
    pub filter: Option<String>,
}

impl ChangeDir {
    pub fn is_fine_grained(&self) -> bool {
        self.kind.as_deref() == Some("fine-grained")
    }
}

/// A target declaration from `.goodchangesrc.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum TargetDef {
    /// A regular e2e target named after the declaring project, optionally
    /// tied to a corresponding app project.
    #[serde(rename = "target")]
    Target {
        #[serde(default)]
        app: Option<String>,
        #[serde(default)]
        ignores: Vec<String>,
    },
    /// An aggregated target identified by name rather than by project.
    #[serde(rename = "virtual-target")]
    VirtualTarget {
        #[serde(rename = "targetName")]
        target_name: String,
        #[serde(default, rename = "changeDirs")]
        change_dirs: Vec<ChangeDir>,
        #[serde(default)]
        ignores: Vec<String>,
    },
}

impl TargetDef {
    pub fn ignores(&self) -> &[String] {
        match self {
            TargetDef::Target { ignores, .. } => ignores,
            TargetDef::VirtualTarget { ignores, .. } => ignores,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub targets: Vec<TargetDef>,
    #[serde(default)]
    pub ignores: Vec<String>,
}

impl ProjectConfig {
    /// Reads the config from a project folder; `None` when absent or
    /// malformed (a broken config must not fail the run).
    pub fn load(root: &Path, project_folder: &str) -> Option<Self> {
        let path = root.join(project_folder).join(CONFIG_FILE_NAME);
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// Loads configs for every workspace project, keyed by project folder.
    pub fn load_all(root: &Path, workspace: &Workspace) -> FxHashMap<String, ProjectConfig> {
        let mut result = FxHashMap::default();
        for info in workspace.projects() {
            if let Some(cfg) = Self::load(root, info.folder()) {
                result.insert(info.folder().to_string(), cfg);
            }
        }
        result
    }

    /// Compiles the project-level ignore globs.
    pub fn ignore_set(&self) -> IgnoreSet {
        IgnoreSet::new(&self.ignores)
    }

    /// Compiles project-level plus per-target ignore globs; target ignores
    /// are additive, never a replacement.
    pub fn ignore_set_for(&self, target: &TargetDef) -> IgnoreSet {
        let mut patterns = self.ignores.clone();
        patterns.extend(target.ignores().iter().cloned());
        IgnoreSet::new(&patterns)
    }
}

/// Compiled doublestar ignore patterns. `*` does not cross `/`; `**` does.
/// The config file itself is always ignored.
#[derive(Debug, Clone, Default)]
pub struct IgnoreSet {
    set: Option<GlobSet>,
}

impl IgnoreSet {
    pub fn new(patterns: &[String]) -> Self {
        if patterns.is_empty() {
            return Self::default();
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            if let Ok(glob) = GlobBuilder::new(pattern).literal_separator(true).build() {
                builder.add(glob);
            }
        }
        Self {
            set: builder.build().ok(),
        }
    }

    /// Checks a path relative to the project root.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if rel_path == CONFIG_FILE_NAME {
            return true;
        }
        self.set
            .as_ref()
            .is_some_and(|set| set.is_match(rel_path))
    }
}

/// Compiles the comma-separated `TARGETS` filter into a matcher over target
/// names, where `*` matches any run of characters.
pub struct TargetFilter {
    set: GlobSet,
}

impl TargetFilter {
    pub fn parse(filter: &str) -> Option<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut any = false;
        for part in filter.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Ok(glob) = Glob::new(part) {
                builder.add(glob);
                any = true;
            }
        }
        if !any {
            return None;
        }
        builder.build().ok().map(|set| Self { set })
    }

    pub fn matches(&self, target_name: &str) -> bool {
        self.set.is_match(target_name)
    }
}
