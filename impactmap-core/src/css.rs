//! CSS/SCSS taint tracking.
//!
//! Packages with changed style files are marked CSS-tainted under a
//! `CSS:<package>` key in the upstream-taint map, then taint spreads across
//! SCSS `@use`/`@import` chains until no new package is reached.

use std::fs;
use std::path::Path;

use rustc_hash::FxHashSet;
use tracing::debug;
use walkdir::WalkDir;

use crate::analyzer::{TaintMap, STAR};
use crate::workspace::Workspace;

/// Key prefix for CSS-level taint entries in the upstream-taint map.
pub const CSS_TAINT_PREFIX: &str = "CSS:";

/// True when the import source looks like a stylesheet reference.
pub fn is_style_import(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.ends_with(".css")
        || lower.ends_with(".scss")
        || lower.contains("/styles/")
        || lower.ends_with("/styles")
}

/// True for CSS-module files (`*.module.css` / `*.module.scss`).
pub fn is_css_module(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.ends_with(".module.css") || lower.ends_with(".module.scss")
}

/// Checks whether a style-looking import source falls under any CSS-tainted
/// package (`CSS:<pkg>` key, matched by exact name or subpath prefix).
pub fn matches_css_taint(import_source: &str, upstream_taint: &TaintMap) -> bool {
    if !is_style_import(import_source) {
        return false;
    }
    upstream_taint.keys().any(|key| {
        key.strip_prefix(CSS_TAINT_PREFIX).is_some_and(|pkg| {
            import_source == pkg
                || import_source
                    .strip_prefix(pkg)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    })
}

/// Package names with at least one changed `.css`/`.scss` file.
pub fn find_css_tainted_packages(
    changed_files: &[String],
    workspace: &Workspace,
) -> FxHashSet<String> {
    let mut result = FxHashSet::default();
    for file in changed_files {
        let lower = file.to_ascii_lowercase();
        if !(lower.ends_with(".scss") || lower.ends_with(".css")) {
            continue;
        }
        for info in workspace.projects() {
            if file.starts_with(&format!("{}/", info.folder())) {
                result.insert(info.name().to_string());
                break;
            }
        }
    }
    result
}

/// Propagates CSS taint across SCSS `@use`/`@import` chains: when a
/// library's stylesheet pulls from a CSS-tainted package, that library
/// becomes CSS-tainted too. Iterates to a fixpoint.
pub fn propagate_css_taint(root: &Path, workspace: &Workspace, upstream_taint: &mut TaintMap) {
    let mut css_tainted: FxHashSet<String> = upstream_taint
        .keys()
        .filter_map(|key| key.strip_prefix(CSS_TAINT_PREFIX))
        .map(|pkg| pkg.to_string())
        .collect();
    if css_tainted.is_empty() {
        return;
    }

    let mut changed = true;
    while changed {
        changed = false;
        'projects: for info in workspace.projects() {
            if css_tainted.contains(info.name()) {
                continue;
            }
            for scss_file in glob_style_files(root, info.folder()) {
                for spec in parse_scss_uses(&root.join(info.folder()).join(&scss_file)) {
                    let hit = css_tainted.iter().any(|pkg| {
                        spec == *pkg
                            || spec
                                .strip_prefix(pkg.as_str())
                                .is_some_and(|rest| rest.starts_with('/'))
                    });
                    if hit {
                        upstream_taint
                            .entry(format!("{CSS_TAINT_PREFIX}{}", info.name()))
                            .or_default()
                            .insert(STAR.to_string());
                        css_tainted.insert(info.name().to_string());
                        changed = true;
                        debug!(package = info.name(), via = %spec, file = %scss_file, "CSS taint propagated");
                        continue 'projects;
                    }
                }
            }
        }
    }
}

const SKIPPED_DIRS: [&str; 4] = ["node_modules", ".git", "dist", "esm"];

/// All `.scss`/`.css` files under the folder, project-relative, excluding
/// build output directories.
pub fn glob_style_files(root: &Path, project_folder: &str) -> Vec<String> {
    let base = root.join(project_folder);
    let mut files = Vec::new();
    let walker = WalkDir::new(&base).into_iter().filter_entry(|e| {
        !(e.file_type().is_dir()
            && e.file_name()
                .to_str()
                .is_some_and(|name| SKIPPED_DIRS.contains(&name)))
    });
    for entry in walker.filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".scss") || lower.ends_with(".css")) {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(&base) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    files
}

/// Extracts external package specifiers from `@use` and `@import` lines.
/// Takes the first quoted string on each line; local (`.`) and builtin
/// (`sass:`) specifiers are skipped.
pub fn parse_scss_uses(path: &Path) -> Vec<String> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut uses = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if !line.starts_with("@use ") && !line.starts_with("@import ") {
            continue;
        }
        let Some(start) = line.find(|c| c == '"' || c == '\'') else {
            continue;
        };
        let rest = &line[start + 1..];
        let Some(end) = rest.find(|c| c == '"' || c == '\'') else {
            continue;
        };
        let spec = &rest[..end];
        if spec.starts_with('.') || spec.starts_with("sass:") {
            continue;
        }
        uses.push(spec.to_string());
    }
    uses
}
