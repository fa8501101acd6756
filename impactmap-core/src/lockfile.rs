//! pnpm lockfile differencing.
//!
//! The importers table of `pnpm-lock.yaml` is walked with an indent state
//! machine that maps every line to the importer and dependency it belongs
//! to. Intersecting that map with the changed-line set of the lockfile diff
//! yields, per project, the set of external dependencies whose resolution
//! changed. Workspace-linked deps (`version: link:...`) are excluded; those
//! flow through the workspace dependency graph instead.

use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;

use crate::diff::parse_changed_lines;
use crate::path_utils::normalize;

#[derive(Debug, Clone)]
struct DepLine {
    importer: String,
    dep_name: String,
}

/// Per-importer external dependency changes, keyed by repo-relative project
/// folder.
pub type DepChanges = FxHashMap<String, FxHashSet<String>>;

/// Finds projects whose direct external dependencies changed, given the
/// current lockfile content and its diff against the baseline. Importer
/// paths inside the lockfile are relative to `common/temp/<subspace>/`.
pub fn find_dep_affected_projects(content: &str, subspace: &str, diff_text: &str) -> DepChanges {
    let mut result = DepChanges::default();
    if diff_text.is_empty() {
        return result;
    }

    let importer_base = PathBuf::from("common").join("temp").join(subspace);
    let (line_map, workspace_deps) = build_importer_dep_line_map(content, &importer_base);
    let changed_lines = parse_changed_lines(diff_text);

    for line in changed_lines {
        let Some(info) = line_map.get(&line) else {
            continue;
        };
        if info.importer.is_empty() || info.dep_name.is_empty() {
            continue;
        }
        if workspace_deps
            .get(&info.importer)
            .is_some_and(|deps| deps.contains(&info.dep_name))
        {
            continue;
        }
        result
            .entry(info.importer.clone())
            .or_default()
            .insert(info.dep_name.clone());
    }
    result
}

/// Builds the line-number → (importer, dep) map for the importers section,
/// plus the set of workspace-linked deps per importer.
fn build_importer_dep_line_map(
    content: &str,
    importer_base: &Path,
) -> (FxHashMap<usize, DepLine>, FxHashMap<String, FxHashSet<String>>) {
    let mut line_map: FxHashMap<usize, DepLine> = FxHashMap::default();
    let mut workspace_deps: FxHashMap<String, FxHashSet<String>> = FxHashMap::default();

    let mut in_importers = false;
    let mut current_importer = String::new();
    let mut in_dep_section = false;
    let mut current_dep = String::new();

    for (idx, line) in content.lines().enumerate() {
        let line_num = idx + 1;
        let indent = line.len() - line.trim_start_matches(' ').len();
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if indent == 0 {
            if line.starts_with("importers:") {
                in_importers = true;
                current_importer.clear();
                in_dep_section = false;
                current_dep.clear();
            } else if in_importers {
                break;
            }
            continue;
        }

        if !in_importers {
            continue;
        }

        match indent {
            2 => {
                // Importer path, e.g. `  ../../../apps/dash:`
                let Some(raw) = trimmed.strip_suffix(':') else {
                    continue;
                };
                let raw = raw.trim_matches(|c| c == '\'' || c == '"');
                if raw == "." {
                    current_importer.clear();
                } else {
                    let resolved = normalize(&importer_base.join(raw));
                    current_importer = resolved.to_string_lossy().replace('\\', "/");
                }
                in_dep_section = false;
                current_dep.clear();
            }
            4 => {
                if current_importer.is_empty() {
                    continue;
                }
                in_dep_section = matches!(
                    trimmed,
                    "dependencies:" | "devDependencies:" | "optionalDependencies:"
                );
                current_dep.clear();
            }
            6 => {
                if !in_dep_section || current_importer.is_empty() {
                    continue;
                }
                let Some(name) = trimmed.strip_suffix(':') else {
                    continue;
                };
                current_dep = name.trim_matches(|c| c == '\'' || c == '"').to_string();
                // Map the name line too, for deps added or removed outright.
                line_map.insert(
                    line_num,
                    DepLine {
                        importer: current_importer.clone(),
                        dep_name: current_dep.clone(),
                    },
                );
            }
            _ if indent >= 8 => {
                if !in_dep_section || current_importer.is_empty() || current_dep.is_empty() {
                    continue;
                }
                line_map.insert(
                    line_num,
                    DepLine {
                        importer: current_importer.clone(),
                        dep_name: current_dep.clone(),
                    },
                );
                if let Some(version) = trimmed.strip_prefix("version:") {
                    let version = version.trim().trim_matches(|c| c == '\'' || c == '"');
                    if version.starts_with("link:") {
                        workspace_deps
                            .entry(current_importer.clone())
                            .or_default()
                            .insert(current_dep.clone());
                    }
                }
            }
            _ => {}
        }
    }

    (line_map, workspace_deps)
}

#[derive(Deserialize)]
struct LockfileHeader {
    #[serde(rename = "lockfileVersion")]
    lockfile_version: Option<serde_yaml::Value>,
}

/// Extracts the `lockfileVersion` scalar, or an empty string when absent or
/// unparseable.
pub fn parse_lockfile_version(content: &str) -> String {
    let Ok(header) = serde_yaml::from_str::<LockfileHeader>(content) else {
        return String::new();
    };
    match header.lockfile_version {
        Some(serde_yaml::Value::String(s)) => s,
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
