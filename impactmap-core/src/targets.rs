//! Terminal target evaluation.
//!
//! After all levels are analyzed, every declared target is checked against
//! the changed-file set, the lockfile dep changes, and the accumulated
//! upstream-taint map. Regular targets trigger as a whole; virtual targets
//! evaluate their changeDir entries and may emit a fine-grained file list.

use std::collections::BTreeMap;
use std::path::Path;

use globset::GlobBuilder;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::debug;

use crate::analyzer::{has_tainted_imports, has_tainted_imports_for_glob, BaselineSource, TaintMap};
use crate::lockfile::DepChanges;
use crate::project_config::{ChangeDir, IgnoreSet, ProjectConfig, TargetDef, TargetFilter};
use crate::selector::{find_affected_files, SelectorInput};
use crate::workspace::Workspace;

/// One triggered target. `detections` is present only for virtual targets
/// with fine-grained hits.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TargetHit {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detections: Option<Vec<String>>,
}

pub struct TargetContext<'a> {
    pub root: &'a Path,
    pub workspace: &'a Workspace,
    pub configs: &'a FxHashMap<String, ProjectConfig>,
    pub changed_files: &'a [String],
    /// Projects with directly changed, non-ignored files.
    pub changed_projects: &'a FxHashSet<String>,
    pub dep_changes: &'a DepChanges,
    pub upstream_taint: &'a TaintMap,
    pub include_types: bool,
    pub include_css: bool,
    pub filter: Option<&'a TargetFilter>,
    pub baseline: &'a dyn BaselineSource,
}

/// Evaluates every declared target and returns the triggered ones, sorted
/// by name.
pub fn evaluate_targets(ctx: &TargetContext) -> Vec<TargetHit> {
    let mut hits: BTreeMap<String, Option<Vec<String>>> = BTreeMap::new();

    for info in ctx.workspace.projects() {
        let Some(config) = ctx.configs.get(info.folder()) else {
            continue;
        };
        for target in &config.targets {
            match target {
                TargetDef::Target { app, .. } => {
                    let name = info.name();
                    if ctx.filter.is_some_and(|f| !f.matches(name)) {
                        continue;
                    }
                    let ignore = config.ignore_set_for(target);
                    if regular_target_triggered(ctx, info.folder(), &ignore, app.as_deref()) {
                        hits.entry(name.to_string()).or_insert(None);
                    }
                }
                TargetDef::VirtualTarget {
                    target_name,
                    change_dirs,
                    ..
                } => {
                    if ctx.filter.is_some_and(|f| !f.matches(target_name)) {
                        continue;
                    }
                    let ignore = config.ignore_set_for(target);
                    let (triggered, detections) =
                        virtual_target_triggered(ctx, info.folder(), change_dirs, &ignore);
                    if triggered {
                        let entry = hits.entry(target_name.clone()).or_insert(None);
                        if let Some(new_files) = detections {
                            match entry {
                                Some(existing) => {
                                    for file in new_files {
                                        if !existing.contains(&file) {
                                            existing.push(file);
                                        }
                                    }
                                    existing.sort();
                                }
                                None => *entry = Some(new_files),
                            }
                        }
                    }
                }
            }
        }
    }

    hits.into_iter()
        .map(|(name, detections)| TargetHit { name, detections })
        .collect()
}

/// A regular target fires when its own project changed, its lockfile deps
/// changed, its sources import tainted upstream specifiers, or its
/// corresponding app has any of those conditions.
fn regular_target_triggered(
    ctx: &TargetContext,
    folder: &str,
    ignore: &IgnoreSet,
    app: Option<&str>,
) -> bool {
    if has_direct_changes(ctx, folder, ignore) {
        debug!(folder, "target triggered by direct file changes");
        return true;
    }
    if ctx.dep_changes.get(folder).is_some_and(|d| !d.is_empty()) {
        debug!(folder, "target triggered by lockfile dep changes");
        return true;
    }
    if has_tainted_imports(ctx.root, folder, ctx.upstream_taint, ignore, ctx.include_css) {
        debug!(folder, "target triggered by tainted imports");
        return true;
    }

    if let Some(app_name) = app {
        if let Some(app_info) = ctx.workspace.project(app_name) {
            if ctx.changed_projects.contains(app_name) {
                debug!(folder, app = app_name, "target triggered by changed app");
                return true;
            }
            if ctx
                .dep_changes
                .get(app_info.folder())
                .is_some_and(|d| !d.is_empty())
            {
                debug!(folder, app = app_name, "target triggered by app lockfile deps");
                return true;
            }
            let app_ignore = IgnoreSet::default();
            if has_tainted_imports(
                ctx.root,
                app_info.folder(),
                ctx.upstream_taint,
                &app_ignore,
                ctx.include_css,
            ) {
                debug!(folder, app = app_name, "target triggered by app tainted imports");
                return true;
            }
        }
    }

    false
}

fn has_direct_changes(ctx: &TargetContext, folder: &str, ignore: &IgnoreSet) -> bool {
    let prefix = format!("{folder}/");
    ctx.changed_files.iter().any(|file| {
        file.strip_prefix(&prefix)
            .is_some_and(|rel| !ignore.is_ignored(rel))
    })
}

fn virtual_target_triggered(
    ctx: &TargetContext,
    folder: &str,
    change_dirs: &[ChangeDir],
    ignore: &IgnoreSet,
) -> (bool, Option<Vec<String>>) {
    let mut triggered = false;
    let mut detections: Vec<String> = Vec::new();

    for change_dir in change_dirs {
        let Ok(glob) = GlobBuilder::new(&change_dir.glob).literal_separator(true).build() else {
            continue;
        };
        let matcher = glob.compile_matcher();

        if change_dir.is_fine_grained() {
            let tainted_deps = ctx.dep_changes.get(folder).cloned().unwrap_or_default();
            let input = SelectorInput {
                root: ctx.root,
                project_folder: folder,
                glob: &matcher,
                changed_files: ctx.changed_files,
                upstream_taint: ctx.upstream_taint,
                tainted_deps: &tainted_deps,
                ignore,
                include_types: ctx.include_types,
                include_css: ctx.include_css,
            };
            let mut files = find_affected_files(&input, ctx.baseline);
            if let Some(filter) = &change_dir.filter {
                if let Ok(filter_glob) =
                    GlobBuilder::new(filter).literal_separator(true).build()
                {
                    let filter_matcher = filter_glob.compile_matcher();
                    files.retain(|f| filter_matcher.is_match(f));
                }
            }
            if !files.is_empty() {
                debug!(folder, glob = %change_dir.glob, count = files.len(), "fine-grained hit");
                triggered = true;
                for file in files {
                    if !detections.contains(&file) {
                        detections.push(file);
                    }
                }
            }
            continue;
        }

        // Coarse: a changed file matches the glob, or a matching source file
        // imports a tainted specifier.
        let prefix = format!("{folder}/");
        let file_hit = ctx.changed_files.iter().any(|file| {
            file.strip_prefix(&prefix)
                .is_some_and(|rel| matcher.is_match(rel) && !ignore.is_ignored(rel))
        });
        if file_hit {
            debug!(folder, glob = %change_dir.glob, "coarse hit via changed file");
            triggered = true;
            continue;
        }
        if has_tainted_imports_for_glob(
            ctx.root,
            folder,
            &matcher,
            ctx.upstream_taint,
            ignore,
            ctx.include_css,
        ) {
            debug!(folder, glob = %change_dir.glob, "coarse hit via tainted imports");
            triggered = true;
        }
    }

    if detections.is_empty() {
        (triggered, None)
    } else {
        detections.sort();
        (triggered, Some(detections))
    }
}
