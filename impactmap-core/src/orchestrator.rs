//! The run driver: merge base → changed files → affected projects →
//! topological levels → per-level parallel analysis → CSS propagation →
//! target evaluation.
//!
//! The upstream-taint map is read-only while a level's workers run and is
//! extended only after the level's join point, so the taint closure is
//! deterministic regardless of worker interleaving.

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::analyzer::{
    analyze_library_package, AffectedExport, AnalyzerInput, GitBaseline, TaintMap,
};
use crate::css::{find_css_tainted_packages, propagate_css_taint, CSS_TAINT_PREFIX};
use crate::entrypoints::{collect_entrypoint_exports, find_entrypoints};
use crate::error::Result;
use crate::git;
use crate::lockfile::{find_dep_affected_projects, parse_lockfile_version, DepChanges};
use crate::project_config::{IgnoreSet, ProjectConfig, TargetDef, TargetFilter};
use crate::targets::{evaluate_targets, TargetContext, TargetHit};
use crate::workspace::Workspace;

pub struct RunOptions {
    pub repo_root: PathBuf,
    /// Explicit baseline commit; overrides branch comparison.
    pub compare_commit: Option<String>,
    /// Branch to compare against when no explicit commit is given.
    pub compare_branch: String,
    pub include_types: bool,
    pub include_css: bool,
    /// Comma-separated glob filter over target names.
    pub targets_filter: Option<String>,
}

impl RunOptions {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            compare_commit: None,
            compare_branch: "origin/master".to_string(),
            include_types: false,
            include_css: false,
            targets_filter: None,
        }
    }
}

/// Runs the full analysis and returns the triggered targets, sorted by name.
///
/// # Errors
///
/// Fails when the workspace manifest cannot be loaded or the merge base
/// cannot be determined. Per-package analysis failures are logged and the
/// package contributes no taint.
pub fn run(opts: &RunOptions) -> Result<Vec<TargetHit>> {
    let root = opts.repo_root.as_path();

    let merge_base = match &opts.compare_commit {
        Some(commit) => commit.clone(),
        None => git::merge_base(root, &opts.compare_branch)?,
    };
    let changed_files = git::changed_files_since(root, &merge_base)?;

    let workspace = Workspace::load(root)?;
    let configs = ProjectConfig::load_all(root, &workspace);
    let ignore_sets: FxHashMap<String, IgnoreSet> = configs
        .iter()
        .map(|(folder, cfg)| (folder.clone(), cfg.ignore_set()))
        .collect();

    let changed_projects = workspace.find_changed_projects(&changed_files, &ignore_sets);
    let (dep_changes, full_subspaces) = lockfile_changes(root, &workspace, &merge_base)?;

    let folder_to_pkg: FxHashMap<&str, &str> = workspace
        .projects()
        .iter()
        .map(|info| (info.folder(), info.name()))
        .collect();

    let mut seeds: FxHashSet<String> = changed_projects.clone();
    for folder in dep_changes.keys() {
        if let Some(pkg) = folder_to_pkg.get(folder.as_str()) {
            seeds.insert((*pkg).to_string());
        }
    }

    let affected = workspace.transitive_dependents(&seeds.iter().cloned().collect::<Vec<_>>());
    let mut levels = workspace.topological_levels(&affected);

    let filter = opts
        .targets_filter
        .as_deref()
        .and_then(TargetFilter::parse);
    if let Some(filter) = &filter {
        let relevant = relevant_packages(&workspace, &configs, filter);
        for level in &mut levels {
            level.retain(|pkg| relevant.contains(pkg));
        }
        levels.retain(|level| !level.is_empty());
    }

    info!(merge_base = %merge_base, "comparison baseline");
    info!(
        directly_changed = changed_projects.len(),
        dep_affected = dep_changes.len(),
        total_affected = affected.len(),
        levels = levels.len(),
        "processing bottom-up"
    );

    let baseline = GitBaseline {
        root: root.to_path_buf(),
        merge_base: merge_base.clone(),
    };

    let mut upstream_taint = TaintMap::default();
    seed_wildcard_subspaces(root, &workspace, &full_subspaces, &mut upstream_taint);

    for (level_idx, level) in levels.iter().enumerate() {
        info!(level = level_idx, packages = level.len(), "analyzing level");

        let results: Vec<(String, Vec<AffectedExport>)> = level
            .par_iter()
            .filter_map(|pkg| {
                let info = workspace.project(pkg)?;
                let folder = info.folder();
                let directly_changed = changed_projects.contains(pkg);
                let dep_affected = dep_changes.get(folder).is_some_and(|d| !d.is_empty());
                info!(
                    package = pkg.as_str(),
                    directly_changed,
                    dep_affected,
                    library = info.manifest.is_library(),
                    "analyzing package"
                );

                if !info.manifest.is_library() {
                    return None;
                }
                let entrypoints = find_entrypoints(root, folder, &info.manifest);
                if entrypoints.is_empty() {
                    debug!(package = pkg.as_str(), "no entrypoints found");
                    return None;
                }
                debug!(package = pkg.as_str(), ?entrypoints, "resolved entrypoints");

                let slice = upstream_slice(&upstream_taint, &info.depends_on);
                let tainted_deps = dep_changes.get(folder).cloned().unwrap_or_default();

                let input = AnalyzerInput {
                    root,
                    project_folder: folder,
                    entrypoints: &entrypoints,
                    changed_files: &changed_files,
                    include_types: opts.include_types,
                    include_css: opts.include_css,
                    upstream_taint: &slice,
                    tainted_deps: &tainted_deps,
                };
                match analyze_library_package(&input, &baseline) {
                    Ok(affected_exports) => Some((pkg.clone(), affected_exports)),
                    Err(err) => {
                        warn!(package = pkg.as_str(), %err, "package analysis failed");
                        None
                    }
                }
            })
            .collect();

        // Join point: only now does the level's output become visible.
        for (pkg, affected_exports) in results {
            for ae in affected_exports {
                let specifier = export_specifier(&pkg, &ae.entrypoint_path);
                info!(
                    package = pkg.as_str(),
                    entrypoint = ae.entrypoint_path.as_str(),
                    exports = ?ae.export_names,
                    "affected exports"
                );
                upstream_taint
                    .entry(specifier)
                    .or_default()
                    .extend(ae.export_names);
            }
        }
    }

    if opts.include_css {
        for pkg in find_css_tainted_packages(&changed_files, &workspace) {
            debug!(package = pkg.as_str(), "CSS taint");
            upstream_taint
                .entry(format!("{CSS_TAINT_PREFIX}{pkg}"))
                .or_default()
                .insert(crate::analyzer::STAR.to_string());
        }
        propagate_css_taint(root, &workspace, &mut upstream_taint);
    }

    let ctx = TargetContext {
        root,
        workspace: &workspace,
        configs: &configs,
        changed_files: &changed_files,
        changed_projects: &changed_projects,
        dep_changes: &dep_changes,
        upstream_taint: &upstream_taint,
        include_types: opts.include_types,
        include_css: opts.include_css,
        filter: filter.as_ref(),
        baseline: &baseline,
    };
    let hits = evaluate_targets(&ctx);
    info!(targets = hits.len(), "affected targets");
    Ok(hits)
}

/// The upstream-taint specifier for an entrypoint: the bare package name for
/// the root entrypoint, `pkg/subpath` otherwise.
fn export_specifier(package_name: &str, entrypoint_path: &str) -> String {
    if entrypoint_path == "." {
        package_name.to_string()
    } else {
        format!(
            "{package_name}{}",
            entrypoint_path.trim_start_matches('.')
        )
    }
}

/// Per-subspace lockfile diffing. Returns per-folder external dep changes
/// plus the subspaces whose `lockfileVersion` changed outright.
fn lockfile_changes(
    root: &Path,
    workspace: &Workspace,
    merge_base: &str,
) -> Result<(DepChanges, FxHashSet<String>)> {
    let mut dep_changes = DepChanges::default();
    let mut full_subspaces = FxHashSet::default();

    for subspace in workspace.subspaces() {
        let lockfile_rel = Workspace::lockfile_path(&subspace);
        let lockfile_path = root.join(&lockfile_rel);
        if !lockfile_path.is_file() {
            continue;
        }
        let rel_str = lockfile_rel.to_string_lossy().replace('\\', "/");
        let Ok(diff_text) = git::diff_since_path(root, merge_base, &rel_str) else {
            continue;
        };
        if diff_text.is_empty() {
            continue;
        }
        let content = fs::read_to_string(&lockfile_path)?;

        let old_version = parse_lockfile_version(&git::show_file(root, merge_base, &rel_str));
        let new_version = parse_lockfile_version(&content);
        if !old_version.is_empty() && !new_version.is_empty() && old_version != new_version {
            info!(subspace = subspace.as_str(), old = %old_version, new = %new_version,
                  "lockfile version changed, treating all external deps as changed");
            full_subspaces.insert(subspace.clone());
            for info in workspace.projects() {
                if info.subspace() != subspace {
                    continue;
                }
                let externals = info.manifest.external_deps();
                if !externals.is_empty() {
                    dep_changes
                        .entry(info.folder().to_string())
                        .or_default()
                        .extend(externals);
                }
            }
        }

        for (folder, deps) in find_dep_affected_projects(&content, &subspace, &diff_text) {
            dep_changes.entry(folder).or_default().extend(deps);
        }
    }

    Ok((dep_changes, full_subspaces))
}

/// A lockfile-version bump wildcard-taints every library in the subspace:
/// each entrypoint contributes its full export list to the upstream map.
fn seed_wildcard_subspaces(
    root: &Path,
    workspace: &Workspace,
    full_subspaces: &FxHashSet<String>,
    upstream_taint: &mut TaintMap,
) {
    if full_subspaces.is_empty() {
        return;
    }
    for info in workspace.projects() {
        if !full_subspaces.contains(info.subspace()) || !info.manifest.is_library() {
            continue;
        }
        for ep in find_entrypoints(root, info.folder(), &info.manifest) {
            let names = collect_entrypoint_exports(root, info.folder(), &ep);
            if names.is_empty() {
                continue;
            }
            let specifier = export_specifier(info.name(), &ep.export_path);
            debug!(package = info.name(), specifier = %specifier, "wildcard-tainted exports");
            upstream_taint.entry(specifier).or_default().extend(names);
        }
    }
}

/// The package's read-only view of the upstream taint: entries whose
/// specifier belongs to one of its declared workspace dependencies,
/// including their CSS keys.
fn upstream_slice(upstream_taint: &TaintMap, depends_on: &[String]) -> TaintMap {
    let mut slice = TaintMap::default();
    for dep in depends_on {
        for (specifier, names) in upstream_taint {
            let matches = specifier.starts_with(dep.as_str())
                || specifier
                    .strip_prefix(CSS_TAINT_PREFIX)
                    .is_some_and(|pkg| pkg == dep);
            if matches {
                slice
                    .entry(specifier.clone())
                    .or_default()
                    .extend(names.iter().cloned());
            }
        }
    }
    slice
}

/// Resolves the `TARGETS` filter to the package set worth analyzing: the
/// projects declaring matching targets, their named apps, and everything
/// those transitively depend on.
fn relevant_packages(
    workspace: &Workspace,
    configs: &FxHashMap<String, ProjectConfig>,
    filter: &TargetFilter,
) -> FxHashSet<String> {
    let mut seeds: Vec<String> = Vec::new();
    for info in workspace.projects() {
        let Some(config) = configs.get(info.folder()) else {
            continue;
        };
        for target in &config.targets {
            match target {
                TargetDef::Target { app, .. } => {
                    if filter.matches(info.name()) {
                        seeds.push(info.name().to_string());
                        if let Some(app) = app {
                            seeds.push(app.clone());
                        }
                    }
                }
                TargetDef::VirtualTarget { target_name, .. } => {
                    if filter.matches(target_name) {
                        seeds.push(info.name().to_string());
                    }
                }
            }
        }
    }
    workspace.transitive_dependencies(&seeds)
}
