//! The per-package library analyzer.
//!
//! Builds the intra-package file graph (imports and re-exports), seeds taint
//! from four sources (the AST diff of changed files, changed local style
//! files, upstream package taint, and tainted external dependencies), then
//! propagates through unlimited-hop BFS with intra-file closure and projects
//! the result onto the package's entrypoint exports.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use walkdir::WalkDir;

use impactmap_tsparse::{astdiff, find_affected_symbols, FileAnalysis};

use crate::css::{is_css_module, is_style_import, matches_css_taint};
use crate::entrypoints::{resolve_import_source, strip_ts_extension, Entrypoint};
use crate::error::Result;
use crate::git;
use crate::path_utils::join_relative;

/// Sentinel meaning "all re-exports from this file are tainted"; set when a
/// star re-export from a tainted external source loses name information.
pub const STAR: &str = "*";

/// Namespace placeholder local name for synthetic star re-export edges.
const REEXPORT_NS: &str = "*:__reexport__";

/// Taint per file stem (or per upstream specifier): a set of symbol names.
pub type TaintMap = FxHashMap<String, FxHashSet<String>>;

/// Affected exports of one entrypoint.
#[derive(Debug, Clone)]
pub struct AffectedExport {
    pub entrypoint_path: String,
    pub export_names: Vec<String>,
}

/// Source of baseline ("old") file contents for AST diffing.
///
/// The git implementation shells out per file; tests feed in-memory content.
pub trait BaselineSource: Sync {
    /// Content of the repo-relative `path` at the baseline, or `None` when
    /// the file did not exist there.
    fn file_at_base(&self, path: &str) -> Option<String>;
}

/// Baseline contents read from `git show <merge-base>:<path>`.
pub struct GitBaseline {
    pub root: PathBuf,
    pub merge_base: String,
}

impl BaselineSource for GitBaseline {
    fn file_at_base(&self, path: &str) -> Option<String> {
        let content = git::show_file(&self.root, &self.merge_base, path);
        (!content.is_empty()).then_some(content)
    }
}

/// Inputs for one package analysis. The upstream-taint map is the
/// orchestrator's slice for this package and is read-only here.
pub struct AnalyzerInput<'a> {
    pub root: &'a Path,
    pub project_folder: &'a str,
    pub entrypoints: &'a [Entrypoint],
    pub changed_files: &'a [String],
    pub include_types: bool,
    pub include_css: bool,
    pub upstream_taint: &'a TaintMap,
    pub tainted_deps: &'a FxHashSet<String>,
}

#[derive(Debug, Clone)]
struct ImportEdge {
    from_stem: String,
    /// `(orig, local)` name pairs; orig `"*"` for namespace bindings.
    names: Vec<(String, String)>,
    is_side_effect: bool,
}

/// Analyzes one library package and returns its affected exports per
/// entrypoint.
pub fn analyze_library_package(
    input: &AnalyzerInput,
    baseline: &dyn BaselineSource,
) -> Result<Vec<AffectedExport>> {
    let folder_prefix = format!("{}/", input.project_folder);
    let project_changed: Vec<&str> = input
        .changed_files
        .iter()
        .filter(|f| f.starts_with(&folder_prefix))
        .map(|f| f.as_str())
        .collect();

    let analyses = parse_package_sources(input.root, input.project_folder)?;

    let changed_styles: FxHashSet<String> = project_changed
        .iter()
        .filter_map(|f| f.strip_prefix(&folder_prefix))
        .filter(|rel| {
            let lower = rel.to_ascii_lowercase();
            lower.ends_with(".scss") || lower.ends_with(".css")
        })
        .map(|rel| rel.to_string())
        .collect();

    let graph = build_import_graph(input.root, input.project_folder, &analyses);

    let mut tainted: TaintMap = TaintMap::default();
    seed_from_ast_diff(input, baseline, &analyses, &project_changed, &mut tainted);
    seed_from_style_changes(&analyses, &changed_styles, &mut tainted);
    seed_from_upstream(input, &analyses, &mut tainted);
    seed_from_external_deps(input.tainted_deps, &analyses, &mut tainted);

    debug!(
        package = input.project_folder,
        seeds = ?tainted,
        "initial taint map"
    );

    if tainted.is_empty() {
        return Ok(Vec::new());
    }

    propagate(input, &analyses, &graph, &mut tainted);

    debug!(package = input.project_folder, taint = ?tainted, "final taint map");

    Ok(project_entrypoints(input, &analyses, &tainted))
}

/// Enumerates and parses every source file under the project folder. Files
/// that fail to parse are skipped; the rest of the package continues.
fn parse_package_sources(root: &Path, project_folder: &str) -> Result<FxHashMap<String, FileAnalysis>> {
    let mut analyses = FxHashMap::default();
    for rel in glob_source_files(root, project_folder)? {
        let full = root.join(project_folder).join(&rel);
        match impactmap_tsparse::parse_file(&full) {
            Ok(analysis) => {
                analyses.insert(strip_ts_extension(&rel), analysis);
            }
            Err(err) => debug!(file = %full.display(), %err, "skipping unparseable file"),
        }
    }
    Ok(analyses)
}

const SKIPPED_DIRS: [&str; 6] = ["node_modules", ".git", "dist", "esm", "lib", "build"];

/// All TypeScript-family source files under the folder, project-relative,
/// excluding build output directories.
pub fn glob_source_files(root: &Path, project_folder: &str) -> Result<Vec<String>> {
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
        if !(lower.ends_with(".ts")
            || lower.ends_with(".tsx")
            || lower.ends_with(".js")
            || lower.ends_with(".jsx"))
        {
            continue;
        }
        if let Ok(rel) = entry.path().strip_prefix(&base) {
            files.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    files.sort();
    Ok(files)
}

fn stem_dir(stem: &str) -> String {
    Path::new(stem)
        .parent()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| ".".to_string())
}

/// Builds the intra-package file graph. Relative imports and re-exports fold
/// into one edge set; barrel files have no import statements but still
/// depend on the files they re-export from.
fn build_import_graph(
    root: &Path,
    project_folder: &str,
    analyses: &FxHashMap<String, FileAnalysis>,
) -> FxHashMap<String, Vec<ImportEdge>> {
    let mut graph: FxHashMap<String, Vec<ImportEdge>> = FxHashMap::default();

    for (stem, analysis) in analyses {
        let dir = stem_dir(stem);
        let edges = graph.entry(stem.clone()).or_default();

        for import in &analysis.imports {
            if !import.source.starts_with('.') {
                continue;
            }
            let Some(from_stem) = resolve_import_source(root, project_folder, &dir, &import.source)
            else {
                continue;
            };
            let names: Vec<(String, String)> = import
                .names
                .iter()
                .map(|n| (n.orig.clone(), n.local.clone()))
                .collect();
            edges.push(ImportEdge {
                from_stem,
                is_side_effect: names.is_empty(),
                names,
            });
        }

        for export in &analysis.exports {
            if export.source.is_empty() || !export.source.starts_with('.') {
                continue;
            }
            let Some(from_stem) = resolve_import_source(root, project_folder, &dir, &export.source)
            else {
                continue;
            };
            if edges.iter().any(|e| e.from_stem == from_stem) {
                continue;
            }
            let names = if export.is_star {
                vec![(STAR.to_string(), REEXPORT_NS.to_string())]
            } else {
                vec![(export.local_name.clone(), export.local_name.clone())]
            };
            edges.push(ImportEdge {
                from_stem,
                names,
                is_side_effect: false,
            });
        }
    }

    graph
}

fn seed_from_ast_diff(
    input: &AnalyzerInput,
    baseline: &dyn BaselineSource,
    analyses: &FxHashMap<String, FileAnalysis>,
    project_changed: &[&str],
    tainted: &mut TaintMap,
) {
    let folder_prefix = format!("{}/", input.project_folder);
    for changed in project_changed {
        let rel = changed.strip_prefix(&folder_prefix).unwrap_or(changed);
        let lower = rel.to_ascii_lowercase();
        if !(lower.ends_with(".ts")
            || lower.ends_with(".tsx")
            || lower.ends_with(".js")
            || lower.ends_with(".jsx"))
        {
            continue;
        }
        let stem = strip_ts_extension(rel);
        let Some(new_analysis) = analyses.get(&stem) else {
            debug!(%stem, "changed file has no analysis (deleted or unparseable)");
            continue;
        };

        let old_analysis = baseline
            .file_at_base(changed)
            .and_then(|content| impactmap_tsparse::parse_source(content, *changed).ok());

        let affected =
            find_affected_symbols(old_analysis.as_ref(), new_analysis, input.include_types);
        debug!(%stem, ?affected, "affected symbols from diff");
        if !affected.is_empty() {
            tainted.entry(stem).or_default().extend(affected);
        }
    }
}

/// Seeds taint from changed style files inside the package. CSS-module
/// imports with named bindings taint only the symbols using those bindings;
/// any other style import taints every symbol in the importing file.
fn seed_from_style_changes(
    analyses: &FxHashMap<String, FileAnalysis>,
    changed_styles: &FxHashSet<String>,
    tainted: &mut TaintMap,
) {
    if changed_styles.is_empty() {
        return;
    }
    for (stem, analysis) in analyses {
        let dir = stem_dir(stem);
        for import in &analysis.imports {
            if !import.source.starts_with('.') || !is_style_import(&import.source) {
                continue;
            }
            let resolved = join_relative(&dir, &import.source);
            if !changed_styles.contains(&resolved) {
                continue;
            }
            let entry = tainted.entry(stem.clone()).or_default();
            if is_css_module(&import.source) && !import.names.is_empty() {
                let locals: Vec<String> = import.names.iter().map(|n| n.local.clone()).collect();
                entry.extend(tainted_symbols_by_usage(analysis, &locals));
                debug!(%stem, source = %import.source, "usage-tainted via CSS module import");
            } else {
                entry.extend(analysis.symbols.iter().map(|s| s.name.clone()));
                debug!(%stem, source = %import.source, "all symbols tainted via style import");
            }
        }
    }
}

/// Seeds taint from upstream packages whose exports are already known to be
/// affected.
fn seed_from_upstream(
    input: &AnalyzerInput,
    analyses: &FxHashMap<String, FileAnalysis>,
    tainted: &mut TaintMap,
) {
    if input.upstream_taint.is_empty() {
        return;
    }
    for (stem, analysis) in analyses {
        for import in &analysis.imports {
            if import.source.starts_with('.') {
                continue;
            }
            let Some(affected_names) = input
                .upstream_taint
                .get(&import.source)
                .filter(|names| !names.is_empty())
            else {
                if input.include_css && matches_css_taint(&import.source, input.upstream_taint) {
                    tainted
                        .entry(stem.clone())
                        .or_default()
                        .extend(analysis.symbols.iter().map(|s| s.name.clone()));
                    debug!(%stem, source = %import.source, "all symbols tainted via CSS import");
                }
                continue;
            };

            if import.names.is_empty() {
                // Side-effect import from a tainted upstream package.
                tainted
                    .entry(stem.clone())
                    .or_default()
                    .extend(analysis.symbols.iter().map(|s| s.name.clone()));
                continue;
            }

            let tainted_locals: Vec<String> = import
                .names
                .iter()
                .filter(|n| n.is_namespace() || affected_names.contains(&n.orig))
                .map(|n| n.local.clone())
                .collect();
            if tainted_locals.is_empty() {
                continue;
            }

            let mut newly = tainted_symbols_by_usage(analysis, &tainted_locals);
            newly.extend(reexported_names(analysis, &tainted_locals));
            if !newly.is_empty() {
                tainted.entry(stem.clone()).or_default().extend(newly);
            }
        }
    }
}

/// Seeds taint from external dependencies whose lockfile resolution changed.
/// Every imported name counts as tainted; star re-exports set the `*`
/// sentinel because external export names cannot be enumerated.
fn seed_from_external_deps(
    tainted_deps: &FxHashSet<String>,
    analyses: &FxHashMap<String, FileAnalysis>,
    tainted: &mut TaintMap,
) {
    if tainted_deps.is_empty() {
        return;
    }
    for (stem, analysis) in analyses {
        for import in &analysis.imports {
            if import.source.starts_with('.') || !is_from_tainted_dep(&import.source, tainted_deps)
            {
                continue;
            }
            let entry = tainted.entry(stem.clone()).or_default();
            if import.names.is_empty() {
                entry.extend(analysis.symbols.iter().map(|s| s.name.clone()));
            } else {
                let locals: Vec<String> = import.names.iter().map(|n| n.local.clone()).collect();
                entry.extend(tainted_symbols_by_usage(analysis, &locals));
                entry.extend(reexported_names(analysis, &locals));
            }
        }

        for export in &analysis.exports {
            if export.source.is_empty() || export.source.starts_with('.') {
                continue;
            }
            if !is_from_tainted_dep(&export.source, tainted_deps) {
                continue;
            }
            let entry = tainted.entry(stem.clone()).or_default();
            if export.is_star {
                entry.insert(STAR.to_string());
            } else {
                entry.insert(export.name.clone());
            }
        }
    }
}

/// Export names produced by local export clauses that reference one of the
/// given (tainted) local bindings.
fn reexported_names(analysis: &FileAnalysis, tainted_locals: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for export in &analysis.exports {
        if !export.source.is_empty() {
            continue;
        }
        for local in tainted_locals {
            let clean = local.strip_prefix("*:").unwrap_or(local);
            if export.local_name == clean {
                result.push(export.name.clone());
            }
        }
    }
    result
}

/// BFS over the reverse import graph. Each pop re-derives the importer's
/// newly tainted names from its edges, folds in re-exports, runs the
/// intra-file closure, and re-enqueues the importer only when its taint set
/// strictly grew.
fn propagate(
    input: &AnalyzerInput,
    analyses: &FxHashMap<String, FileAnalysis>,
    graph: &FxHashMap<String, Vec<ImportEdge>>,
    tainted: &mut TaintMap,
) {
    let mut reverse: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for (stem, edges) in graph {
        for edge in edges {
            reverse
                .entry(edge.from_stem.as_str())
                .or_default()
                .push(stem.as_str());
        }
    }

    let mut queue: VecDeque<String> = tainted.keys().cloned().collect();

    while let Some(current) = queue.pop_front() {
        let current_tainted = match tainted.get(&current) {
            Some(set) if !set.is_empty() => set.clone(),
            _ => continue,
        };
        debug!(stem = %current, tainted = ?current_tainted, "BFS visiting");

        let importers: Vec<String> = reverse
            .get(current.as_str())
            .map(|v| v.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        for importer in importers {
            let Some(importer_analysis) = analyses.get(&importer) else {
                continue;
            };

            let mut has_side_effect = false;
            let mut tainted_locals: Vec<String> = Vec::new();
            for edge in graph.get(&importer).map(|v| v.as_slice()).unwrap_or(&[]) {
                if edge.from_stem != current {
                    continue;
                }
                if edge.is_side_effect {
                    has_side_effect = true;
                    continue;
                }
                for (orig, local) in &edge.names {
                    if orig == STAR {
                        if !current_tainted.is_empty() {
                            tainted_locals.push(local.clone());
                        }
                    } else if current_tainted.contains(orig) || current_tainted.contains(STAR) {
                        tainted_locals.push(local.clone());
                    }
                }
            }

            if !has_side_effect && tainted_locals.is_empty() {
                continue;
            }

            let mut newly: Vec<String> = Vec::new();
            if has_side_effect {
                newly.extend(importer_analysis.symbols.iter().map(|s| s.name.clone()));
            }
            if !tainted_locals.is_empty() {
                newly.extend(tainted_symbols_by_usage(importer_analysis, &tainted_locals));
            }

            // Re-exports at the importer.
            let importer_dir = stem_dir(&importer);
            for export in &importer_analysis.exports {
                if export.source.is_empty() {
                    for local in &tainted_locals {
                        let clean = local.strip_prefix("*:").unwrap_or(local);
                        if export.local_name == *clean {
                            newly.push(export.name.clone());
                        }
                    }
                } else if export.source.starts_with('.') {
                    let resolved = resolve_import_source(
                        input.root,
                        input.project_folder,
                        &importer_dir,
                        &export.source,
                    );
                    if resolved.as_deref() == Some(current.as_str()) {
                        if export.is_star {
                            newly.extend(current_tainted.iter().cloned());
                        } else if current_tainted.contains(&export.local_name)
                            || current_tainted.contains(STAR)
                        {
                            newly.push(export.name.clone());
                        }
                    }
                }
            }

            if newly.is_empty() {
                continue;
            }

            // Intra-file closure, then union back the raw seeds (re-export
            // names need not be declared symbols).
            let closed =
                astdiff::intra_file_closure(importer_analysis, newly.clone(), input.include_types);
            newly.extend(closed);

            let entry = tainted.entry(importer.clone()).or_default();
            let mut grew = false;
            for name in newly {
                if entry.insert(name) {
                    grew = true;
                }
            }
            if grew {
                debug!(stem = %importer, "taint grew, re-enqueueing");
                queue.push_back(importer);
            }
        }
    }
}

/// Projects the final taint map onto entrypoint exports.
fn project_entrypoints(
    input: &AnalyzerInput,
    analyses: &FxHashMap<String, FileAnalysis>,
    tainted: &TaintMap,
) -> Vec<AffectedExport> {
    let empty: FxHashSet<String> = FxHashSet::default();
    let mut result = Vec::new();

    for ep in input.entrypoints {
        let ep_stem = strip_ts_extension(&ep.source_file);
        let Some(ep_analysis) = analyses.get(&ep_stem) else {
            continue;
        };
        let ep_dir = stem_dir(&ep_stem);
        let ep_tainted = tainted.get(&ep_stem).unwrap_or(&empty);

        let mut affected: Vec<String> = Vec::new();
        for export in &ep_analysis.exports {
            if export.is_type_only && !input.include_types {
                continue;
            }

            if export.source.is_empty() {
                if ep_tainted.contains(&export.local_name) || ep_tainted.contains(STAR) {
                    affected.push(export.name.clone());
                }
                continue;
            }

            if !export.source.starts_with('.') {
                // Re-export from an external dependency.
                if is_from_tainted_dep(&export.source, input.tainted_deps) && !export.is_star {
                    affected.push(export.name.clone());
                }
                continue;
            }

            let Some(resolved) =
                resolve_import_source(input.root, input.project_folder, &ep_dir, &export.source)
            else {
                debug!(export = %export.name, source = %export.source, "unresolvable re-export");
                continue;
            };
            let Some(src_tainted) = tainted.get(&resolved) else {
                continue;
            };

            if export.is_star {
                let mut names: Vec<String> = src_tainted.iter().cloned().collect();
                names.sort();
                affected.extend(names);
            } else if src_tainted.contains(&export.local_name) || src_tainted.contains(STAR) {
                affected.push(export.name.clone());
            }
        }

        if !affected.is_empty() {
            let mut deduped = Vec::new();
            for name in affected {
                if name != STAR && !deduped.contains(&name) {
                    deduped.push(name);
                }
            }
            if !deduped.is_empty() {
                result.push(AffectedExport {
                    entrypoint_path: ep.export_path.clone(),
                    export_names: deduped,
                });
            }
        }
    }

    result
}

/// Symbols whose body text references any of the given local bindings.
/// Namespace sentinels (`*:alias`) match on the alias.
pub fn tainted_symbols_by_usage(analysis: &FileAnalysis, tainted_locals: &[String]) -> Vec<String> {
    if tainted_locals.is_empty() {
        return Vec::new();
    }
    let clean: Vec<&str> = tainted_locals
        .iter()
        .map(|n| n.strip_prefix("*:").unwrap_or(n))
        .collect();

    analysis
        .symbols
        .iter()
        .filter(|sym| {
            let body = analysis.text_for_lines(sym.start_line, sym.end_line);
            clean.iter().any(|name| body.contains(name))
        })
        .map(|sym| sym.name.clone())
        .collect()
}

/// True when the import source names a tainted external dep exactly or via a
/// subpath (`react`, `react/jsx-runtime`, `@scope/pkg/utils`).
pub fn is_from_tainted_dep(import_source: &str, tainted_deps: &FxHashSet<String>) -> bool {
    tainted_deps.iter().any(|dep| {
        import_source == dep
            || import_source
                .strip_prefix(dep)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Scans a folder's sources for imports of tainted upstream specifiers.
/// Used for app-like packages where tracing to entrypoint exports is not
/// needed; any tainted import means the package is affected.
pub fn has_tainted_imports(
    root: &Path,
    folder: &str,
    upstream_taint: &TaintMap,
    ignore: &crate::project_config::IgnoreSet,
    include_css: bool,
) -> bool {
    has_tainted_imports_matching(root, folder, upstream_taint, ignore, include_css, None)
}

/// Like [`has_tainted_imports`] but scoped to files matching a glob.
pub fn has_tainted_imports_for_glob(
    root: &Path,
    folder: &str,
    glob: &globset::GlobMatcher,
    upstream_taint: &TaintMap,
    ignore: &crate::project_config::IgnoreSet,
    include_css: bool,
) -> bool {
    has_tainted_imports_matching(root, folder, upstream_taint, ignore, include_css, Some(glob))
}

fn has_tainted_imports_matching(
    root: &Path,
    folder: &str,
    upstream_taint: &TaintMap,
    ignore: &crate::project_config::IgnoreSet,
    include_css: bool,
    glob: Option<&globset::GlobMatcher>,
) -> bool {
    if upstream_taint.is_empty() {
        return false;
    }
    let Ok(files) = glob_source_files(root, folder) else {
        return false;
    };
    for rel in files {
        if let Some(matcher) = glob {
            if !matcher.is_match(&rel) {
                continue;
            }
        }
        if ignore.is_ignored(&rel) {
            continue;
        }
        let full = root.join(folder).join(&rel);
        let Ok(analysis) = impactmap_tsparse::parse_file(&full) else {
            continue;
        };
        for import in &analysis.imports {
            if import.source.starts_with('.') {
                continue;
            }
            // Exact specifier first, then subpath prefix (an import of
            // `@acme/foo/icons/arrow` falls under the `@acme/foo/icons`
            // taint entry).
            let affected_names = upstream_taint
                .get(&import.source)
                .or_else(|| {
                    upstream_taint
                        .iter()
                        .find(|(key, _)| {
                            import.source
                                .strip_prefix(key.as_str())
                                .is_some_and(|rest| rest.starts_with('/'))
                        })
                        .map(|(_, names)| names)
                })
                .filter(|names| !names.is_empty());
            match affected_names {
                None => {
                    if include_css && matches_css_taint(&import.source, upstream_taint) {
                        debug!(folder, source = %import.source, "matched CSS taint");
                        return true;
                    }
                }
                Some(affected_names) => {
                    if import.names.is_empty() {
                        return true;
                    }
                    for name in &import.names {
                        if name.is_namespace() || affected_names.contains(&name.orig) {
                            return true;
                        }
                    }
                }
            }
        }
    }

    if include_css {
        let scss_files = crate::css::glob_style_files(root, folder);
        for rel in scss_files {
            if let Some(matcher) = glob {
                if !matcher.is_match(&rel) {
                    continue;
                }
            }
            if ignore.is_ignored(&rel) {
                continue;
            }
            let uses = crate::css::parse_scss_uses(&root.join(folder).join(&rel));
            for spec in uses {
                if matches_css_taint(&spec, upstream_taint) {
                    debug!(folder, %spec, "matched CSS taint via SCSS use");
                    return true;
                }
            }
        }
    }

    false
}
