//! Fine-grained affected-file selection.
//!
//! Runs the same seeding and reverse-import BFS as the package analyzer, but
//! at file granularity: the output is the set of files (matching a glob)
//! whose behavior may have changed, rather than entrypoint export names.
//! Only TypeScript sources participate.

use std::path::Path;

use globset::GlobMatcher;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use impactmap_tsparse::{find_affected_symbols, FileAnalysis};

use crate::analyzer::{
    glob_source_files, is_from_tainted_dep, BaselineSource, TaintMap,
};
use crate::css::matches_css_taint;
use crate::entrypoints::{resolve_import_source, strip_ts_extension};
use crate::project_config::IgnoreSet;

pub struct SelectorInput<'a> {
    pub root: &'a Path,
    pub project_folder: &'a str,
    pub glob: &'a GlobMatcher,
    pub changed_files: &'a [String],
    pub upstream_taint: &'a TaintMap,
    pub tainted_deps: &'a FxHashSet<String>,
    pub ignore: &'a IgnoreSet,
    pub include_types: bool,
    pub include_css: bool,
}

/// Returns the sorted, project-relative list of affected files matching the
/// glob. A file is affected if its own symbols changed (per AST diff), it is
/// newly added, it imports tainted upstream bindings or a tainted external
/// dep, or it transitively imports from an affected file.
pub fn find_affected_files(input: &SelectorInput, baseline: &dyn BaselineSource) -> Vec<String> {
    let Ok(all_files) = glob_source_files(input.root, input.project_folder) else {
        return Vec::new();
    };

    let mut files: FxHashMap<String, FileAnalysis> = FxHashMap::default();
    for rel in all_files {
        let lower = rel.to_ascii_lowercase();
        if !(lower.ends_with(".ts") || lower.ends_with(".tsx")) {
            continue;
        }
        if !input.glob.is_match(&rel) || input.ignore.is_ignored(&rel) {
            continue;
        }
        let full = input.root.join(input.project_folder).join(&rel);
        if let Ok(analysis) = impactmap_tsparse::parse_file(&full) {
            files.insert(rel, analysis);
        }
    }

    let mut affected: FxHashSet<String> = FxHashSet::default();

    // Directly changed files, with the AST diff filtering out no-op edits.
    let folder_prefix = format!("{}/", input.project_folder);
    for changed in input.changed_files {
        let Some(rel) = changed.strip_prefix(&folder_prefix) else {
            continue;
        };
        let Some(analysis) = files.get(rel) else {
            continue;
        };
        let old_analysis = baseline
            .file_at_base(changed)
            .and_then(|content| impactmap_tsparse::parse_source(content, changed.as_str()).ok());
        let is_new = old_analysis.is_none();
        let changed_symbols =
            find_affected_symbols(old_analysis.as_ref(), analysis, input.include_types);
        if is_new || !changed_symbols.is_empty() {
            affected.insert(rel.to_string());
        }
    }

    // Files importing tainted upstream bindings.
    for (rel, analysis) in &files {
        if affected.contains(rel) {
            continue;
        }
        'imports: for import in &analysis.imports {
            if import.source.starts_with('.') {
                continue;
            }
            match input
                .upstream_taint
                .get(&import.source)
                .filter(|names| !names.is_empty())
            {
                None => {
                    if input.include_css && matches_css_taint(&import.source, input.upstream_taint)
                    {
                        affected.insert(rel.clone());
                        break 'imports;
                    }
                }
                Some(affected_names) => {
                    if import.names.is_empty() {
                        affected.insert(rel.clone());
                        break 'imports;
                    }
                    for name in &import.names {
                        if name.is_namespace() || affected_names.contains(&name.orig) {
                            affected.insert(rel.clone());
                            break 'imports;
                        }
                    }
                }
            }
        }
    }

    // Files importing from tainted external deps.
    if !input.tainted_deps.is_empty() {
        for (rel, analysis) in &files {
            if affected.contains(rel) {
                continue;
            }
            let hit = analysis.imports.iter().any(|import| {
                !import.source.starts_with('.')
                    && is_from_tainted_dep(&import.source, input.tainted_deps)
            });
            if hit {
                affected.insert(rel.clone());
            }
        }
    }

    if affected.is_empty() {
        return Vec::new();
    }

    // Reverse edges over imports and re-exports, then BFS.
    let stem_to_rel: FxHashMap<String, &str> = files
        .keys()
        .map(|rel| (strip_ts_extension(rel), rel.as_str()))
        .collect();

    let mut reverse: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for (rel, analysis) in &files {
        let dir = Path::new(rel)
            .parent()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| ".".to_string());
        let sources = analysis
            .imports
            .iter()
            .map(|i| i.source.as_str())
            .chain(
                analysis
                    .exports
                    .iter()
                    .filter(|e| !e.source.is_empty())
                    .map(|e| e.source.as_str()),
            );
        for source in sources {
            if !source.starts_with('.') {
                continue;
            }
            let Some(stem) =
                resolve_import_source(input.root, input.project_folder, &dir, source)
            else {
                continue;
            };
            let Some(target_rel) = stem_to_rel.get(&stem) else {
                continue;
            };
            let importers = reverse.entry(*target_rel).or_default();
            if !importers.contains(&rel.as_str()) {
                importers.push(rel.as_str());
            }
        }
    }

    let mut queue: Vec<String> = affected.iter().cloned().collect();
    while let Some(current) = queue.pop() {
        let Some(importers) = reverse.get(current.as_str()) else {
            continue;
        };
        for importer in importers.clone() {
            if affected.insert(importer.to_string()) {
                debug!(file = importer, via = %current, "affected via import chain");
                queue.push(importer.to_string());
            }
        }
    }

    let mut result: Vec<String> = affected.into_iter().collect();
    result.sort();
    result
}
