//! Entrypoint resolution: mapping a package's declared public subpaths to
//! the source files behind them.
//!
//! Manifests point at built artifacts (`esm/index.js`, `dist/foo.d.ts`);
//! resolution maps those back to sources by rewriting known build-output
//! prefixes to `src/` and probing the TypeScript extension set.

use std::path::Path;

use serde_json::Value;

use crate::path_utils::join_relative;
use crate::workspace::PackageManifest;

/// A public subpath of a package and the source file behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entrypoint {
    /// `.` for the root entrypoint, `./utils` for a subpath.
    pub export_path: String,
    /// Project-relative source path.
    pub source_file: String,
}

/// Resolves all entrypoints of a package. Walks the `exports` field when
/// present, otherwise falls back to the first non-empty of `main`, `module`,
/// `browser`, `types`. Entrypoints whose built path cannot be mapped to an
/// existing source are dropped.
pub fn find_entrypoints(
    root: &Path,
    project_folder: &str,
    manifest: &PackageManifest,
) -> Vec<Entrypoint> {
    let mut entrypoints = Vec::new();

    if let Some(exports) = &manifest.exports {
        for (export_path, built) in parse_exports_field(exports) {
            if let Some(resolved) = resolve_to_source(root, project_folder, &built) {
                entrypoints.push(Entrypoint {
                    export_path,
                    source_file: resolved,
                });
            }
        }
        entrypoints.sort_by(|a, b| a.export_path.cmp(&b.export_path));
    }

    if entrypoints.is_empty() {
        for field in [
            &manifest.main,
            &manifest.module,
            &manifest.browser,
            &manifest.types,
        ] {
            if field.is_empty() {
                continue;
            }
            if let Some(resolved) = resolve_to_source(root, project_folder, field) {
                entrypoints.push(Entrypoint {
                    export_path: ".".to_string(),
                    source_file: resolved,
                });
                break;
            }
        }
    }

    entrypoints
}

/// Flattens the `exports` manifest field into `(subpath, built path)` pairs.
/// Wildcard subpaths are skipped; conditional values resolve through the
/// keys `types`, `import`, `default`, `require`, in that order.
fn parse_exports_field(exports: &Value) -> Vec<(String, String)> {
    match exports {
        Value::String(s) => vec![(".".to_string(), s.clone())],
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| !key.contains('*'))
            .filter_map(|(key, value)| {
                resolve_export_value(value).map(|built| (key.clone(), built))
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn resolve_export_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => ["types", "import", "default", "require"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(resolve_export_value),
        _ => None,
    }
}

const BUILD_PREFIXES: [&str; 4] = ["esm/", "dist/", "lib/", "build/"];
const BUILT_EXTENSIONS: [&str; 5] = [".d.mts", ".d.ts", ".mjs", ".cjs", ".js"];
const SOURCE_EXTENSIONS: [&str; 4] = [".ts", ".tsx", ".js", ".jsx"];
const INDEX_EXTENSIONS: [&str; 2] = [".ts", ".tsx"];

/// Maps a built path to a source path relative to the project folder. Tries
/// the build-prefix rewrite first, then the path unchanged; each candidate
/// is probed with the source extension set and an `index` fallback. Returns
/// the original path only if it exists on disk as-is.
pub fn resolve_to_source(root: &Path, project_folder: &str, built_path: &str) -> Option<String> {
    let built = built_path.trim_start_matches("./");
    let project = root.join(project_folder);

    let mut candidates = Vec::new();
    for prefix in BUILD_PREFIXES {
        if let Some(rest) = built.strip_prefix(prefix) {
            candidates.push(format!("src/{rest}"));
        }
    }
    candidates.push(built.to_string());

    for candidate in candidates {
        let base = BUILT_EXTENSIONS
            .iter()
            .find_map(|ext| candidate.strip_suffix(ext))
            .unwrap_or(&candidate);

        for ext in SOURCE_EXTENSIONS {
            let try_path = format!("{base}{ext}");
            if project.join(&try_path).is_file() {
                return Some(try_path);
            }
        }
        for ext in INDEX_EXTENSIONS {
            let try_path = format!("{base}/index{ext}");
            if project.join(&try_path).is_file() {
                return Some(try_path);
            }
        }
        if project.join(&candidate).is_file() {
            return Some(candidate);
        }
    }

    None
}

/// Resolves a relative import specifier to a project-relative file stem
/// (path with the extension stripped), or `None` for unresolvable or
/// non-relative specifiers.
pub fn resolve_import_source(
    root: &Path,
    project_folder: &str,
    from_dir: &str,
    source: &str,
) -> Option<String> {
    if !source.starts_with('.') {
        return None;
    }
    resolve_import_to_file(root, project_folder, from_dir, source).map(|f| strip_ts_extension(&f))
}

fn resolve_import_to_file(
    root: &Path,
    project_folder: &str,
    from_dir: &str,
    source: &str,
) -> Option<String> {
    let base = source
        .strip_suffix(".js")
        .or_else(|| source.strip_suffix(".jsx"))
        .unwrap_or(source);
    let rel = join_relative(from_dir, base);
    let project = root.join(project_folder);

    for ext in SOURCE_EXTENSIONS {
        let try_path = format!("{rel}{ext}");
        if project.join(&try_path).is_file() {
            return Some(try_path);
        }
    }
    for ext in INDEX_EXTENSIONS {
        let try_path = format!("{rel}/index{ext}");
        if project.join(&try_path).is_file() {
            return Some(try_path);
        }
    }
    None
}

/// Strips a TypeScript-family extension, declaration extensions first so
/// `foo.d.ts` keys as `foo`, not `foo.d`.
pub fn strip_ts_extension(path: &str) -> String {
    for ext in [".d.mts", ".d.ts", ".tsx", ".ts", ".jsx", ".js"] {
        if let Some(base) = path.strip_suffix(ext) {
            return base.to_string();
        }
    }
    path.to_string()
}

/// Parses an entrypoint file and returns all of its export names,
/// deduplicated, with the star sentinel suppressed.
pub fn collect_entrypoint_exports(root: &Path, project_folder: &str, ep: &Entrypoint) -> Vec<String> {
    let full = root.join(project_folder).join(&ep.source_file);
    let Ok(analysis) = impactmap_tsparse::parse_file(&full) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for export in &analysis.exports {
        if export.name == "*" {
            continue;
        }
        if !names.contains(&export.name) {
            names.push(export.name.clone());
        }
    }
    names
}
