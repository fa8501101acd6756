mod common;

use rustc_hash::{FxHashMap, FxHashSet};
use tempfile::TempDir;

use common::{app_manifest, library_manifest, project_info, write_file};
use impactmap_core::project_config::IgnoreSet;
use impactmap_core::workspace::{strip_json_comments, Workspace};

#[test]
fn test_load_workspace_with_comments_and_trailing_commas() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "rush.json",
        r#"{
  // the workspace
  "projects": [
    { "packageName": "@acme/lib", "projectFolder": "libs/lib" },
    { "packageName": "@acme/app", "projectFolder": "apps/app", "subspaceName": "web" }, /* trailing */
  ]
}"#,
    );
    write_file(
        temp.path(),
        "libs/lib/package.json",
        r#"{ "name": "@acme/lib", "module": "esm/index.js" }"#,
    );
    write_file(
        temp.path(),
        "apps/app/package.json",
        r#"{ "name": "@acme/app", "dependencies": { "@acme/lib": "workspace:*", "react": "^18.0.0" } }"#,
    );

    let ws = Workspace::load(temp.path()).unwrap();
    assert_eq!(ws.projects().len(), 2);

    let lib = ws.project("@acme/lib").unwrap();
    assert!(lib.manifest.is_library());
    assert_eq!(lib.subspace(), "default");

    let app = ws.project("@acme/app").unwrap();
    assert!(!app.manifest.is_library());
    assert_eq!(app.subspace(), "web");
    assert_eq!(app.depends_on.as_slice(), ["@acme/lib".to_string()]);
    assert_eq!(app.manifest.external_deps(), FxHashSet::from_iter(["react".to_string()]));

    assert_eq!(ws.dependents("@acme/lib"), vec!["@acme/app"]);
}

#[test]
fn test_missing_manifest_is_fatal() {
    let temp = TempDir::new().unwrap();
    assert!(Workspace::load(temp.path()).is_err());
}

#[test]
fn test_transitive_dependents_and_dependencies() {
    let ws = Workspace::new(vec![
        project_info("a", "pkgs/a", library_manifest("a", &[]), &[]),
        project_info("b", "pkgs/b", library_manifest("b", &["a"]), &["a"]),
        project_info("c", "pkgs/c", app_manifest("c", &["b"]), &["b"]),
        project_info("d", "pkgs/d", library_manifest("d", &[]), &[]),
    ]);

    let dependents = ws.transitive_dependents(&["a".to_string()]);
    assert_eq!(
        dependents,
        FxHashSet::from_iter(["a".to_string(), "b".to_string(), "c".to_string()])
    );

    let dependencies = ws.transitive_dependencies(&["c".to_string()]);
    assert_eq!(
        dependencies,
        FxHashSet::from_iter(["a".to_string(), "b".to_string(), "c".to_string()])
    );
}

#[test]
fn test_topological_levels_bottom_up() {
    let ws = Workspace::new(vec![
        project_info("a", "pkgs/a", library_manifest("a", &[]), &[]),
        project_info("b", "pkgs/b", library_manifest("b", &["a"]), &["a"]),
        project_info("c", "pkgs/c", app_manifest("c", &["b"]), &["b"]),
    ]);

    let affected: FxHashSet<String> =
        ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let levels = ws.topological_levels(&affected);
    assert_eq!(levels, vec![vec!["a"], vec!["b"], vec!["c"]]);
}

#[test]
fn test_topological_levels_only_consider_in_set_deps() {
    let ws = Workspace::new(vec![
        project_info("a", "pkgs/a", library_manifest("a", &[]), &[]),
        project_info("b", "pkgs/b", library_manifest("b", &["a"]), &["a"]),
    ]);

    // `a` is not affected, so `b` has no in-set dependencies.
    let affected: FxHashSet<String> = FxHashSet::from_iter(["b".to_string()]);
    let levels = ws.topological_levels(&affected);
    assert_eq!(levels, vec![vec!["b"]]);
}

#[test]
fn test_cycle_flushes_residue_as_one_level() {
    let ws = Workspace::new(vec![
        project_info("a", "pkgs/a", library_manifest("a", &["b"]), &["b"]),
        project_info("b", "pkgs/b", library_manifest("b", &["a"]), &["a"]),
        project_info("c", "pkgs/c", library_manifest("c", &[]), &[]),
    ]);

    let affected: FxHashSet<String> =
        ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    let levels = ws.topological_levels(&affected);
    assert_eq!(levels.len(), 2);
    assert_eq!(levels[0], vec!["c"]);
    let mut flushed = levels[1].clone();
    flushed.sort();
    assert_eq!(flushed, vec!["a", "b"]);
}

#[test]
fn test_find_changed_projects_respects_ignores() {
    let ws = Workspace::new(vec![project_info(
        "a",
        "pkgs/a",
        library_manifest("a", &[]),
        &[],
    )]);

    let mut ignores: FxHashMap<String, IgnoreSet> = FxHashMap::default();
    ignores.insert(
        "pkgs/a".to_string(),
        IgnoreSet::new(&["docs/**".to_string()]),
    );

    let changed = ws.find_changed_projects(&["pkgs/a/src/index.ts".to_string()], &ignores);
    assert!(changed.contains("a"));

    let ignored = ws.find_changed_projects(&["pkgs/a/docs/guide.md".to_string()], &ignores);
    assert!(ignored.is_empty());

    let config_only =
        ws.find_changed_projects(&["pkgs/a/.goodchangesrc.json".to_string()], &ignores);
    assert!(config_only.is_empty());
}

#[test]
fn test_strip_json_comments_preserves_strings() {
    let input = r#"{ "url": "https://example.com/path", // comment
  "glob": "src/**", /* block */ "n": 1, }"#;
    let cleaned = strip_json_comments(input);
    let value: serde_json::Value = serde_json::from_str(&cleaned).unwrap();
    assert_eq!(value["url"], "https://example.com/path");
    assert_eq!(value["glob"], "src/**");
    assert_eq!(value["n"], 1);
}
