mod common;

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

use common::write_file;
use impactmap_core::orchestrator::{run, RunOptions};

fn git(root: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(root)
        .status()
        .expect("git available");
    assert!(status.success(), "git {args:?} failed");
}

/// Seeds a repo with one library, one e2e target importing `foo` from it,
/// and commits the baseline. Comparisons run against HEAD, so later
/// working-tree edits are the change set.
fn setup_repo(temp: &TempDir) {
    let root = temp.path();
    write_file(
        root,
        "rush.json",
        r#"{
  "projects": [
    { "packageName": "@acme/lib", "projectFolder": "libs/lib" },
    { "packageName": "@acme/dash-e2e", "projectFolder": "e2e/dash" }
  ]
}"#,
    );
    write_file(
        root,
        "libs/lib/package.json",
        r#"{ "name": "@acme/lib", "module": "esm/index.js" }"#,
    );
    write_file(
        root,
        "libs/lib/src/index.ts",
        "export { foo } from \"./foo\";\nexport { bar } from \"./bar\";\n",
    );
    write_file(
        root,
        "libs/lib/src/foo.ts",
        "export function foo() { return 1; }\n",
    );
    write_file(
        root,
        "libs/lib/src/bar.ts",
        "export function bar() { return 1; }\n",
    );
    write_file(
        root,
        "e2e/dash/package.json",
        r#"{ "name": "@acme/dash-e2e", "dependencies": { "@acme/lib": "workspace:*" } }"#,
    );
    write_file(
        root,
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target" }] }"#,
    );
    write_file(
        root,
        "e2e/dash/src/spec.ts",
        "import { foo } from \"@acme/lib\";\nexport const check = foo();\n",
    );

    git(root, &["init", "--quiet"]);
    git(root, &["add", "."]);
    git(
        root,
        &[
            "-c",
            "user.email=ci@example.com",
            "-c",
            "user.name=ci",
            "commit",
            "--quiet",
            "-m",
            "baseline",
        ],
    );
}

fn options(root: &Path) -> RunOptions {
    let mut opts = RunOptions::new(root);
    // HEAD as the comparison branch makes the working tree the change set.
    opts.compare_branch = "HEAD".to_string();
    opts
}

#[test]
fn test_edited_imported_symbol_triggers_target() {
    let temp = TempDir::new().unwrap();
    setup_repo(&temp);

    write_file(
        temp.path(),
        "libs/lib/src/foo.ts",
        "export function foo() { return 999; }\n",
    );

    let hits = run(&options(temp.path())).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "@acme/dash-e2e");
    assert_eq!(
        serde_json::to_string(&hits).unwrap(),
        r#"[{"name":"@acme/dash-e2e"}]"#
    );
}

#[test]
fn test_edited_unimported_symbol_is_quiet() {
    let temp = TempDir::new().unwrap();
    setup_repo(&temp);

    // The e2e project imports only `foo`; editing `bar` changes nothing for it.
    write_file(
        temp.path(),
        "libs/lib/src/bar.ts",
        "export function bar() { return 999; }\n",
    );

    let hits = run(&options(temp.path())).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_no_changes_yield_empty_output() {
    let temp = TempDir::new().unwrap();
    setup_repo(&temp);

    let hits = run(&options(temp.path())).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_comment_only_edit_is_quiet() {
    let temp = TempDir::new().unwrap();
    setup_repo(&temp);

    write_file(
        temp.path(),
        "libs/lib/src/foo.ts",
        "// upcoming work\nexport function foo() { return 1; }\n",
    );

    let hits = run(&options(temp.path())).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn test_missing_workspace_manifest_is_fatal() {
    let temp = TempDir::new().unwrap();
    git(temp.path(), &["init", "--quiet"]);
    write_file(temp.path(), "README.md", "x\n");
    git(temp.path(), &["add", "."]);
    git(
        temp.path(),
        &[
            "-c",
            "user.email=ci@example.com",
            "-c",
            "user.name=ci",
            "commit",
            "--quiet",
            "-m",
            "baseline",
        ],
    );

    assert!(run(&options(temp.path())).is_err());
}
