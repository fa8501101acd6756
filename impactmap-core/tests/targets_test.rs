mod common;

use std::path::Path;

use rustc_hash::{FxHashMap, FxHashSet};
use tempfile::TempDir;

use common::{app_manifest, library_manifest, project_info, write_file, MemoryBaseline};
use impactmap_core::analyzer::TaintMap;
use impactmap_core::lockfile::DepChanges;
use impactmap_core::project_config::{ProjectConfig, TargetFilter};
use impactmap_core::targets::{evaluate_targets, TargetContext, TargetHit};
use impactmap_core::workspace::Workspace;

fn test_workspace() -> Workspace {
    Workspace::new(vec![
        project_info(
            "@acme/lib",
            "libs/lib",
            library_manifest("@acme/lib", &[]),
            &[],
        ),
        project_info(
            "@acme/dash",
            "apps/dash",
            app_manifest("@acme/dash", &["@acme/lib"]),
            &["@acme/lib"],
        ),
        project_info(
            "@acme/dash-e2e",
            "e2e/dash",
            app_manifest("@acme/dash-e2e", &["@acme/lib", "@acme/dash"]),
            &["@acme/lib", "@acme/dash"],
        ),
    ])
}

fn load_configs(root: &Path, ws: &Workspace) -> FxHashMap<String, ProjectConfig> {
    ProjectConfig::load_all(root, ws)
}

struct Fixture {
    workspace: Workspace,
    configs: FxHashMap<String, ProjectConfig>,
    changed_files: Vec<String>,
    changed_projects: FxHashSet<String>,
    dep_changes: DepChanges,
    upstream_taint: TaintMap,
    baseline: MemoryBaseline,
}

impl Fixture {
    fn new(root: &Path) -> Self {
        let workspace = test_workspace();
        let configs = load_configs(root, &workspace);
        Self {
            workspace,
            configs,
            changed_files: Vec::new(),
            changed_projects: FxHashSet::default(),
            dep_changes: DepChanges::default(),
            upstream_taint: TaintMap::default(),
            baseline: MemoryBaseline::empty(),
        }
    }

    fn evaluate(&self, root: &Path, filter: Option<&TargetFilter>) -> Vec<TargetHit> {
        let ctx = TargetContext {
            root,
            workspace: &self.workspace,
            configs: &self.configs,
            changed_files: &self.changed_files,
            changed_projects: &self.changed_projects,
            dep_changes: &self.dep_changes,
            upstream_taint: &self.upstream_taint,
            include_types: false,
            include_css: false,
            filter,
            baseline: &self.baseline,
        };
        evaluate_targets(&ctx)
    }
}

#[test]
fn test_regular_target_fires_on_direct_change() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target" }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/cypress/spec.ts".to_string()];

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "@acme/dash-e2e");
    assert!(hits[0].detections.is_none());
}

#[test]
fn test_ignored_change_does_not_fire() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "ignores": ["**/*.md"], "targets": [{ "type": "target" }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/docs/README.md".to_string()];

    assert!(fixture.evaluate(temp.path(), None).is_empty());
}

#[test]
fn test_per_target_ignores_are_additive() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "ignores": ["**/*.md"], "targets": [{ "type": "target", "ignores": ["fixtures/**"] }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec![
        "e2e/dash/docs/README.md".to_string(),
        "e2e/dash/fixtures/data.json".to_string(),
    ];
    assert!(fixture.evaluate(temp.path(), None).is_empty());

    fixture.changed_files.push("e2e/dash/cypress/spec.ts".to_string());
    assert_eq!(fixture.evaluate(temp.path(), None).len(), 1);
}

#[test]
fn test_target_fires_on_lockfile_dep_change() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target" }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture
        .dep_changes
        .entry("e2e/dash".to_string())
        .or_default()
        .insert("cypress".to_string());

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "@acme/dash-e2e");
}

#[test]
fn test_target_fires_on_tainted_import() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target" }] }"#,
    );
    write_file(
        temp.path(),
        "e2e/dash/src/spec.ts",
        "import { foo } from \"@acme/lib\";\nexport const v = foo();\n",
    );

    let mut fixture = Fixture::new(temp.path());
    fixture
        .upstream_taint
        .entry("@acme/lib".to_string())
        .or_default()
        .insert("foo".to_string());

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);

    // An untainted import name does not fire.
    let mut fixture = Fixture::new(temp.path());
    fixture
        .upstream_taint
        .entry("@acme/lib".to_string())
        .or_default()
        .insert("bar".to_string());
    assert!(fixture.evaluate(temp.path(), None).is_empty());
}

#[test]
fn test_target_fires_when_app_is_affected() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target", "app": "@acme/dash" }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_projects.insert("@acme/dash".to_string());

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "@acme/dash-e2e");

    // App lockfile deps count too.
    let mut fixture = Fixture::new(temp.path());
    fixture
        .dep_changes
        .entry("apps/dash".to_string())
        .or_default()
        .insert("react".to_string());
    assert_eq!(fixture.evaluate(temp.path(), None).len(), 1);
}

#[test]
fn test_virtual_target_coarse_glob() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "virtual-target", "targetName": "visual-snapshots",
             "changeDirs": [{ "glob": "stories/**/*" }] }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/stories/button.stories.ts".to_string()];

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "visual-snapshots");
    assert!(hits[0].detections.is_none());

    // Files outside the glob do not trigger.
    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/src/index.ts".to_string()];
    assert!(fixture.evaluate(temp.path(), None).is_empty());
}

#[test]
fn test_virtual_target_fine_grained_with_filter() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "virtual-target", "targetName": "scenario-tests",
             "changeDirs": [{ "glob": "scenarios/**/*", "type": "fine-grained",
                              "filter": "scenarios/**/*.test.ts" }] }] }"#,
    );
    write_file(
        temp.path(),
        "e2e/dash/scenarios/helper.ts",
        "export function helper() { return 2; }\n",
    );
    write_file(
        temp.path(),
        "e2e/dash/scenarios/a.test.ts",
        "import { helper } from \"./helper\";\nexport const a = helper();\n",
    );
    write_file(
        temp.path(),
        "e2e/dash/scenarios/b.ts",
        "import { helper } from \"./helper\";\nexport const b = helper();\n",
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/scenarios/helper.ts".to_string()];
    fixture.baseline = MemoryBaseline::with(&[(
        "e2e/dash/scenarios/helper.ts",
        "export function helper() { return 1; }\n",
    )]);

    let hits = fixture.evaluate(temp.path(), None);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "scenario-tests");
    assert_eq!(
        hits[0].detections,
        Some(vec!["scenarios/a.test.ts".to_string()])
    );
}

#[test]
fn test_targets_filter_restricts_output() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [{ "type": "target" }] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/cypress/spec.ts".to_string()];

    let filter = TargetFilter::parse("*dash-e2e").unwrap();
    assert_eq!(fixture.evaluate(temp.path(), Some(&filter)).len(), 1);

    let filter = TargetFilter::parse("*mobile*").unwrap();
    assert!(fixture.evaluate(temp.path(), Some(&filter)).is_empty());
}

#[test]
fn test_output_is_sorted_by_name() {
    let temp = TempDir::new().unwrap();
    write_file(
        temp.path(),
        "e2e/dash/.goodchangesrc.json",
        r#"{ "targets": [
            { "type": "virtual-target", "targetName": "zeta", "changeDirs": [{ "glob": "**/*" }] },
            { "type": "virtual-target", "targetName": "alpha", "changeDirs": [{ "glob": "**/*" }] }
        ] }"#,
    );

    let mut fixture = Fixture::new(temp.path());
    fixture.changed_files = vec!["e2e/dash/cypress/spec.ts".to_string()];

    let hits = fixture.evaluate(temp.path(), None);
    let names: Vec<&str> = hits.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}
