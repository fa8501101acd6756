mod common;

use tempfile::TempDir;

use common::{library_manifest, project_info, write_file};
use impactmap_core::analyzer::TaintMap;
use impactmap_core::css::{
    find_css_tainted_packages, is_css_module, is_style_import, matches_css_taint,
    propagate_css_taint, CSS_TAINT_PREFIX,
};
use impactmap_core::workspace::Workspace;

#[test]
fn test_style_import_detection() {
    assert!(is_style_import("./Button.scss"));
    assert!(is_style_import("@acme/ui-kit/styles/css/main.css"));
    assert!(is_style_import("@acme/ui-kit/styles/scss/variables"));
    assert!(!is_style_import("@acme/ui-kit"));
    assert!(!is_style_import("./Button"));

    assert!(is_css_module("./Button.module.scss"));
    assert!(is_css_module("./grid.module.css"));
    assert!(!is_css_module("./main.scss"));
}

#[test]
fn test_matches_css_taint_by_prefix() {
    let mut upstream = TaintMap::default();
    upstream
        .entry(format!("{CSS_TAINT_PREFIX}@acme/ui-kit"))
        .or_default()
        .insert("*".to_string());

    assert!(matches_css_taint(
        "@acme/ui-kit/styles/css/main.css",
        &upstream
    ));
    assert!(!matches_css_taint(
        "@acme/other/styles/css/main.css",
        &upstream
    ));
    // Matching requires a style-looking specifier.
    assert!(!matches_css_taint("@acme/ui-kit/esm/index.js", &upstream));
}

#[test]
fn test_changed_styles_mark_owning_package() {
    let ws = Workspace::new(vec![
        project_info(
            "@acme/ui-kit",
            "libs/ui-kit",
            library_manifest("@acme/ui-kit", &[]),
            &[],
        ),
        project_info(
            "@acme/widgets",
            "libs/widgets",
            library_manifest("@acme/widgets", &[]),
            &[],
        ),
    ]);

    let changed = vec![
        "libs/ui-kit/styles/main.scss".to_string(),
        "libs/widgets/src/index.ts".to_string(),
    ];
    let tainted = find_css_tainted_packages(&changed, &ws);
    assert_eq!(tainted.len(), 1);
    assert!(tainted.contains("@acme/ui-kit"));
}

#[test]
fn test_scss_use_chain_propagates_to_fixpoint() {
    let temp = TempDir::new().unwrap();
    write_file(temp.path(), "libs/ui-kit/styles/main.scss", "body {}\n");
    write_file(
        temp.path(),
        "libs/widgets/styles/theme.scss",
        "@use \"@acme/ui-kit/styles/main\";\n.theme {}\n",
    );
    write_file(
        temp.path(),
        "libs/charts/styles/chart.scss",
        "@import \"@acme/widgets/styles/theme\";\n",
    );
    write_file(
        temp.path(),
        "libs/standalone/styles/own.scss",
        "@use \"sass:math\";\n@use \"./local\";\n",
    );

    let ws = Workspace::new(vec![
        project_info(
            "@acme/ui-kit",
            "libs/ui-kit",
            library_manifest("@acme/ui-kit", &[]),
            &[],
        ),
        project_info(
            "@acme/widgets",
            "libs/widgets",
            library_manifest("@acme/widgets", &[]),
            &[],
        ),
        project_info(
            "@acme/charts",
            "libs/charts",
            library_manifest("@acme/charts", &[]),
            &[],
        ),
        project_info(
            "@acme/standalone",
            "libs/standalone",
            library_manifest("@acme/standalone", &[]),
            &[],
        ),
    ]);

    let mut upstream = TaintMap::default();
    upstream
        .entry(format!("{CSS_TAINT_PREFIX}@acme/ui-kit"))
        .or_default()
        .insert("*".to_string());

    propagate_css_taint(temp.path(), &ws, &mut upstream);

    assert!(upstream.contains_key(&format!("{CSS_TAINT_PREFIX}@acme/widgets")));
    assert!(upstream.contains_key(&format!("{CSS_TAINT_PREFIX}@acme/charts")));
    assert!(!upstream.contains_key(&format!("{CSS_TAINT_PREFIX}@acme/standalone")));
}
