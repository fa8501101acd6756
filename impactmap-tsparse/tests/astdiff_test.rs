use impactmap_tsparse::{find_affected_symbols, parse_source};

fn diff(old: &str, new: &str, include_types: bool) -> Vec<String> {
    let old_analysis = parse_source(old, "file.ts").unwrap();
    let new_analysis = parse_source(new, "file.ts").unwrap();
    let mut affected = find_affected_symbols(Some(&old_analysis), &new_analysis, include_types);
    affected.sort();
    affected
}

#[test]
fn test_body_edit_is_affected() {
    let old = "export function foo() { return 1; }\nexport function bar() { return 2; }\n";
    let new = "export function foo() { return 99; }\nexport function bar() { return 2; }\n";
    assert_eq!(diff(old, new, false), vec!["foo"]);
}

#[test]
fn test_untouched_file_has_no_affected_symbols() {
    let src = "export function foo() { return 1; }\n";
    assert!(diff(src, src, false).is_empty());
}

#[test]
fn test_whitespace_and_comment_only_changes_ignored() {
    let old = "export function foo() { return 1; }\n";
    let new = "// a comment\nexport function foo() {\n  return 1;\n}\n";
    assert!(diff(old, new, false).is_empty());
}

#[test]
fn test_new_symbol_is_affected() {
    let old = "export function foo() { return 1; }\n";
    let new = "export function foo() { return 1; }\nexport function added() { return 2; }\n";
    assert_eq!(diff(old, new, false), vec!["added"]);
}

#[test]
fn test_missing_baseline_marks_everything() {
    let new_analysis = parse_source("export const a = 1;\nexport const b = 2;\n", "file.ts").unwrap();
    let mut affected = find_affected_symbols(None, &new_analysis, false);
    affected.sort();
    assert_eq!(affected, vec!["a", "b"]);
}

#[test]
fn test_interface_change_is_type_only() {
    let old = "export interface Shape { width: number; }\n";
    let new = "export interface Shape { width: number; height: number; }\n";
    assert!(diff(old, new, false).is_empty());
    assert_eq!(diff(old, new, true), vec!["Shape"]);
}

#[test]
fn test_type_alias_change_is_type_only() {
    let old = "export type Id = string;\n";
    let new = "export type Id = string | number;\n";
    assert!(diff(old, new, false).is_empty());
    assert_eq!(diff(old, new, true), vec!["Id"]);
}

#[test]
fn test_as_cast_addition_is_type_only() {
    let old = "export const value = compute();\nfunction compute() { return 1; }\n";
    let new = "export const value = compute() as number;\nfunction compute() { return 1; }\n";
    assert!(diff(old, new, false).is_empty());
    assert_eq!(diff(old, new, true), vec!["value"]);
}

#[test]
fn test_annotation_addition_is_type_only() {
    let old = "export const count = 0;\n";
    let new = "export const count: number = 0;\n";
    assert!(diff(old, new, false).is_empty());
}

#[test]
fn test_return_type_addition_is_type_only() {
    let old = "export function foo(x) { return x; }\n";
    let new = "export function foo(x: string): string { return x; }\n";
    assert!(diff(old, new, false).is_empty());
}

#[test]
fn test_type_parameter_addition_is_type_only() {
    let old = "export function wrap(value) { return [value]; }\n";
    let new = "export function wrap<T>(value: T) { return [value]; }\n";
    assert!(diff(old, new, false).is_empty());
}

#[test]
fn test_runtime_change_with_annotations_still_counts() {
    let old = "export function foo(x: number): number { return x; }\n";
    let new = "export function foo(x: number): number { return x + 1; }\n";
    assert_eq!(diff(old, new, false), vec!["foo"]);
}

#[test]
fn test_intra_file_reference_propagation() {
    let old = r#"
function inner() { return 1; }
export const outer = wrap(inner);
function wrap(f) { return f; }
"#;
    let new = r#"
function inner() { return 2; }
export const outer = wrap(inner);
function wrap(f) { return f; }
"#;
    // `outer` references `inner`, so it is affected transitively; `wrap`
    // does not reference `inner`.
    assert_eq!(diff(old, new, false), vec!["inner", "outer"]);
}

#[test]
fn test_type_only_change_does_not_propagate_to_runtime() {
    let old = r#"
interface Opts { a: number; }
export function run(opts: Opts) { return opts; }
"#;
    let new = r#"
interface Opts { a: number; b: number; }
export function run(opts: Opts) { return opts; }
"#;
    assert!(diff(old, new, false).is_empty());
    // With types included, the interface edit surfaces but stays type-side.
    let affected = diff(old, new, true);
    assert!(affected.contains(&"Opts".to_string()));
}
