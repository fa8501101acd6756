//! Symbol-level diffing of two analyses of the same file.
//!
//! A symbol counts as changed only when its runtime behavior can differ:
//! pure type-annotation edits (`as T`, `satisfies T`, `<T>expr`, parameter
//! and return annotations, type-parameter lists) are stripped before
//! comparison, and interface/type-alias bodies only count when type-only
//! propagation is enabled.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use tree_sitter::Node;

use crate::analysis::FileAnalysis;

/// Compares the old and new analyses of one file and returns the names of
/// affected symbols, after intra-file reference closure.
///
/// `old` is `None` when the file did not exist at the baseline; every symbol
/// in `new` is then affected. Type-only symbols are reported only when
/// `include_types` is set, and type-only taint never propagates into runtime
/// symbols.
pub fn find_affected_symbols(
    old: Option<&FileAnalysis>,
    new: &FileAnalysis,
    include_types: bool,
) -> Vec<String> {
    let mut old_bodies: HashMap<&str, String> = HashMap::new();
    let mut old_runtime: HashMap<&str, String> = HashMap::new();
    if let Some(old) = old {
        for sym in &old.symbols {
            let body = old.text_for_lines(sym.start_line, sym.end_line);
            old_bodies.insert(sym.name.as_str(), normalize_whitespace(body));
        }
        let old_stmts = statement_nodes(old);
        for sym in &old.symbols {
            if sym.is_type_only {
                continue;
            }
            if let Some(stmt) = old_stmts.get(sym.name.as_str()) {
                old_runtime.insert(sym.name.as_str(), runtime_text(*stmt, &old.text));
            }
        }
    }

    let new_stmts = statement_nodes(new);
    let mut affected: Vec<String> = Vec::new();

    for sym in &new.symbols {
        let new_body = normalize_whitespace(new.text_for_lines(sym.start_line, sym.end_line));

        let Some(old_body) = old_bodies.get(sym.name.as_str()) else {
            if sym.is_type_only && !include_types {
                continue;
            }
            affected.push(sym.name.clone());
            continue;
        };

        if *old_body == new_body {
            continue;
        }

        if sym.is_type_only {
            if include_types {
                affected.push(sym.name.clone());
            }
            continue;
        }

        let old_rt = old_runtime.get(sym.name.as_str()).cloned().unwrap_or_default();
        let new_rt = new_stmts
            .get(sym.name.as_str())
            .map(|stmt| runtime_text(*stmt, &new.text))
            .unwrap_or_default();
        if !old_rt.is_empty() && !new_rt.is_empty() && old_rt == new_rt {
            // Only annotations changed.
            if include_types {
                affected.push(sym.name.clone());
            }
            continue;
        }

        affected.push(sym.name.clone());
    }

    if !affected.is_empty() {
        affected = intra_file_closure(new, affected, include_types);
    }

    affected
}

/// Propagates taint through the intra-file reference graph: symbol B depends
/// on symbol A iff A's name occurs in B's body text. Type-only taint does not
/// cross into runtime symbols. Runs to a fixpoint.
pub fn intra_file_closure(
    analysis: &FileAnalysis,
    seeds: Vec<String>,
    include_types: bool,
) -> Vec<String> {
    let type_only: HashMap<&str, bool> = analysis
        .symbols
        .iter()
        .map(|s| (s.name.as_str(), s.is_type_only))
        .collect();

    let mut affected: HashSet<String> = HashSet::new();
    let mut affected_type_only: HashMap<String, bool> = HashMap::new();
    for name in seeds {
        let to = type_only.get(name.as_str()).copied().unwrap_or(false);
        affected_type_only.insert(name.clone(), to);
        affected.insert(name);
    }

    let mut depends_on: HashMap<&str, HashSet<&str>> = HashMap::new();
    for sym in &analysis.symbols {
        let body = analysis.text_for_lines(sym.start_line, sym.end_line);
        let deps: HashSet<&str> = analysis
            .symbols
            .iter()
            .filter(|other| other.name != sym.name && body.contains(other.name.as_str()))
            .map(|other| other.name.as_str())
            .collect();
        depends_on.insert(sym.name.as_str(), deps);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for sym in &analysis.symbols {
            if affected.contains(&sym.name) {
                continue;
            }
            let Some(deps) = depends_on.get(sym.name.as_str()) else {
                continue;
            };
            for dep in deps {
                if !affected.contains(*dep) {
                    continue;
                }
                if affected_type_only.get(*dep).copied().unwrap_or(false) && !sym.is_type_only {
                    continue;
                }
                affected.insert(sym.name.clone());
                affected_type_only.insert(sym.name.clone(), sym.is_type_only);
                changed = true;
                break;
            }
        }
    }

    analysis
        .symbols
        .iter()
        .filter(|sym| affected.contains(&sym.name))
        .filter(|sym| !sym.is_type_only || include_types)
        .map(|sym| sym.name.clone())
        .collect()
}

/// Maps symbol names to their top-level statement nodes (the export wrapper
/// when the declaration is exported, so spans stay comparable across files).
fn statement_nodes<'tree>(analysis: &'tree FileAnalysis) -> HashMap<String, Node<'tree>> {
    let mut result = HashMap::new();
    let root = analysis.tree().root_node();
    let mut cursor = root.walk();
    for stmt in root.named_children(&mut cursor) {
        let decl = if stmt.kind() == "export_statement" {
            match stmt.child_by_field_name("declaration") {
                Some(decl) => decl,
                None => continue,
            }
        } else {
            stmt
        };
        match decl.kind() {
            "function_declaration"
            | "generator_function_declaration"
            | "class_declaration"
            | "abstract_class_declaration"
            | "interface_declaration"
            | "type_alias_declaration"
            | "enum_declaration" => {
                if let Some(name) = decl.child_by_field_name("name") {
                    if let Ok(name) = name.utf8_text(analysis.text.as_bytes()) {
                        result.insert(name.to_string(), stmt);
                    }
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                let mut decl_cursor = decl.walk();
                for declarator in decl.named_children(&mut decl_cursor) {
                    if declarator.kind() != "variable_declarator" {
                        continue;
                    }
                    let Some(name) = declarator.child_by_field_name("name") else {
                        continue;
                    };
                    if name.kind() != "identifier" {
                        continue;
                    }
                    if let Ok(name) = name.utf8_text(analysis.text.as_bytes()) {
                        result.insert(name.to_string(), stmt);
                    }
                }
            }
            _ => {}
        }
    }
    result
}

/// Produces a normalized text representation of a statement with all
/// type-only syntax erased.
fn runtime_text(stmt: Node, text: &str) -> String {
    let mut ranges = Vec::new();
    collect_type_ranges(stmt, &mut ranges);
    let full = &text[stmt.start_byte()..stmt.end_byte()];
    normalize_whitespace(&strip_ranges(full, &ranges, stmt.start_byte()))
}

/// Collects byte ranges of type-only constructs within `node`.
fn collect_type_ranges(node: Node, ranges: &mut Vec<Range<usize>>) {
    match node.kind() {
        "as_expression" | "satisfies_expression" => {
            // `expr as T` / `expr satisfies T`: keep expr, strip the tail.
            if let Some(expr) = node.named_child(0) {
                ranges.push(expr.end_byte()..node.end_byte());
                collect_type_ranges(expr, ranges);
            }
            return;
        }
        "type_assertion" => {
            // `<T>expr`: strip the assertion, keep expr.
            let mut cursor = node.walk();
            if let Some(expr) = node
                .named_children(&mut cursor)
                .find(|n| n.kind() != "type_arguments")
            {
                ranges.push(node.start_byte()..expr.start_byte());
                collect_type_ranges(expr, ranges);
            }
            return;
        }
        // Covers variable/parameter annotations and function return types.
        "type_annotation" | "type_parameters" => {
            ranges.push(node.start_byte()..node.end_byte());
            return;
        }
        _ => {}
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_type_ranges(child, ranges);
    }
}

/// Removes the given absolute byte ranges from `text`, which starts at
/// `offset` within the original source.
fn strip_ranges(text: &str, ranges: &[Range<usize>], offset: usize) -> String {
    if ranges.is_empty() {
        return text.to_string();
    }
    let mut sorted: Vec<Range<usize>> = ranges.to_vec();
    sorted.sort_by_key(|r| r.start);

    let mut out = String::with_capacity(text.len());
    let mut pos = 0usize;
    for range in sorted {
        let start = range.start.saturating_sub(offset).min(text.len()).max(pos);
        let end = range.end.saturating_sub(offset).min(text.len());
        if start > pos {
            out.push_str(&text[pos..start]);
        }
        pos = pos.max(end);
    }
    if pos < text.len() {
        out.push_str(&text[pos..]);
    }
    out
}

/// Collapses whitespace runs to single spaces and trims.
pub fn normalize_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for ch in s.chars() {
        if matches!(ch, ' ' | '\t' | '\n' | '\r') {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out.trim().to_string()
}
