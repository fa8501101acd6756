//! Parsing source files into analysis records.

use std::fs;
use std::path::Path;

use tree_sitter::{Node, Parser, Tree};

use crate::error::{Error, Result};

/// Declaration kinds tracked by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Class,
    Interface,
    Type,
    Variable,
    Enum,
}

/// A top-level symbol declaration with its source line span.
#[derive(Debug, Clone)]
pub struct SymbolDecl {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub is_exported: bool,
    pub export_name: String,
    /// True for interface and type-alias declarations.
    pub is_type_only: bool,
}

/// One imported binding: the name as exported by the source module and the
/// local binding name. A namespace import uses `orig == "*"` and a local name
/// of the form `"*:alias"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportName {
    pub orig: String,
    pub local: String,
}

impl ImportName {
    pub fn plain(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            orig: name.clone(),
            local: name,
        }
    }

    pub fn is_namespace(&self) -> bool {
        self.orig == "*"
    }

    /// The local binding name with the namespace sentinel stripped.
    pub fn local_binding(&self) -> &str {
        self.local.strip_prefix("*:").unwrap_or(&self.local)
    }
}

/// An import declaration. `names` is empty for side-effect imports.
#[derive(Debug, Clone)]
pub struct Import {
    /// The raw module specifier, quotes stripped.
    pub source: String,
    pub names: Vec<ImportName>,
}

/// An export declaration. `source` is empty for exports of local bindings.
#[derive(Debug, Clone)]
pub struct Export {
    /// The publicly visible name (`"default"` for default exports, `"*"` for
    /// star re-exports).
    pub name: String,
    /// The local (or upstream) binding name behind the export.
    pub local_name: String,
    /// Re-export source specifier, empty for local exports.
    pub source: String,
    pub is_type_only: bool,
    /// True for `export * from "..."`.
    pub is_star: bool,
}

/// The analysis record for one source file.
pub struct FileAnalysis {
    pub path: String,
    pub text: String,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,
    pub symbols: Vec<SymbolDecl>,
    tree: Tree,
    line_offsets: Vec<usize>,
}

impl FileAnalysis {
    /// The parse tree for this file. Used by the AST differ only.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Returns the text between the given 1-based inclusive line numbers.
    pub fn text_for_lines(&self, start_line: usize, end_line: usize) -> &str {
        let start = if start_line >= 1 && start_line - 1 < self.line_offsets.len() {
            self.line_offsets[start_line - 1]
        } else {
            0
        };
        let end = if end_line < self.line_offsets.len() {
            self.line_offsets[end_line]
        } else {
            self.text.len()
        };
        &self.text[start.min(self.text.len())..end.min(self.text.len())]
    }
}

impl std::fmt::Debug for FileAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileAnalysis")
            .field("path", &self.path)
            .field("imports", &self.imports)
            .field("exports", &self.exports)
            .field("symbols", &self.symbols)
            .finish()
    }
}

/// Parses the file at `path` from disk.
pub fn parse_file(path: &Path) -> Result<FileAnalysis> {
    let text = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_source(text, path.to_string_lossy())
}

/// Parses source text. The file name is used only for grammar selection
/// (TSX for `.tsx`/`.jsx`, TypeScript otherwise).
pub fn parse_source(text: impl Into<String>, path: impl Into<String>) -> Result<FileAnalysis> {
    let text = text.into();
    let path = path.into();

    let mut parser = Parser::new();
    parser.set_language(grammar_for(&path))?;
    let tree = parser
        .parse(&text, None)
        .ok_or_else(|| Error::Parse(path.clone()))?;

    let line_offsets = build_line_offsets(&text);
    let mut analysis = FileAnalysis {
        path,
        text,
        imports: Vec::new(),
        exports: Vec::new(),
        symbols: Vec::new(),
        tree,
        line_offsets,
    };

    {
        let root = analysis.tree.root_node();
        let mut cursor = root.walk();
        let statements: Vec<Node> = root.named_children(&mut cursor).collect();
        for stmt in &statements {
            extract_import(*stmt, &analysis.text, &mut analysis.imports);
            extract_export(
                *stmt,
                &analysis.text,
                &mut analysis.exports,
                &mut analysis.symbols,
            );
            extract_declarations(*stmt, *stmt, &analysis.text, false, false, &mut analysis.symbols);
        }
        collect_dynamic_imports(root, &analysis.text, &mut analysis.imports);
    }

    Ok(analysis)
}

fn grammar_for(path: &str) -> tree_sitter::Language {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".tsx") || lower.ends_with(".jsx") {
        tree_sitter_typescript::language_tsx()
    } else {
        tree_sitter_typescript::language_typescript()
    }
}

fn build_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            offsets.push(idx + 1);
        }
    }
    offsets
}

fn node_text<'a>(node: Node, text: &'a str) -> &'a str {
    node.utf8_text(text.as_bytes()).unwrap_or("")
}

/// Extracts the value of a string literal node, stripping the quote style.
fn string_value(node: Node, text: &str) -> String {
    node_text(node, text)
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .to_string()
}

fn line_span(node: Node) -> (usize, usize) {
    (node.start_position().row + 1, node.end_position().row + 1)
}

fn extract_import(stmt: Node, text: &str, imports: &mut Vec<Import>) {
    if stmt.kind() != "import_statement" {
        return;
    }
    let Some(source_node) = stmt.child_by_field_name("source") else {
        return;
    };
    let source = string_value(source_node, text);

    let mut names = Vec::new();
    let mut cursor = stmt.walk();
    for child in stmt.named_children(&mut cursor) {
        if child.kind() != "import_clause" {
            continue;
        }
        let mut clause_cursor = child.walk();
        for binding in child.named_children(&mut clause_cursor) {
            match binding.kind() {
                // Default import: bound locally, exported as "default".
                "identifier" => names.push(ImportName {
                    orig: "default".to_string(),
                    local: node_text(binding, text).to_string(),
                }),
                "namespace_import" => {
                    let mut ns_cursor = binding.walk();
                    let ns_children: Vec<Node> = binding.named_children(&mut ns_cursor).collect();
                    if let Some(alias) = ns_children
                        .into_iter()
                        .find(|n| n.kind() == "identifier")
                    {
                        names.push(ImportName {
                            orig: "*".to_string(),
                            local: format!("*:{}", node_text(alias, text)),
                        });
                    }
                }
                "named_imports" => {
                    let mut spec_cursor = binding.walk();
                    for spec in binding.named_children(&mut spec_cursor) {
                        if spec.kind() != "import_specifier" {
                            continue;
                        }
                        let Some(name) = spec.child_by_field_name("name") else {
                            continue;
                        };
                        let orig = node_text(name, text).to_string();
                        let local = spec
                            .child_by_field_name("alias")
                            .map(|a| node_text(a, text).to_string())
                            .unwrap_or_else(|| orig.clone());
                        names.push(ImportName { orig, local });
                    }
                }
                _ => {}
            }
        }
    }

    imports.push(Import { source, names });
}

fn extract_export(
    stmt: Node,
    text: &str,
    exports: &mut Vec<Export>,
    symbols: &mut Vec<SymbolDecl>,
) {
    if stmt.kind() != "export_statement" {
        return;
    }

    let source = stmt
        .child_by_field_name("source")
        .map(|n| string_value(n, text))
        .unwrap_or_default();
    let stmt_type_only = has_token(stmt, "type");
    let is_default = has_token(stmt, "default");

    if let Some(ns) = find_child(stmt, "namespace_export") {
        // export * as ns from "..."
        let mut cursor = ns.walk();
        if let Some(alias) = ns
            .named_children(&mut cursor)
            .find(|n| n.kind() == "identifier")
        {
            exports.push(Export {
                name: node_text(alias, text).to_string(),
                local_name: "*".to_string(),
                source,
                is_type_only: stmt_type_only,
                is_star: false,
            });
        }
        return;
    }

    if has_token(stmt, "*") {
        exports.push(Export {
            name: "*".to_string(),
            local_name: "*".to_string(),
            source,
            is_type_only: stmt_type_only,
            is_star: true,
        });
        return;
    }

    if let Some(clause) = find_child(stmt, "export_clause") {
        let mut cursor = clause.walk();
        for spec in clause.named_children(&mut cursor) {
            if spec.kind() != "export_specifier" {
                continue;
            }
            let Some(name) = spec.child_by_field_name("name") else {
                continue;
            };
            let local_name = node_text(name, text).to_string();
            let exported = spec
                .child_by_field_name("alias")
                .map(|a| node_text(a, text).to_string())
                .unwrap_or_else(|| local_name.clone());
            exports.push(Export {
                name: exported,
                local_name,
                source: source.clone(),
                is_type_only: stmt_type_only || has_token(spec, "type"),
                is_star: false,
            });
        }
        return;
    }

    if let Some(decl) = stmt.child_by_field_name("declaration") {
        let mut declared = Vec::new();
        extract_declarations(decl, stmt, text, true, is_default, &mut declared);
        for sym in &declared {
            exports.push(Export {
                name: sym.export_name.clone(),
                local_name: sym.name.clone(),
                source: String::new(),
                is_type_only: sym.is_type_only,
                is_star: false,
            });
        }
        symbols.extend(declared);
        return;
    }

    if is_default || has_token(stmt, "=") {
        // `export default <expr>` or the legacy `export = <expr>` form.
        exports.push(Export {
            name: "default".to_string(),
            local_name: "default".to_string(),
            source: String::new(),
            is_type_only: false,
            is_star: false,
        });
    }
}

fn extract_declarations(
    decl: Node,
    span_node: Node,
    text: &str,
    is_exported: bool,
    is_default: bool,
    symbols: &mut Vec<SymbolDecl>,
) {
    let (start_line, end_line) = line_span(span_node);
    let kind = match decl.kind() {
        "function_declaration" | "generator_function_declaration" => SymbolKind::Function,
        "class_declaration" | "abstract_class_declaration" => SymbolKind::Class,
        "interface_declaration" => SymbolKind::Interface,
        "type_alias_declaration" => SymbolKind::Type,
        "enum_declaration" => SymbolKind::Enum,
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = decl.walk();
            for declarator in decl.named_children(&mut cursor) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                let Some(name) = declarator.child_by_field_name("name") else {
                    continue;
                };
                if name.kind() != "identifier" {
                    continue;
                }
                let name = node_text(name, text).to_string();
                symbols.push(SymbolDecl {
                    export_name: name.clone(),
                    name,
                    kind: SymbolKind::Variable,
                    start_line,
                    end_line,
                    is_exported,
                    is_type_only: false,
                });
            }
            return;
        }
        _ => return,
    };

    let name = decl
        .child_by_field_name("name")
        .filter(|n| matches!(n.kind(), "identifier" | "type_identifier"))
        .map(|n| node_text(n, text).to_string())
        .or_else(|| is_default.then(|| "default".to_string()));
    let Some(name) = name else { return };

    let is_type_only = matches!(kind, SymbolKind::Interface | SymbolKind::Type);
    let export_name = if is_default {
        "default".to_string()
    } else {
        name.clone()
    };
    symbols.push(SymbolDecl {
        name,
        kind,
        start_line,
        end_line,
        is_exported,
        export_name,
        is_type_only,
    });
}

fn has_token(node: Node, token: &str) -> bool {
    let mut cursor = node.walk();
    if !cursor.goto_first_child() {
        return false;
    }
    loop {
        let child = cursor.node();
        if !child.is_named() && child.kind() == token {
            return true;
        }
        if !cursor.goto_next_sibling() {
            return false;
        }
    }
}

fn find_child<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
    children.into_iter().find(|n| n.kind() == kind)
}

// --- dynamic import recovery ---

/// Recovers dynamic `import(...)` usages in three shapes:
///
/// 1. `const m = await import("s")` with `m.Foo` accesses elsewhere in the
///    file (accesses are aggregated file-wide);
/// 2. `const { A, B } = await import("s")`;
/// 3. `import("s").then(m => m.Foo)` / `import("s").then(({ A }) => ...)`.
fn collect_dynamic_imports(root: Node, text: &str, imports: &mut Vec<Import>) {
    let mut namespace_bindings: Vec<(String, String)> = Vec::new(); // (alias, source)

    visit(root, &mut |node| {
        match node.kind() {
            "variable_declarator" => {
                let Some(value) = node.child_by_field_name("value") else {
                    return;
                };
                let Some(source) = dynamic_import_source(unwrap_await(value), text) else {
                    return;
                };
                let Some(name) = node.child_by_field_name("name") else {
                    return;
                };
                match name.kind() {
                    "identifier" => {
                        namespace_bindings.push((node_text(name, text).to_string(), source));
                    }
                    "object_pattern" => {
                        let names = destructured_names(name, text);
                        imports.push(Import { source, names });
                    }
                    _ => {}
                }
            }
            "call_expression" => {
                // import("s").then(callback)
                let Some(function) = node.child_by_field_name("function") else {
                    return;
                };
                if function.kind() != "member_expression" {
                    return;
                }
                let (Some(object), Some(property)) = (
                    function.child_by_field_name("object"),
                    function.child_by_field_name("property"),
                ) else {
                    return;
                };
                if node_text(property, text) != "then" {
                    return;
                }
                let Some(source) = dynamic_import_source(object, text) else {
                    return;
                };
                let Some(args) = node.child_by_field_name("arguments") else {
                    return;
                };
                let mut cursor = args.walk();
                let Some(callback) = args
                    .named_children(&mut cursor)
                    .find(|n| matches!(n.kind(), "arrow_function" | "function" | "function_expression"))
                else {
                    return;
                };
                let names = callback_binding_names(callback, text);
                imports.push(Import { source, names });
            }
            _ => {}
        }
    });

    for (alias, source) in namespace_bindings {
        let mut props = Vec::new();
        collect_property_accesses(root, text, &alias, &mut props);
        let names = props.into_iter().map(ImportName::plain).collect();
        imports.push(Import { source, names });
    }
}

fn visit<'a>(node: Node<'a>, f: &mut impl FnMut(Node<'a>)) {
    f(node);
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        visit(child, f);
    }
}

fn unwrap_await(node: Node) -> Node {
    if node.kind() == "await_expression" {
        if let Some(inner) = node.named_child(0) {
            return inner;
        }
    }
    node
}

/// Returns the specifier when `node` is an `import("...")` call.
fn dynamic_import_source(node: Node, text: &str) -> Option<String> {
    if node.kind() != "call_expression" {
        return None;
    }
    let function = node.child_by_field_name("function")?;
    if function.kind() != "import" {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let arg = args
        .named_children(&mut cursor)
        .find(|n| n.kind() == "string")?;
    Some(string_value(arg, text))
}

fn destructured_names(pattern: Node, text: &str) -> Vec<ImportName> {
    let mut names = Vec::new();
    let mut cursor = pattern.walk();
    for child in pattern.named_children(&mut cursor) {
        match child.kind() {
            "shorthand_property_identifier_pattern" => {
                names.push(ImportName::plain(node_text(child, text)));
            }
            "pair_pattern" => {
                let (Some(key), Some(value)) = (
                    child.child_by_field_name("key"),
                    child.child_by_field_name("value"),
                ) else {
                    continue;
                };
                if value.kind() == "identifier" {
                    names.push(ImportName {
                        orig: node_text(key, text).to_string(),
                        local: node_text(value, text).to_string(),
                    });
                }
            }
            _ => {}
        }
    }
    names
}

/// Names bound by a dynamic-import `.then` callback: property accesses of an
/// identifier parameter, or the destructured names of an object pattern.
fn callback_binding_names(callback: Node, text: &str) -> Vec<ImportName> {
    let param = callback.child_by_field_name("parameter").or_else(|| {
        callback.child_by_field_name("parameters").and_then(|ps| {
            let mut cursor = ps.walk();
            let children: Vec<Node> = ps.named_children(&mut cursor).collect();
            children.into_iter().next()
        })
    });
    let Some(param) = param else {
        return Vec::new();
    };

    // Formal parameters wrap the pattern in required_parameter.
    let pattern = param
        .child_by_field_name("pattern")
        .unwrap_or(param);

    match pattern.kind() {
        "identifier" => {
            let alias = node_text(pattern, text);
            let mut props = Vec::new();
            if let Some(body) = callback.child_by_field_name("body") {
                collect_property_accesses(body, text, alias, &mut props);
            }
            props.into_iter().map(ImportName::plain).collect()
        }
        "object_pattern" => destructured_names(pattern, text),
        _ => Vec::new(),
    }
}

fn collect_property_accesses(scope: Node, text: &str, alias: &str, out: &mut Vec<String>) {
    visit(scope, &mut |node| {
        if node.kind() != "member_expression" {
            return;
        }
        let (Some(object), Some(property)) = (
            node.child_by_field_name("object"),
            node.child_by_field_name("property"),
        ) else {
            return;
        };
        if object.kind() == "identifier"
            && node_text(object, text) == alias
            && property.kind() == "property_identifier"
        {
            let prop = node_text(property, text).to_string();
            if !out.contains(&prop) {
                out.push(prop);
            }
        }
    });
}
