//! tree-sitter boundary detection.
//!
//! Parses a file and reports the top-most AST nodes whose kind is in the
//! language's boundary set. Nested boundaries (a method inside a class) are
//! not reported separately; the enclosing definition wins.

use tree_sitter::{Node, Parser};

use quarry_core::Language;

/// One boundary node: a line range plus the node's kind and name.
#[derive(Debug, Clone)]
pub struct BoundaryNode {
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub node_type: String,
    pub name: Option<String>,
}

fn grammar_for(language: Language) -> Option<tree_sitter::Language> {
    match language {
        Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
        Language::Python => Some(tree_sitter_python::LANGUAGE.into()),
        Language::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        Language::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
        Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
        Language::Java => Some(tree_sitter_java::LANGUAGE.into()),
        Language::Text => None,
    }
}

/// Node kinds that open a chunk, per language.
fn boundary_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => &["function_definition", "class_definition", "decorated_definition"],
        Language::Rust => &[
            "function_item",
            "impl_item",
            "struct_item",
            "enum_item",
            "trait_item",
        ],
        Language::TypeScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "type_alias_declaration",
        ],
        Language::JavaScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
        ],
        Language::Go => &["function_declaration", "method_declaration", "type_declaration"],
        Language::Java => &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "method_declaration",
        ],
        Language::Text => &[],
    }
}

/// Parse `content` and return its boundary nodes in document order.
/// `None` when the language has no grammar, parsing fails, or no boundary
/// node exists (callers fall back to line chunking).
pub fn boundary_nodes(content: &str, language: Language) -> Option<Vec<BoundaryNode>> {
    let grammar = grammar_for(language)?;
    let mut parser = Parser::new();
    parser.set_language(&grammar).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut out = Vec::new();
    collect(&root, content.as_bytes(), boundary_kinds(language), &mut out);

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn collect(node: &Node, source: &[u8], kinds: &[&str], out: &mut Vec<BoundaryNode>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            out.push(BoundaryNode {
                start_line: child.start_position().row + 1,
                end_line: child.end_position().row + 1,
                node_type: child.kind().to_string(),
                name: node_name(&child, source),
            });
            // Top-most boundary wins; do not descend into it.
        } else {
            collect(&child, source, kinds, out);
        }
    }
}

/// Extract a node's defining name via its name field, unwrapping Python
/// decorated definitions and Go type declarations along the way.
fn node_name(node: &Node, source: &[u8]) -> Option<String> {
    if node.kind() == "decorated_definition" {
        if let Some(def) = node.child_by_field_name("definition") {
            return node_name(&def, source);
        }
    }
    if node.kind() == "type_declaration" {
        if let Some(type_spec) = node.named_child(0) {
            return node_name(&type_spec, source);
        }
    }

    for field in ["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim();
                if !name.is_empty() {
                    return Some(name.to_string());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_boundaries() {
        let src = "import os\n\ndef login(user):\n    return user\n\nclass Session:\n    def renew(self):\n        pass\n";
        let nodes = boundary_nodes(src, Language::Python).expect("should parse");
        // `renew` is nested inside `Session` and must not appear separately.
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name.as_deref(), Some("login"));
        assert_eq!(nodes[0].node_type, "function_definition");
        assert_eq!(nodes[1].name.as_deref(), Some("Session"));
        assert_eq!(nodes[1].start_line, 6);
    }

    #[test]
    fn test_rust_boundaries() {
        let src = "struct Config;\n\nimpl Config {\n    fn new() -> Self {\n        Config\n    }\n}\n\npub fn run() {}\n";
        let nodes = boundary_nodes(src, Language::Rust).expect("should parse");
        let kinds: Vec<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
        assert_eq!(kinds, vec!["struct_item", "impl_item", "function_item"]);
        assert_eq!(nodes[2].name.as_deref(), Some("run"));
    }

    #[test]
    fn test_decorated_definition_name() {
        let src = "@cached\ndef expensive():\n    pass\n";
        let nodes = boundary_nodes(src, Language::Python).expect("should parse");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_type, "decorated_definition");
        assert_eq!(nodes[0].name.as_deref(), Some("expensive"));
    }

    #[test]
    fn test_no_boundaries_returns_none() {
        assert!(boundary_nodes("x = 1\ny = 2\n", Language::Python).is_none());
        assert!(boundary_nodes("anything", Language::Text).is_none());
    }
}
