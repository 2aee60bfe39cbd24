//! Symbol extraction from chunk content.
//!
//! Identifier names make the symbol-boost stage of fusion work: a query
//! containing `authenticate_user` should prefer the chunk that defines it.
//! Extraction is regex-based per language; when the AST route produced the
//! chunk, the defining node's own name is prepended by the caller.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use quarry_core::Language;

/// Reserved words never reported as symbols, across all supported languages.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Shared keywords
        "if", "else", "for", "while", "return", "break", "continue", "true", "false", "null",
        "new", "in", "of", "do", "switch", "case", "default", "try", "catch", "finally", "throw",
        "import", "export", "from", "as", "async", "await", "static", "void", "this", "super",
        // Python
        "def", "class", "lambda", "pass", "raise", "with", "yield", "global", "nonlocal", "del",
        "elif", "except", "is", "not", "and", "or", "none", "self",
        // Rust
        "fn", "let", "mut", "impl", "struct", "enum", "trait", "mod", "pub", "use", "crate",
        "match", "loop", "ref", "move", "dyn", "where", "unsafe", "extern",
        // TypeScript / JavaScript
        "function", "const", "var", "interface", "type", "extends", "implements", "declare",
        "namespace", "enum", "readonly", "undefined", "typeof", "instanceof", "delete",
        // Go
        "func", "package", "go", "chan", "select", "defer", "range", "map", "nil", "fallthrough",
        // Java
        "public", "private", "protected", "final", "abstract", "synchronized", "volatile",
        "transient", "native", "strictfp", "throws", "boolean", "int", "long", "float", "double",
        "char", "byte", "short", "string",
    ]
    .into_iter()
    .collect()
});

/// Definition-site patterns per language. The first capture group is the
/// identifier being defined.
fn definition_patterns(language: Language) -> &'static [Regex] {
    static PYTHON: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![Regex::new(r"(?m)^\s*(?:def|class)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap()]
    });
    static RUST: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(
                r"(?m)\b(?:fn|struct|enum|trait|mod|macro_rules!)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )
            .unwrap(),
            Regex::new(r"(?m)\b(?:const|static|type)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        ]
    });
    static TS_JS: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(
                r"(?m)\b(?:function|class|interface|enum|namespace)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
            )
            .unwrap(),
            Regex::new(
                r"(?m)\b(?:const|let|var|type)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*(?::[^=\n]+)?=",
            )
            .unwrap(),
        ]
    });
    static GO: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(r"(?m)^func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            Regex::new(r"(?m)^type\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        ]
    });
    static JAVA: Lazy<Vec<Regex>> = Lazy::new(|| {
        vec![
            Regex::new(r"(?m)\b(?:class|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)").unwrap(),
            Regex::new(
                r"(?m)\b(?:public|private|protected|static|final)\s+[\w<>\[\], ]+\s+([a-z][A-Za-z0-9_$]*)\s*\(",
            )
            .unwrap(),
        ]
    });
    match language {
        Language::Python => PYTHON.as_slice(),
        Language::Rust => RUST.as_slice(),
        Language::TypeScript | Language::JavaScript => TS_JS.as_slice(),
        Language::Go => GO.as_slice(),
        Language::Java => JAVA.as_slice(),
        Language::Text => &[],
    }
}

/// Extract symbols defined in `content`, deduped in first-seen order,
/// stopword-filtered. `leading` (the enclosing AST node's name, when known)
/// is prepended.
pub fn extract_symbols(content: &str, language: Language, leading: Option<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();

    if let Some(name) = leading {
        let name = name.trim();
        if !name.is_empty() && seen.insert(name.to_string()) {
            symbols.push(name.to_string());
        }
    }

    for pattern in definition_patterns(language) {
        for caps in pattern.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                let ident = m.as_str();
                if STOPWORDS.contains(ident.to_ascii_lowercase().as_str()) {
                    continue;
                }
                if seen.insert(ident.to_string()) {
                    symbols.push(ident.to_string());
                }
            }
        }
    }

    symbols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_definitions() {
        let src = "def authenticate_user():\n    pass\n\nclass SessionStore:\n    pass\n";
        let symbols = extract_symbols(src, Language::Python, None);
        assert_eq!(symbols, vec!["authenticate_user", "SessionStore"]);
    }

    #[test]
    fn test_rust_definitions() {
        let src = "pub fn fuse_results() {}\nstruct RankedHit;\nconst RRF_K: f32 = 60.0;\n";
        let symbols = extract_symbols(src, Language::Rust, None);
        assert!(symbols.contains(&"fuse_results".to_string()));
        assert!(symbols.contains(&"RankedHit".to_string()));
        assert!(symbols.contains(&"RRF_K".to_string()));
    }

    #[test]
    fn test_leading_symbol_prepended_and_deduped() {
        let src = "def login(user):\n    return user\n";
        let symbols = extract_symbols(src, Language::Python, Some("login"));
        assert_eq!(symbols, vec!["login"]);
    }

    #[test]
    fn test_stopwords_excluded() {
        let src = "type if = number;\n";
        let symbols = extract_symbols(src, Language::TypeScript, None);
        assert!(symbols.is_empty());
    }

    #[test]
    fn test_text_has_no_symbols() {
        let symbols = extract_symbols("just prose, def means nothing here", Language::Text, None);
        assert!(symbols.is_empty());
    }

    #[test]
    fn test_go_method_receiver() {
        let src = "func (s *Server) HandleSearch(w http.ResponseWriter) {}\n";
        let symbols = extract_symbols(src, Language::Go, None);
        assert_eq!(symbols, vec!["HandleSearch"]);
    }
}
