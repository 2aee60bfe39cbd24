//! Language tagging by file extension.
//!
//! Unknown extensions map to [`Language::Text`]; such files are still
//! indexed, they just never take the AST chunking route.

use serde::{Deserialize, Serialize};

/// Languages the chunker understands. Everything else is `Text`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    TypeScript,
    JavaScript,
    Go,
    Java,
    Text,
}

impl Language {
    /// Detect from a path's extension.
    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        match ext {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            _ => Language::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Go => "go",
            Language::Java => "java",
            Language::Text => "text",
        }
    }

    /// Parse the wire form produced by [`Language::as_str`]. Unknown tags
    /// collapse to `Text`, mirroring extension detection.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "rust" => Language::Rust,
            "python" => Language::Python,
            "typescript" => Language::TypeScript,
            "javascript" => Language::JavaScript,
            "go" => Language::Go,
            "java" => Language::Java,
            _ => Language::Text,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_detection() {
        assert_eq!(Language::from_path("src/main.rs"), Language::Rust);
        assert_eq!(Language::from_path("app/views.py"), Language::Python);
        assert_eq!(Language::from_path("web/index.tsx"), Language::TypeScript);
        assert_eq!(Language::from_path("lib/util.mjs"), Language::JavaScript);
        assert_eq!(Language::from_path("cmd/main.go"), Language::Go);
        assert_eq!(Language::from_path("App.java"), Language::Java);
    }

    #[test]
    fn test_unknown_extension_is_text() {
        assert_eq!(Language::from_path("README.md"), Language::Text);
        assert_eq!(Language::from_path("Makefile"), Language::Text);
        assert_eq!(Language::from_path("notes"), Language::Text);
    }

    #[test]
    fn test_roundtrip() {
        for lang in [
            Language::Rust,
            Language::Python,
            Language::TypeScript,
            Language::JavaScript,
            Language::Go,
            Language::Java,
            Language::Text,
        ] {
            assert_eq!(Language::parse(lang.as_str()), lang);
        }
    }
}
