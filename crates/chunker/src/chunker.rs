//! Two-level chunking: AST boundaries when available, line windows otherwise.

use quarry_config::ChunkerConfig;
use quarry_core::{fnv1a32, Chunk, Language};

use crate::binary::is_binary;
use crate::symbols::extract_symbols;

/// Build the stable chunk identifier.
///
/// Same `(path, chunk_index, content_length)` must yield the same id on
/// every run and every host; fusion, the tracker and both indices all key
/// on it.
pub fn doc_id(path: &str, chunk_index: usize, content_length: usize) -> String {
    let hash = fnv1a32(&format!("{path}:{chunk_index}:{content_length}"));
    format!("{path}#{chunk_index}#{hash:08x}")
}

/// Content → ordered chunk sequence.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk one file. Binary and effectively-empty content yields no
    /// chunks (the caller treats that as "skip", not an error).
    pub fn chunk_file(&self, path: &str, content: &str) -> Vec<Chunk> {
        if content.trim().is_empty() || is_binary(content.as_bytes()) {
            return Vec::new();
        }

        let language = Language::from_path(path);

        if let Some(chunks) = self.ast_chunks(path, content, language) {
            return chunks;
        }

        self.line_chunks(path, content, language)
    }

    /// AST route. `None` falls through to line chunking.
    #[cfg(feature = "treesitter")]
    fn ast_chunks(&self, path: &str, content: &str, language: Language) -> Option<Vec<Chunk>> {
        if content.len() > self.config.max_ast_bytes {
            return None;
        }

        let nodes = crate::ast::boundary_nodes(content, language)?;
        let lines: Vec<&str> = content.lines().collect();

        // Merge short chunks into their predecessor when contiguous.
        let mut merged: Vec<(usize, usize, String, Option<String>)> = Vec::new();
        for node in nodes {
            let span = node.end_line - node.start_line + 1;
            if span < self.config.min_ast_chunk_lines {
                if let Some(prev) = merged.last_mut() {
                    if node.start_line <= prev.1 + 1 {
                        prev.1 = prev.1.max(node.end_line);
                        continue;
                    }
                }
            }
            merged.push((node.start_line, node.end_line, node.node_type, node.name));
        }

        let mut chunks = Vec::with_capacity(merged.len());
        for (chunk_index, (start_line, end_line, node_type, name)) in merged.into_iter().enumerate()
        {
            let end = end_line.min(lines.len());
            let text = lines[start_line - 1..end].join("\n");
            let symbols = extract_symbols(&text, language, name.as_deref());
            chunks.push(Chunk {
                doc_id: doc_id(path, chunk_index, text.len()),
                path: path.to_string(),
                language,
                start_line,
                end_line: end,
                content: text,
                chunk_index,
                symbols,
                node_type: Some(node_type),
            });
        }

        tracing::debug!(path, chunks = chunks.len(), "AST chunking");
        Some(chunks)
    }

    #[cfg(not(feature = "treesitter"))]
    fn ast_chunks(&self, _path: &str, _content: &str, _language: Language) -> Option<Vec<Chunk>> {
        None
    }

    /// Line-window fallback: windows of `max_chunk_lines` with
    /// `overlap_lines` shared between consecutive chunks.
    fn line_chunks(&self, path: &str, content: &str, language: Language) -> Vec<Chunk> {
        let lines: Vec<&str> = content.lines().collect();
        let window = self.config.max_chunk_lines.max(1);
        let step = window.saturating_sub(self.config.overlap_lines).max(1);

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut chunk_index = 0usize;

        while start < lines.len() {
            let end = (start + window).min(lines.len());
            let text = lines[start..end].join("\n");
            let symbols = extract_symbols(&text, language, None);
            chunks.push(Chunk {
                doc_id: doc_id(path, chunk_index, text.len()),
                path: path.to_string(),
                language,
                start_line: start + 1,
                end_line: end,
                content: text,
                chunk_index,
                symbols,
                node_type: None,
            });

            if end == lines.len() {
                break;
            }
            start += step;
            chunk_index += 1;
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::default()
    }

    fn numbered_lines(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_doc_id_stable() {
        let a = doc_id("src/auth.py", 0, 120);
        let b = doc_id("src/auth.py", 0, 120);
        assert_eq!(a, b);
        assert!(a.starts_with("src/auth.py#0#"));
        assert_ne!(a, doc_id("src/auth.py", 1, 120));
        assert_ne!(a, doc_id("src/auth.py", 0, 121));
    }

    #[test]
    fn test_rechunk_yields_same_ids() {
        let content = numbered_lines(250);
        let first: Vec<String> = chunker()
            .chunk_file("notes.txt", &content)
            .into_iter()
            .map(|c| c.doc_id)
            .collect();
        let second: Vec<String> = chunker()
            .chunk_file("notes.txt", &content)
            .into_iter()
            .map(|c| c.doc_id)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_line_windows_and_overlap() {
        let content = numbered_lines(250);
        let chunks = chunker().chunk_file("notes.txt", &content);

        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 100);
        assert_eq!(chunks[1].start_line, 96, "5-line overlap");
        assert_eq!(chunks[1].end_line, 195);
        assert_eq!(chunks.last().unwrap().end_line, 250);

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
        }
    }

    #[test]
    fn test_short_file_single_chunk() {
        let chunks = chunker().chunk_file("short.txt", "one\ntwo\nthree");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
        assert_eq!(chunks[0].language, Language::Text);
    }

    #[test]
    fn test_empty_and_binary_skipped() {
        assert!(chunker().chunk_file("empty.txt", "").is_empty());
        assert!(chunker().chunk_file("blank.txt", "  \n\t\n").is_empty());
        assert!(chunker().chunk_file("blob.bin", "data\0data").is_empty());
    }

    #[test]
    fn test_python_symbols_without_ast() {
        // Works on the fallback path too: E1's corpus must carry symbols.
        let chunks = chunker().chunk_file("a.py", "def authenticate_user(): pass");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].symbols.contains(&"authenticate_user".to_string()));
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn test_ast_chunks_per_definition() {
        let src = r#"def first():
    a = 1
    b = 2
    c = 3
    d = 4
    e = 5
    f = 6
    g = 7
    h = 8
    return a


def second():
    x = 1
    y = 2
    z = 3
    p = 4
    q = 5
    r = 6
    s = 7
    t = 8
    return x
"#;
        let chunks = chunker().chunk_file("pair.py", src);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].node_type.as_deref(), Some("function_definition"));
        assert_eq!(chunks[0].symbols[0], "first");
        assert_eq!(chunks[1].symbols[0], "second");
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn test_ast_short_chunks_merge() {
        // Contiguous tiny functions merge into their predecessor.
        let src = "def a():\n    pass\ndef b():\n    pass\ndef c():\n    pass\n";
        let chunks = chunker().chunk_file("tiny.py", src);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 6);
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn test_oversized_file_takes_line_route() {
        let mut src = String::from("def top():\n    pass\n");
        src.push_str(&"# padding\n".repeat(60_000));
        assert!(src.len() > quarry_config::constants::chunker::MAX_AST_BYTES);
        let chunks = chunker().chunk_file("big.py", &src);
        assert!(chunks.iter().all(|c| c.node_type.is_none()));
    }
}
