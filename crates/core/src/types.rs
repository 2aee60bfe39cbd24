//! Data model shared across the indexing and query pipelines.
//!
//! Everything here is an owned entity keyed by string identifiers; chunks
//! refer to files by path, the tracker refers to chunks by `doc_id`. There
//! are no pointer graphs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Sparse embedding: token → weight, as produced by the inference service.
pub type SparseWeights = HashMap<String, f32>;

/// A searchable unit: a contiguous region of one file.
///
/// Created by the chunker, owned by the indexing pipeline, replaced whenever
/// the file's content hash changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from `(path, chunk_index, content length)`.
    pub doc_id: String,
    pub path: String,
    pub language: Language,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub content: String,
    /// 0-based position within the file.
    pub chunk_index: usize,
    /// Identifier names found in the chunk, stopword-filtered, deduped.
    #[serde(default)]
    pub symbols: Vec<String>,
    /// AST node type that produced the chunk, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
}

/// A named, isolated index. A deployment may host many stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-store indexing state for one path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedFile {
    pub path: String,
    /// First 16 hex chars of the SHA-256 content digest. Good enough for
    /// change detection, never used for content integrity.
    pub hash: String,
    pub size: u64,
    pub indexed_at: DateTime<Utc>,
    pub chunk_ids: Vec<String>,
}

/// One raw ranked hit from a single retrieval modality.
#[derive(Debug, Clone)]
pub struct Hit {
    pub doc_id: String,
    pub path: String,
    pub language: Language,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub symbols: Vec<String>,
    /// Modality-native score (BM25 for lexical, cosine or fused for vector).
    pub score: f32,
    /// 1-based rank within the modality's result list.
    pub rank: usize,
}

/// A fused, post-processed search hit as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub path: String,
    pub language: Language,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub symbols: Vec<String>,
    pub final_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sparse_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dense_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rerank_rank: Option<usize>,
}

impl SearchResult {
    /// Lift a single-modality hit into a result with no fusion metadata.
    pub fn from_hit(hit: Hit) -> Self {
        SearchResult {
            doc_id: hit.doc_id,
            path: hit.path,
            language: hit.language,
            start_line: hit.start_line,
            end_line: hit.end_line,
            content: hit.content,
            symbols: hit.symbols,
            final_score: hit.score,
            sparse_score: None,
            dense_score: None,
            sparse_rank: None,
            dense_rank: None,
            rerank_score: None,
            rerank_rank: None,
        }
    }
}

/// Metadata filter applied to a search.
///
/// `path_contains` is substring-contains; `languages` is an IN-set. The two
/// compose with AND. Note this is deliberately different from prefix
/// deletion, which is prefix-anchored.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub path_contains: Option<String>,
    pub languages: Option<Vec<Language>>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path_contains(mut self, fragment: impl Into<String>) -> Self {
        self.path_contains = Some(fragment.into());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.languages.get_or_insert_with(Vec::new).push(language);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.path_contains.is_none() && self.languages.is_none()
    }

    /// Evaluate the filter against one hit's metadata.
    pub fn matches(&self, path: &str, language: Language) -> bool {
        if let Some(ref fragment) = self.path_contains {
            if !path.contains(fragment.as_str()) {
                return false;
            }
        }
        if let Some(ref langs) = self.languages {
            if !langs.contains(&language) {
                return false;
            }
        }
        true
    }
}

/// Lexical index statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LexicalStats {
    pub num_docs: u64,
    pub num_segments: u64,
}

/// One entry of a rerank response; `index` points into the request's
/// document list (the service does not guarantee sorted results).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankEntry {
    pub index: usize,
    pub score: f32,
}

/// A chunk plus its embeddings, ready for a vector-store upsert.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub chunk: Chunk,
    pub dense: Vec<f32>,
    pub sparse: Option<SparseWeights>,
}
