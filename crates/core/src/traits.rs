//! Backend contracts.
//!
//! The engine is an orchestration layer: BM25 ranking, vector similarity and
//! model inference are all delegated. These traits are the entire surface the
//! rest of the code is written against, which is also what makes the query
//! and indexing pipelines testable with in-memory fakes.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Chunk, Hit, LexicalStats, RerankEntry, SearchFilter, SparseWeights, VectorRecord,
};

/// Contract for the lexical BM25 index.
///
/// Missing-index policy: `search` on a store that was never written returns
/// empty; the index is created on the first successful write. Writes for a
/// given store are serialized by the job queue, implementations only need to
/// be internally consistent.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn index(&self, store: &str, chunks: &[Chunk]) -> Result<()>;

    async fn search(
        &self,
        store: &str,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>>;

    async fn delete_paths(&self, store: &str, paths: &[String]) -> Result<()>;

    async fn delete_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()>;

    /// Prefix-anchored: removes documents whose path starts with `prefix`.
    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()>;

    async fn stats(&self, store: &str) -> Result<LexicalStats>;

    /// Drop the store's index entirely. No-op when it never existed.
    async fn drop_store(&self, store: &str) -> Result<()>;
}

/// Contract for the vector database.
///
/// A store maps to a dense collection and, in hybrid mode, a second
/// collection carrying both dense and sparse vectors. Upsert semantics are
/// delete-then-insert on `doc_id`.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn create_collection(&self, store: &str) -> Result<()>;

    async fn drop_collection(&self, store: &str) -> Result<()>;

    async fn collection_exists(&self, store: &str) -> Result<bool>;

    async fn upsert(&self, store: &str, records: &[VectorRecord]) -> Result<()>;

    async fn delete_by_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()>;

    /// Prefix-anchored, matching the lexical contract.
    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()>;

    async fn search(
        &self,
        store: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>>;

    /// Server-side fused dense+sparse search. Only meaningful in hybrid
    /// mode; implementations without a hybrid collection return `NotFound`.
    async fn hybrid_search(
        &self,
        store: &str,
        query_dense: &[f32],
        query_sparse: &SparseWeights,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>>;

    async fn count(&self, store: &str) -> Result<u64>;

    /// Reachability probe for the backing database.
    async fn health(&self) -> bool;
}

/// Contract for the external embedding / rerank service.
///
/// No internal retries: the job queue owns retry policy on the indexing
/// path, and search callers decide their own fallback. `deadline` is a hard
/// per-call deadline; exceeding it yields `Error::Timeout`.
#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn embed_dense(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>>;

    async fn embed_sparse(&self, texts: &[String], deadline: Duration)
        -> Result<Vec<SparseWeights>>;

    /// Single-call optimization producing both modalities.
    async fn embed_both(
        &self,
        texts: &[String],
        deadline: Duration,
    ) -> Result<(Vec<Vec<f32>>, Vec<SparseWeights>)>;

    /// Scores are returned with an `index` into `documents`; the response is
    /// not guaranteed sorted.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankEntry>>;

    async fn health(&self) -> bool;

    /// Lifetime embedding-cache hits, for per-query cache-hit telemetry.
    /// Implementations without a cache report 0.
    fn embedding_cache_hits(&self) -> u64 {
        0
    }
}
