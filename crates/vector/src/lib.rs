//! Qdrant-backed vector store adapter.
//!
//! Implements the [`quarry_core::VectorIndex`] contract: collection
//! lifecycle with a TTL'd existence cache, idempotent upserts keyed by
//! `doc_id`, prefix-anchored deletion, filtered dense search, and
//! server-side RRF hybrid search over a dense + sparse collection.

pub mod qdrant;
pub mod sparse;

pub use qdrant::QdrantVectorIndex;
pub use sparse::encode_sparse;
