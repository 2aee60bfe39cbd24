//! Core types and backend traits for the quarry search engine.
//!
//! This crate provides the foundational pieces used across all other crates:
//! - The shared data model (chunks, stores, tracked files, search results)
//! - Backend contracts ([`LexicalIndex`], [`VectorIndex`], [`InferenceService`])
//! - The engine-wide error taxonomy
//! - Language tagging and stable hashing

pub mod error;
pub mod hash;
pub mod language;
#[cfg(feature = "testing")]
pub mod testing;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use hash::fnv1a32;
pub use language::Language;
pub use traits::{InferenceService, LexicalIndex, VectorIndex};
pub use types::{
    Chunk, Hit, LexicalStats, RerankEntry, SearchFilter, SearchResult, SparseWeights, Store,
    TrackedFile, VectorRecord,
};
