//! HTTP client for the external embedding/rerank service, plus the bounded
//! TTL'd LRU caches that front it.
//!
//! The client implements [`quarry_core::InferenceService`] and never
//! retries internally: the job queue owns retries on the indexing path,
//! search callers decide their own fallback, and the reranker fails open.

pub mod cache;
pub mod client;

pub use cache::{CacheStats, TtlLru};
pub use client::InferenceClient;
