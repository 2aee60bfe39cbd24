//! Centralized constants and tuning defaults.
//!
//! This module is the single source of truth for engine-wide defaults.
//! Everything here is deployment-agnostic tuning; per-deployment values
//! (endpoints, data directories, the dense dimension) live in `Settings`
//! and may be overridden by config files or environment variables.

/// Service endpoints (env vars with fallback defaults).
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Embedding / rerank inference service (env: QUARRY_INFERENCE_URL).
    pub static INFERENCE_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QUARRY_INFERENCE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string())
    });

    /// Vector store gRPC endpoint (env: QUARRY_QDRANT_URL).
    pub static QDRANT_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("QUARRY_QDRANT_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
    });
}

/// Outbound-call deadlines. Every network operation has one.
pub mod timeouts {
    /// Query-time embedding (s).
    pub const EMBED_QUERY_SECS: u64 = 30;

    /// Indexing-batch embedding (s). Large batches against a busy service.
    pub const EMBED_INDEX_SECS: u64 = 300;

    /// Query-time rerank (ms). Missing it fails open, so it is tight.
    pub const RERANK_MS: u64 = 100;

    /// Vector-store operations (s).
    pub const VECTOR_OP_SECS: u64 = 30;

    /// Health probes (s).
    pub const HEALTH_SECS: u64 = 5;
}

/// Retrieval and fusion tuning.
pub mod fusion {
    /// Reciprocal rank fusion constant.
    pub const RRF_K: f32 = 60.0;

    /// Base modality weights. Must sum to 1.
    pub const SPARSE_WEIGHT: f32 = 0.5;
    pub const DENSE_WEIGHT: f32 = 0.5;

    /// Candidates fetched per modality before fusion.
    pub const SPARSE_TOP_K: usize = 200;
    pub const DENSE_TOP_K: usize = 80;

    /// Multiplier per matched query symbol, applied up to three times.
    pub const SYMBOL_BOOST: f32 = 1.5;

    /// Multiplier when a path-like query fragment appears in the hit's path.
    pub const PATH_BOOST: f32 = 1.2;

    /// Top-20 overlap ratio above which both modalities get an overlap bonus.
    pub const OVERLAP_THRESHOLD: f32 = 0.3;

    /// Confidence-weighted adjustment: cap on the per-modality weight shift
    /// (upper bound is `weight * MAX_BOOST`) and floor on any weight.
    pub const MAX_BOOST: f32 = 1.5;
    pub const MIN_WEIGHT: f32 = 0.1;
}

/// Reranker tuning.
pub mod rerank {
    /// How many fused candidates are sent to the cross-encoder.
    pub const CANDIDATES: usize = 20;

    /// Top-1 dominance ratio above which reranking is skipped.
    pub const DOMINANT_TOP_RATIO: f32 = 3.0;

    /// Queries shorter than this (trimmed chars) are not reranked.
    pub const MIN_QUERY_CHARS: usize = 3;
}

/// Job-queue behavior.
pub mod queue {
    /// First retry delay (ms); doubles per attempt.
    pub const BASE_BACKOFF_MS: u64 = 2_000;

    /// Backoff ceiling (ms).
    pub const MAX_BACKOFF_MS: u64 = 30_000;

    /// Completed jobs retained per queue for observability.
    pub const COMPLETED_RETENTION: usize = 100;

    /// Global embedding-queue worker concurrency.
    pub const EMBED_CONCURRENCY: usize = 2;

    /// Vector-store upsert sub-batch size per commit.
    pub const UPSERT_BATCH: usize = 3_000;
}

/// Chunker limits.
pub mod chunker {
    /// Files above this size skip AST parsing and take the line route.
    pub const MAX_AST_BYTES: usize = 500 * 1024;

    /// Line-based fallback window and overlap.
    pub const MAX_CHUNK_LINES: usize = 100;
    pub const OVERLAP_LINES: usize = 5;

    /// AST chunks shorter than this merge into the previous chunk.
    pub const MIN_AST_CHUNK_LINES: usize = 10;

    /// Binary sniffing: bytes inspected and non-printable tolerance.
    pub const BINARY_SNIFF_BYTES: usize = 8_000;
    pub const BINARY_NONPRINT_RATIO: f64 = 0.10;
}

/// Cache sizing.
pub mod cache {
    pub const EMBEDDING_CAPACITY: usize = 1_000;
    pub const SPARSE_CAPACITY: usize = 500;
    pub const RERANK_CAPACITY: usize = 500;
    pub const TTL_SECS: u64 = 3_600;

    /// Collection-existence cache TTL (s).
    pub const COLLECTION_EXISTS_TTL_SECS: u64 = 300;
}

/// Telemetry sizing.
pub mod telemetry {
    pub const RING_CAPACITY: usize = 10_000;
}
