//! The query pipeline: normalize → classify → fan-out → fuse → rerank →
//! post-rank.
//!
//! Every stage is a standalone piece operating on in-memory lists; the
//! engine crate wires them together and records telemetry. Stages only
//! touch the backend contracts in `quarry-core`, never concrete adapters,
//! so the whole pipeline runs against in-memory fakes in tests.

pub mod classifier;
pub mod coordinator;
pub mod fusion;
pub mod postrank;
pub mod reranker;

pub use classifier::{cache_key, classify, normalize, Classification, QueryType, Signals};
pub use coordinator::{QueryVectors, RetrievalOutput, RetrieverCoordinator};
pub use fusion::{Fuser, FusionOutcome};
pub use postrank::{dedupe_by_path, display_percent};
pub use reranker::{Reranker, RerankMetrics, RerankReport, RerankStatus};
