//! Engine facade for the quarry hybrid code-search engine.
//!
//! This crate wires the chunker, tracker, queues, retrieval adapters and
//! the query pipeline into one [`Engine`] value exposing the operations an
//! outer service (HTTP, RPC, CLI) calls. Request framing, authentication
//! and transport are deliberately not here.

pub mod engine;
pub mod registry;

pub use engine::{
    DeleteSelector, Engine, HealthReport, RankedHit, SearchRequest, SearchResponse, StoreStats,
    Timed,
};
pub use registry::{validate_store_name, StoresRegistry};

/// Initialize tracing from `RUST_LOG`, defaulting to `info` for the quarry
/// crates. Safe to call once at process start.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,quarry=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
