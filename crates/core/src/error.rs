//! Error taxonomy shared across the engine.
//!
//! Errors are classified by *kind*, not by origin: every backend crate maps
//! its own failures into one of these variants so that callers can apply a
//! uniform propagation policy (empty result, fail-open, retry via the queue,
//! or surface).

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A store, collection, index or path does not exist. Ordinary on the
    /// search path (maps to an empty result), noteworthy on writes.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller passed something invalid. Never enqueued, never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An external collaborator (inference service, vector store, lexical
    /// index) failed. The job queue is the retry authority for these on the
    /// indexing path; search callers fail fast.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A network operation exceeded its deadline. Treated as `Upstream`
    /// except for the reranker, which fails open.
    #[error("timeout after {ms}ms: {operation}")]
    Timeout { operation: String, ms: u64 },

    /// An internal invariant was violated. Logged with context, surfaced,
    /// never retried silently.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a search leg may treat this as "no data" rather than a
    /// failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn timeout(operation: impl Into<String>, ms: u64) -> Self {
        Error::Timeout {
            operation: operation.into(),
            ms,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
