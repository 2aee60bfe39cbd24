//! File tracking, durable job queues and the indexing pipeline.
//!
//! Writes to the search indices never happen inline: the pipeline enqueues
//! durable jobs and per-store workers apply them in accepted order with
//! infinite retry. The tracker is committed by the embedding worker only
//! after every batch has landed, so partial failure always re-runs from a
//! consistent state.

pub mod manager;
pub mod pipeline;
pub mod queue;
pub mod tracker;

pub use manager::QueueManager;
pub use pipeline::{
    EmbedJobHandler, FileDocument, IndexPipeline, IndexReceipt, LexicalJobHandler,
};
pub use queue::{
    spawn_worker, DeleteTarget, FileCommit, FileSubstrate, Job, JobHandler, JobPayload, JobQueue,
    QueueCounts, QueueDocument, QueueSubstrate,
};
pub use tracker::{content_hash, FileClassification, FileTracker};
