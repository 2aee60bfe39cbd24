//! Durable FIFO job queues with retry-until-success.
//!
//! Two queue families share this machinery: one queue per store for lexical
//! index writes (worker concurrency 1, which is what serializes writers per
//! store) and one global queue for embedding + vector-store writes (worker
//! concurrency 2).
//!
//! Durability: every mutation persists the full queue document through a
//! [`QueueSubstrate`] (atomic file replace by default), so jobs survive
//! restarts. A job observed `active` at open time was interrupted mid-run
//! and is put back at the front of the pending list.
//!
//! Retry: a failed job is re-enqueued at lower priority with delay
//! `min(base · 2^(attempt−1), max)`; the re-enqueue itself is retried with
//! the same backoff until it lands. Jobs are never dropped. Newer
//! normal-priority work may overtake a retrying job.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use quarry_config::QueueConfig;
use quarry_core::{Chunk, Error, Result};

/// What a delete job removes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeleteTarget {
    Paths(Vec<String>),
    /// Prefix-anchored.
    Prefix(String),
    DocIds(Vec<String>),
}

/// Tracker commit data carried by an embedding job: the worker no longer
/// holds file contents by the time embeddings land.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCommit {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobPayload {
    /// Lexical family: write chunks to the BM25 index.
    Index { store: String, chunks: Vec<Chunk> },
    /// Lexical family: remove from both indices and untrack.
    Delete { store: String, target: DeleteTarget },
    /// Embedding family: embed, upsert vectors, then commit the tracker.
    Embed {
        store: String,
        chunks: Vec<Chunk>,
        files: Vec<FileCommit>,
    },
}

impl JobPayload {
    pub fn store(&self) -> &str {
        match self {
            JobPayload::Index { store, .. }
            | JobPayload::Delete { store, .. }
            | JobPayload::Embed { store, .. } => store,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::Index { .. } => "index",
            JobPayload::Delete { .. } => "delete",
            JobPayload::Embed { .. } => "embed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    /// Completed execution attempts; monotonic.
    pub attempt: u32,
    /// True once the job has failed at least once; retrying jobs yield to
    /// fresh work.
    pub retry: bool,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest execution time for retries.
    pub not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedJob {
    pub id: String,
    pub store: String,
    pub kind: String,
    pub attempt: u32,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job_id: String,
    pub store: String,
    pub kind: String,
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Full persisted state of one queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueDocument {
    pub pending: VecDeque<Job>,
    pub active: Vec<Job>,
    pub completed: VecDeque<CompletedJob>,
    pub failures: Vec<FailureRecord>,
}

/// Persistence for queue documents.
pub trait QueueSubstrate: Send + Sync + 'static {
    fn load(&self, queue: &str) -> Result<Option<QueueDocument>>;
    fn save(&self, queue: &str, document: &QueueDocument) -> Result<()>;
}

/// File-per-queue substrate with atomic replace.
pub struct FileSubstrate {
    dir: PathBuf,
}

impl FileSubstrate {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Internal(format!("queue: create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{queue}.json"))
    }
}

impl QueueSubstrate for FileSubstrate {
    fn load(&self, queue: &str) -> Result<Option<QueueDocument>> {
        let path = self.path(queue);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::Internal(format!("queue: read {}: {e}", path.display())))?;
        let document = serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("queue: parse {}: {e}", path.display())))?;
        Ok(Some(document))
    }

    fn save(&self, queue: &str, document: &QueueDocument) -> Result<()> {
        let raw = serde_json::to_vec(document)
            .map_err(|e| Error::Internal(format!("queue: serialize {queue}: {e}")))?;
        let path = self.path(queue);
        let tmp = self.dir.join(format!(".{queue}.json.tmp"));
        fs::write(&tmp, raw)
            .map_err(|e| Error::Internal(format!("queue: write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Internal(format!("queue: rename {}: {e}", path.display())))?;
        Ok(())
    }
}

/// Counts for observability.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failures: usize,
}

/// One durable FIFO queue.
pub struct JobQueue {
    name: String,
    substrate: Arc<dyn QueueSubstrate>,
    config: QueueConfig,
    state: Mutex<QueueDocument>,
    notify: Notify,
}

impl JobQueue {
    /// Open (or create) a queue, recovering interrupted jobs: anything that
    /// was active when the process died goes back to the front of pending
    /// in its original order.
    pub fn open(
        name: impl Into<String>,
        substrate: Arc<dyn QueueSubstrate>,
        config: QueueConfig,
    ) -> Result<Self> {
        let name = name.into();
        let mut document = substrate.load(&name)?.unwrap_or_default();

        if !document.active.is_empty() {
            tracing::info!(
                queue = %name,
                interrupted = document.active.len(),
                "recovering interrupted jobs"
            );
            for job in document.active.drain(..).rev() {
                document.pending.push_front(job);
            }
            substrate.save(&name, &document)?;
        }

        Ok(Self {
            name,
            substrate,
            config,
            state: Mutex::new(document),
            notify: Notify::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let ms = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Accept a job. The enqueue is durable before this returns.
    pub fn enqueue(&self, payload: JobPayload) -> Result<String> {
        let job = Job {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            attempt: 0,
            retry: false,
            enqueued_at: Utc::now(),
            not_before: None,
        };
        let id = job.id.clone();

        {
            let mut state = self.state.lock();
            state.pending.push_back(job);
            self.substrate.save(&self.name, &state)?;
        }

        self.notify.notify_one();
        Ok(id)
    }

    /// Index of the next runnable job: fresh work first, then due retries.
    fn pick_ready(pending: &VecDeque<Job>, now: DateTime<Utc>) -> Option<usize> {
        if let Some(pos) = pending.iter().position(|j| !j.retry) {
            return Some(pos);
        }
        pending
            .iter()
            .position(|j| j.not_before.map_or(true, |t| t <= now))
    }

    /// Time until the earliest retry becomes due.
    fn next_due(pending: &VecDeque<Job>, now: DateTime<Utc>) -> Option<Duration> {
        pending
            .iter()
            .filter_map(|j| j.not_before)
            .map(|t| (t - now).to_std().unwrap_or(Duration::ZERO))
            .min()
    }

    /// Wait for and claim the next runnable job.
    pub async fn next_ready(&self) -> Job {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Utc::now();
                if let Some(pos) = Self::pick_ready(&state.pending, now) {
                    if let Some(job) = state.pending.remove(pos) {
                        state.active.push(job.clone());
                        if let Err(e) = self.substrate.save(&self.name, &state) {
                            // The pending copy on disk still holds the job;
                            // a crash now only means a duplicate run.
                            tracing::warn!(queue = %self.name, error = %e, "failed to persist claim");
                        }
                        return job;
                    }
                }
                Self::next_due(&state.pending, now)
            };

            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(delay.max(Duration::from_millis(10))) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark a claimed job done. Completed history is bounded.
    pub fn complete(&self, job: &Job) {
        let mut state = self.state.lock();
        state.active.retain(|j| j.id != job.id);
        state.completed.push_back(CompletedJob {
            id: job.id.clone(),
            store: job.payload.store().to_string(),
            kind: job.payload.kind().to_string(),
            attempt: job.attempt,
            completed_at: Utc::now(),
        });
        while state.completed.len() > self.config.completed_retention {
            state.completed.pop_front();
        }
        if let Err(e) = self.substrate.save(&self.name, &state) {
            tracing::warn!(queue = %self.name, error = %e, "failed to persist completion");
        }
    }

    /// Record a failure and re-enqueue at lower priority with backoff.
    /// The re-enqueue persists before returning, retried with the same
    /// backoff for as long as it takes: jobs are never dropped.
    pub async fn fail(&self, mut job: Job, error: &Error) {
        job.attempt += 1;
        let delay = self.backoff(job.attempt);
        job.retry = true;
        job.not_before = Some(
            Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30)),
        );

        tracing::warn!(
            queue = %self.name,
            job = %job.id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "job failed, re-enqueueing"
        );

        loop {
            let saved = {
                let mut state = self.state.lock();
                state.active.retain(|j| j.id != job.id);
                // Failures are retained indefinitely for observability.
                state.failures.push(FailureRecord {
                    job_id: job.id.clone(),
                    store: job.payload.store().to_string(),
                    kind: job.payload.kind().to_string(),
                    attempt: job.attempt,
                    error: error.to_string(),
                    failed_at: Utc::now(),
                });
                state.pending.push_back(job.clone());
                self.substrate.save(&self.name, &state)
            };
            match saved {
                Ok(()) => break,
                Err(e) => {
                    tracing::error!(queue = %self.name, error = %e, "re-enqueue persist failed, retrying");
                    // Roll back the in-memory copy so the retry loop does
                    // not accumulate duplicates.
                    {
                        let mut state = self.state.lock();
                        state.pending.retain(|j| j.id != job.id);
                        state.failures.pop();
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }

        self.notify.notify_one();
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.state.lock();
        QueueCounts {
            pending: state.pending.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            failures: state.failures.len(),
        }
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.state.lock().failures.clone()
    }
}

/// Work executed by queue workers.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &Job) -> Result<()>;
}

/// Run one worker loop until shutdown flips.
pub fn spawn_worker(
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let job = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                job = queue.next_ready() => job,
            };

            tracing::debug!(queue = %queue.name(), job = %job.id, kind = job.payload.kind(), "job start");
            match handler.handle(&job).await {
                Ok(()) => queue.complete(&job),
                Err(e) => queue.fail(job, &e).await,
            }
        }
    })
}
