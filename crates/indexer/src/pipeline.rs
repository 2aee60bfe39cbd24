//! The indexing pipeline.
//!
//! `index` classifies incoming files against the tracker, chunks what
//! changed, and enqueues durable jobs: stale-chunk deletes and the lexical
//! write on the store's queue (FIFO guarantees the delete lands first), the
//! embedding + vector write on the global queue. Nothing in the synchronous
//! path talks to a backend; once a job is accepted it retries until it
//! succeeds and only the embedding worker commits the tracker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use quarry_chunker::Chunker;
use quarry_core::{
    Chunk, Error, InferenceService, LexicalIndex, Result, VectorIndex, VectorRecord,
};

use crate::manager::QueueManager;
use crate::queue::{DeleteTarget, FileCommit, Job, JobHandler, JobPayload};
use crate::tracker::{content_hash, FileTracker};

/// One file handed to the pipeline.
#[derive(Debug, Clone)]
pub struct FileDocument {
    pub path: String,
    pub content: String,
}

impl FileDocument {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// What an `index` call did, before the queues run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReceipt {
    pub new_files: usize,
    pub changed_files: usize,
    pub unchanged_files: usize,
    pub skipped_files: usize,
    pub chunks: usize,
    pub delete_jobs: Vec<String>,
    pub lexical_job: Option<String>,
    pub embed_job: Option<String>,
}

/// Worker body for the per-store lexical queues: index writes and deletes.
pub struct LexicalJobHandler {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    tracker: Arc<FileTracker>,
}

impl LexicalJobHandler {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        tracker: Arc<FileTracker>,
    ) -> Self {
        Self {
            lexical,
            vector,
            tracker,
        }
    }
}

#[async_trait]
impl JobHandler for LexicalJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::Index { store, chunks } => self.lexical.index(store, chunks).await,

            JobPayload::Delete { store, target } => match target {
                DeleteTarget::Paths(paths) => {
                    // Collect owned chunk ids before untracking; the vector
                    // store is keyed by them.
                    let mut chunk_ids = Vec::new();
                    for path in paths {
                        chunk_ids.extend(self.tracker.chunk_ids(store, path)?);
                    }
                    self.lexical.delete_paths(store, paths).await?;
                    if !chunk_ids.is_empty() {
                        self.vector.delete_by_doc_ids(store, &chunk_ids).await?;
                    }
                    for path in paths {
                        self.tracker.untrack(store, path)?;
                    }
                    Ok(())
                }
                DeleteTarget::Prefix(prefix) => {
                    self.lexical.delete_by_path_prefix(store, prefix).await?;
                    self.vector.delete_by_path_prefix(store, prefix).await?;
                    self.tracker.untrack_by_prefix(store, prefix)?;
                    Ok(())
                }
                DeleteTarget::DocIds(doc_ids) => {
                    self.lexical.delete_doc_ids(store, doc_ids).await?;
                    self.vector.delete_by_doc_ids(store, doc_ids).await?;
                    Ok(())
                }
            },

            JobPayload::Embed { .. } => Err(Error::Internal(
                "embedding job routed to a lexical queue".into(),
            )),
        }
    }
}

/// Worker body for the global embedding queue: embed every chunk, commit
/// vector batches, then commit the tracker. Any failure fails the whole
/// job; the queue re-runs it from the start.
pub struct EmbedJobHandler {
    inference: Arc<dyn InferenceService>,
    vector: Arc<dyn VectorIndex>,
    tracker: Arc<FileTracker>,
    hybrid: bool,
    embed_deadline: Duration,
    upsert_batch: usize,
}

impl EmbedJobHandler {
    pub fn new(
        inference: Arc<dyn InferenceService>,
        vector: Arc<dyn VectorIndex>,
        tracker: Arc<FileTracker>,
        hybrid: bool,
        embed_deadline: Duration,
        upsert_batch: usize,
    ) -> Self {
        Self {
            inference,
            vector,
            tracker,
            hybrid,
            embed_deadline,
            upsert_batch,
        }
    }
}

#[async_trait]
impl JobHandler for EmbedJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        let JobPayload::Embed {
            store,
            chunks,
            files,
        } = &job.payload
        else {
            return Err(Error::Internal(
                "non-embedding job routed to the embedding queue".into(),
            ));
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

        let records: Vec<VectorRecord> = if self.hybrid {
            let (dense, sparse) = self.inference.embed_both(&texts, self.embed_deadline).await?;
            chunks
                .iter()
                .zip(dense.into_iter().zip(sparse.into_iter()))
                .map(|(chunk, (dense, sparse))| VectorRecord {
                    chunk: chunk.clone(),
                    dense,
                    sparse: Some(sparse),
                })
                .collect()
        } else {
            let dense = self.inference.embed_dense(&texts, self.embed_deadline).await?;
            chunks
                .iter()
                .zip(dense.into_iter())
                .map(|(chunk, dense)| VectorRecord {
                    chunk: chunk.clone(),
                    dense,
                    sparse: None,
                })
                .collect()
        };

        self.vector.create_collection(store).await?;
        for batch in records.chunks(self.upsert_batch) {
            self.vector.upsert(store, batch).await?;
        }

        // All embeddings produced and all batches committed: the tracker
        // commit is the last step so a retry re-runs everything.
        let mut ids_by_path: HashMap<&str, Vec<String>> = HashMap::new();
        for chunk in chunks {
            ids_by_path
                .entry(chunk.path.as_str())
                .or_default()
                .push(chunk.doc_id.clone());
        }
        for file in files {
            let chunk_ids = ids_by_path.remove(file.path.as_str()).unwrap_or_default();
            self.tracker
                .track_hashed(store, &file.path, file.hash.clone(), file.size, chunk_ids)?;
        }

        tracing::info!(store = %store, chunks = chunks.len(), files = files.len(), "embedding job committed");
        Ok(())
    }
}

/// Orchestrates classification, chunking and job submission.
pub struct IndexPipeline {
    chunker: Arc<Chunker>,
    tracker: Arc<FileTracker>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    manager: Arc<QueueManager>,
}

impl IndexPipeline {
    pub fn new(
        chunker: Arc<Chunker>,
        tracker: Arc<FileTracker>,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        manager: Arc<QueueManager>,
    ) -> Self {
        Self {
            chunker,
            tracker,
            lexical,
            vector,
            manager,
        }
    }

    /// Index a batch of files into `store`.
    ///
    /// Unchanged files are a no-op; re-submitting identical content is
    /// idempotent. With `force`, every file is treated as new.
    pub fn index(&self, store: &str, docs: &[FileDocument], force: bool) -> Result<IndexReceipt> {
        let pairs: Vec<(String, String)> = docs
            .iter()
            .map(|d| (d.path.clone(), d.content.clone()))
            .collect();

        let classification = if force {
            crate::tracker::FileClassification {
                new: pairs.iter().map(|(p, _)| p.clone()).collect(),
                ..Default::default()
            }
        } else {
            self.tracker.check_files(store, &pairs)?
        };

        let mut receipt = IndexReceipt {
            new_files: classification.new.len(),
            changed_files: classification.changed.len(),
            unchanged_files: classification.unchanged.len(),
            ..Default::default()
        };

        let to_index: std::collections::HashSet<&str> = classification
            .new
            .iter()
            .chain(classification.changed.iter())
            .map(String::as_str)
            .collect();
        let changed: std::collections::HashSet<&str> = classification
            .changed
            .iter()
            .map(String::as_str)
            .collect();

        let mut all_chunks: Vec<Chunk> = Vec::new();
        let mut commits: Vec<FileCommit> = Vec::new();

        for doc in docs {
            if !to_index.contains(doc.path.as_str()) {
                continue;
            }

            let chunks = self.chunker.chunk_file(&doc.path, &doc.content);
            if chunks.is_empty() {
                // Binary or empty content.
                receipt.skipped_files += 1;
                continue;
            }

            if changed.contains(doc.path.as_str()) {
                let old_ids = self.tracker.chunk_ids(store, &doc.path)?;
                let new_ids: std::collections::HashSet<&str> =
                    chunks.iter().map(|c| c.doc_id.as_str()).collect();
                let stale: Vec<String> = old_ids
                    .into_iter()
                    .filter(|id| !new_ids.contains(id.as_str()))
                    .collect();
                if !stale.is_empty() {
                    let job = self
                        .manager
                        .enqueue_store(store, JobPayload::Delete {
                            store: store.to_string(),
                            target: DeleteTarget::DocIds(stale),
                        })?;
                    receipt.delete_jobs.push(job);
                }
            }

            commits.push(FileCommit {
                path: doc.path.clone(),
                hash: content_hash(&doc.content),
                size: doc.content.len() as u64,
            });
            all_chunks.extend(chunks);
        }

        if all_chunks.is_empty() {
            return Ok(receipt);
        }
        receipt.chunks = all_chunks.len();

        let lexical_job = self.manager.enqueue_store(
            store,
            JobPayload::Index {
                store: store.to_string(),
                chunks: all_chunks.clone(),
            },
        )?;
        receipt.lexical_job = Some(lexical_job);

        let embed_job = self.manager.enqueue_embed(JobPayload::Embed {
            store: store.to_string(),
            chunks: all_chunks,
            files: commits,
        })?;
        receipt.embed_job = Some(embed_job);

        tracing::info!(
            store,
            new = receipt.new_files,
            changed = receipt.changed_files,
            unchanged = receipt.unchanged_files,
            chunks = receipt.chunks,
            "index request accepted"
        );
        Ok(receipt)
    }

    /// Enqueue deletion of explicit paths.
    pub fn delete_paths(&self, store: &str, paths: Vec<String>) -> Result<String> {
        self.manager.enqueue_store(
            store,
            JobPayload::Delete {
                store: store.to_string(),
                target: DeleteTarget::Paths(paths),
            },
        )
    }

    /// Enqueue prefix-anchored deletion.
    pub fn delete_prefix(&self, store: &str, prefix: String) -> Result<String> {
        self.manager.enqueue_store(
            store,
            JobPayload::Delete {
                store: store.to_string(),
                target: DeleteTarget::Prefix(prefix),
            },
        )
    }

    /// Remove tracked files that no longer exist. Returns how many paths
    /// were scheduled for removal.
    pub fn sync(&self, store: &str, current_paths: &[String]) -> Result<usize> {
        let deleted = self.tracker.find_deleted(store, current_paths)?;
        let removed = deleted.len();
        if !deleted.is_empty() {
            self.manager.enqueue_store(
                store,
                JobPayload::Delete {
                    store: store.to_string(),
                    target: DeleteTarget::Paths(deleted),
                },
            )?;
        }
        Ok(removed)
    }

    /// Drop all indexed state for the store, then run a fresh index pass.
    pub async fn reindex(&self, store: &str, docs: &[FileDocument]) -> Result<IndexReceipt> {
        self.vector.drop_collection(store).await?;
        self.lexical.drop_store(store).await?;
        self.tracker.clear(store)?;
        self.index(store, docs, true)
    }
}
