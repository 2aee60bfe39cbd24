//! Queue ownership and worker lifecycle.
//!
//! One manager per process owns every queue handle. Store queues are opened
//! lazily on first touch; when the process role is `Processor` each store
//! queue gets exactly one worker (the single-writer guarantee) and the
//! global embedding queue gets `embed_concurrency` workers at startup.
//! `ClientOnly` processes enqueue but never drain.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use quarry_config::{ProcessorRole, QueueConfig};
use quarry_core::Result;

use crate::queue::{
    spawn_worker, JobHandler, JobPayload, JobQueue, QueueCounts, QueueSubstrate,
};

const EMBED_QUEUE: &str = "embedding";

pub struct QueueManager {
    substrate: Arc<dyn QueueSubstrate>,
    config: QueueConfig,
    lexical_handler: Arc<dyn JobHandler>,
    embed_handler: Arc<dyn JobHandler>,
    store_queues: DashMap<String, Arc<JobQueue>>,
    embed_queue: Arc<JobQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl QueueManager {
    pub fn new(
        substrate: Arc<dyn QueueSubstrate>,
        config: QueueConfig,
        lexical_handler: Arc<dyn JobHandler>,
        embed_handler: Arc<dyn JobHandler>,
    ) -> Result<Arc<Self>> {
        let embed_queue = Arc::new(JobQueue::open(
            EMBED_QUEUE,
            substrate.clone(),
            config.clone(),
        )?);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Arc::new(Self {
            substrate,
            config,
            lexical_handler,
            embed_handler,
            store_queues: DashMap::new(),
            embed_queue,
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
            shutdown_rx,
        });

        if manager.config.role == ProcessorRole::Processor {
            let mut workers = manager.workers.lock();
            for _ in 0..manager.config.embed_concurrency {
                workers.push(spawn_worker(
                    manager.embed_queue.clone(),
                    manager.embed_handler.clone(),
                    manager.shutdown_rx.clone(),
                ));
            }
        }

        Ok(manager)
    }

    /// Lazily open a store's lexical queue, spawning its single worker on
    /// first touch when this process is the processor.
    fn store_queue(&self, store: &str) -> Result<Arc<JobQueue>> {
        match self.store_queues.entry(store.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let queue = Arc::new(JobQueue::open(
                    format!("lexical-{store}"),
                    self.substrate.clone(),
                    self.config.clone(),
                )?);
                if self.config.role == ProcessorRole::Processor {
                    self.workers.lock().push(spawn_worker(
                        queue.clone(),
                        self.lexical_handler.clone(),
                        self.shutdown_rx.clone(),
                    ));
                }
                entry.insert(queue.clone());
                Ok(queue)
            }
        }
    }

    /// Enqueue onto a store's lexical queue.
    pub fn enqueue_store(&self, store: &str, payload: JobPayload) -> Result<String> {
        self.store_queue(store)?.enqueue(payload)
    }

    /// Enqueue onto the global embedding queue.
    pub fn enqueue_embed(&self, payload: JobPayload) -> Result<String> {
        self.embed_queue.enqueue(payload)
    }

    pub fn store_counts(&self, store: &str) -> Result<QueueCounts> {
        Ok(self.store_queue(store)?.counts())
    }

    pub fn embed_counts(&self) -> QueueCounts {
        self.embed_queue.counts()
    }

    /// Stop all workers. In-flight jobs finish; anything pending stays
    /// durable for the next start.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }
}
