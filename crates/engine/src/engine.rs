//! The engine facade.
//!
//! Owns the backends, the queue manager, the query pipeline stages and the
//! stores registry, and exposes the operations an outer service layer
//! calls: store lifecycle, indexing, deletion, sync, search, health and
//! version. Each operation returns structured results plus elapsed time.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use quarry_chunker::Chunker;
use quarry_config::Settings;
use quarry_core::{
    Error, InferenceService, LexicalIndex, LexicalStats, Result, SearchFilter, SearchResult,
    VectorIndex,
};
use quarry_indexer::{
    EmbedJobHandler, FileDocument, FileSubstrate, FileTracker, IndexPipeline, IndexReceipt,
    LexicalJobHandler, QueueCounts, QueueManager,
};
use quarry_inference::InferenceClient;
use quarry_lexical::TantivyLexicalIndex;
use quarry_query::{
    classify, dedupe_by_path, display_percent, normalize, Fuser, QueryVectors, Reranker,
    RerankReport, RerankStatus, RetrieverCoordinator,
};
use quarry_telemetry::{QueryRecord, ScoreStats, Telemetry};
use quarry_vector::QdrantVectorIndex;

use crate::registry::StoresRegistry;

/// A search request from the service surface.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub store: String,
    pub top_k: Option<usize>,
    pub filter: Option<SearchFilter>,
    pub enable_reranking: Option<bool>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, store: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            store: store.into(),
            top_k: None,
            filter: None,
            enable_reranking: None,
        }
    }
}

/// One hit as shown to users: the fused result plus its display score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedHit {
    #[serde(flatten)]
    pub result: SearchResult,
    pub display_score: u8,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub request_id: String,
    pub results: Vec<RankedHit>,
    pub query_type: String,
    pub classification_confidence: f32,
    pub reranked: bool,
    pub warnings: Vec<String>,
    pub total_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub store: quarry_core::Store,
    pub tracked_files: usize,
    pub lexical: LexicalStats,
    pub vector_points: u64,
    pub lexical_queue: QueueCounts,
    pub embed_queue: QueueCounts,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub inference: bool,
    pub vector_store: bool,
}

/// Deletion selector for the `delete` operation.
#[derive(Debug, Clone)]
pub enum DeleteSelector {
    Paths(Vec<String>),
    Prefix(String),
}

/// An operation's structured result plus its elapsed wall time.
#[derive(Debug, Clone, Serialize)]
pub struct Timed<T> {
    pub value: T,
    pub elapsed_ms: u64,
}

fn timed<T>(started: Instant, value: T) -> Timed<T> {
    Timed {
        value,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

pub struct Engine {
    settings: Settings,
    inference: Arc<dyn InferenceService>,
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    tracker: Arc<FileTracker>,
    pipeline: IndexPipeline,
    manager: Arc<QueueManager>,
    coordinator: RetrieverCoordinator,
    fuser: Fuser,
    reranker: Reranker,
    registry: StoresRegistry,
    telemetry: Arc<Telemetry>,
}

impl Engine {
    /// Wire the engine over explicit backends. This is also the test
    /// entrypoint: hand in in-memory fakes and the full pipeline runs
    /// without any external service.
    pub fn with_backends(
        settings: Settings,
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        inference: Arc<dyn InferenceService>,
    ) -> Result<Self> {
        settings
            .validate()
            .map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let tracker = Arc::new(FileTracker::new(settings.storage.tracking_dir())?);
        let substrate = Arc::new(FileSubstrate::new(settings.storage.queue_dir())?);

        let lexical_handler = Arc::new(LexicalJobHandler::new(
            lexical.clone(),
            vector.clone(),
            tracker.clone(),
        ));
        let embed_handler = Arc::new(EmbedJobHandler::new(
            inference.clone(),
            vector.clone(),
            tracker.clone(),
            settings.vector.hybrid,
            settings.inference.embed_index_timeout(),
            settings.queue.upsert_batch,
        ));

        let manager = QueueManager::new(
            substrate,
            settings.queue.clone(),
            lexical_handler,
            embed_handler,
        )?;

        let pipeline = IndexPipeline::new(
            Arc::new(Chunker::new(settings.chunker.clone())),
            tracker.clone(),
            lexical.clone(),
            vector.clone(),
            manager.clone(),
        );

        let coordinator = RetrieverCoordinator::new(
            lexical.clone(),
            vector.clone(),
            settings.vector.hybrid,
        );
        let fuser = Fuser::new(settings.search.clone());
        let reranker = Reranker::new(inference.clone(), settings.search.rerank.clone());
        let registry = StoresRegistry::open(settings.storage.stores_path())?;
        let telemetry = Arc::new(Telemetry::new(settings.telemetry.ring_capacity));

        Ok(Self {
            settings,
            inference,
            lexical,
            vector,
            tracker,
            pipeline,
            manager,
            coordinator,
            fuser,
            reranker,
            registry,
            telemetry,
        })
    }

    /// Wire the engine over the real backends named in `settings`.
    pub fn connect(settings: Settings) -> Result<Self> {
        let lexical: Arc<dyn LexicalIndex> = Arc::new(TantivyLexicalIndex::new(
            settings.storage.lexical_dir(),
            &settings.lexical,
        )?);
        let vector: Arc<dyn VectorIndex> = Arc::new(QdrantVectorIndex::connect(
            settings.vector.clone(),
            settings.inference.dense_dim,
        )?);
        let inference: Arc<dyn InferenceService> =
            Arc::new(InferenceClient::new(settings.inference.clone())?);
        Self::with_backends(settings, lexical, vector, inference)
    }

    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    // ------------------------------------------------------------------
    // Store lifecycle
    // ------------------------------------------------------------------

    pub async fn create_store(
        &self,
        name: &str,
        description: &str,
    ) -> Result<Timed<quarry_core::Store>> {
        let started = Instant::now();
        let store = self.registry.create(name, description)?;
        self.vector.create_collection(name).await?;
        tracing::info!(store = name, "store created");
        Ok(timed(started, store))
    }

    /// Remove a store and everything it owns: collections, lexical index,
    /// tracking state and the registry entry.
    pub async fn delete_store(&self, name: &str) -> Result<Timed<quarry_core::Store>> {
        let started = Instant::now();
        let store = self.registry.remove(name)?;
        self.vector.drop_collection(name).await?;
        self.lexical.drop_store(name).await?;
        self.tracker.clear(name)?;
        tracing::info!(store = name, "store deleted");
        Ok(timed(started, store))
    }

    pub fn list_stores(&self) -> Vec<quarry_core::Store> {
        self.registry.list()
    }

    pub async fn get_store_stats(&self, name: &str) -> Result<Timed<StoreStats>> {
        let started = Instant::now();
        let store = self.registry.get(name)?;
        let lexical = match self.lexical.stats(name).await {
            Ok(stats) => stats,
            Err(e) if e.is_not_found() => LexicalStats::default(),
            Err(e) => return Err(e),
        };
        let vector_points = match self.vector.count(name).await {
            Ok(count) => count,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        let stats = StoreStats {
            store,
            tracked_files: self.tracker.file_count(name)?,
            lexical,
            vector_points,
            lexical_queue: self.manager.store_counts(name)?,
            embed_queue: self.manager.embed_counts(),
        };
        Ok(timed(started, stats))
    }

    // ------------------------------------------------------------------
    // Indexing
    // ------------------------------------------------------------------

    pub fn index(
        &self,
        store: &str,
        docs: &[FileDocument],
        force: bool,
    ) -> Result<Timed<IndexReceipt>> {
        let started = Instant::now();
        if !self.registry.exists(store) {
            return Err(Error::NotFound(format!("store {store}")));
        }
        let receipt = self.pipeline.index(store, docs, force)?;
        self.registry.touch(store)?;
        Ok(timed(started, receipt))
    }

    pub async fn reindex(&self, store: &str, docs: &[FileDocument]) -> Result<Timed<IndexReceipt>> {
        let started = Instant::now();
        if !self.registry.exists(store) {
            return Err(Error::NotFound(format!("store {store}")));
        }
        let receipt = self.pipeline.reindex(store, docs).await?;
        self.registry.touch(store)?;
        Ok(timed(started, receipt))
    }

    pub fn delete(&self, store: &str, selector: DeleteSelector) -> Result<Timed<String>> {
        let started = Instant::now();
        if !self.registry.exists(store) {
            return Err(Error::NotFound(format!("store {store}")));
        }
        let job = match selector {
            DeleteSelector::Paths(paths) => {
                if paths.is_empty() {
                    return Err(Error::InvalidArgument("no paths given".into()));
                }
                self.pipeline.delete_paths(store, paths)?
            }
            DeleteSelector::Prefix(prefix) => {
                if prefix.is_empty() {
                    return Err(Error::InvalidArgument("empty prefix".into()));
                }
                self.pipeline.delete_prefix(store, prefix)?
            }
        };
        self.registry.touch(store)?;
        Ok(timed(started, job))
    }

    /// Reconcile against the current file listing; returns how many tracked
    /// paths were scheduled for removal.
    pub fn sync(&self, store: &str, current_paths: &[String]) -> Result<Timed<usize>> {
        let started = Instant::now();
        if !self.registry.exists(store) {
            return Err(Error::NotFound(format!("store {store}")));
        }
        let removed = self.pipeline.sync(store, current_paths)?;
        Ok(timed(started, removed))
    }

    // ------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();

        let query = normalize(&request.query);
        if query.is_empty() {
            return Err(Error::InvalidArgument("empty query".into()));
        }
        let top_k = request.top_k.unwrap_or(self.settings.search.default_limit);
        if top_k == 0 {
            return Err(Error::InvalidArgument("top_k must be positive".into()));
        }

        let classification = classify(&query);
        let mut warnings: Vec<String> = Vec::new();

        // Query embedding. Failure degrades to lexical-only retrieval.
        let embed_started = Instant::now();
        let hits_before = self.inference.embedding_cache_hits();
        let deadline = self.settings.inference.embed_query_timeout();
        let texts = vec![query.clone()];
        let vectors = if self.settings.vector.hybrid {
            match self.inference.embed_both(&texts, deadline).await {
                Ok((mut dense, mut sparse)) => QueryVectors {
                    dense: dense.pop(),
                    sparse: sparse.pop(),
                },
                Err(e) => {
                    warnings.push(format!("query embedding failed: {e}"));
                    QueryVectors::default()
                }
            }
        } else {
            match self.inference.embed_dense(&texts, deadline).await {
                Ok(mut dense) => QueryVectors {
                    dense: dense.pop(),
                    sparse: None,
                },
                Err(e) => {
                    warnings.push(format!("query embedding failed: {e}"));
                    QueryVectors::default()
                }
            }
        };
        let embed_ms = embed_started.elapsed().as_millis() as u64;
        let embed_cache_hit = self.inference.embedding_cache_hits() > hits_before;

        // Parallel fan-out.
        let retrieval = self
            .coordinator
            .retrieve(
                &request.store,
                &query,
                &vectors,
                request.filter.as_ref(),
                self.settings.search.sparse_top_k,
                self.settings.search.dense_top_k,
            )
            .await;
        let sparse_scores: Vec<f32> = retrieval.sparse.iter().map(|h| h.score).collect();
        let dense_scores: Vec<f32> = retrieval.dense.iter().map(|h| h.score).collect();
        warnings.extend(retrieval.warnings.iter().cloned());

        // Fusion.
        let fusion_started = Instant::now();
        let fused = self.fuser.fuse(&query, &retrieval.sparse, &retrieval.dense);
        let fusion_ms = fusion_started.elapsed().as_millis() as u64;
        let fused_count = fused.results.len();

        // Rerank (optional, fail-open).
        let rerank_enabled = request
            .enable_reranking
            .unwrap_or(self.settings.search.rerank.enabled);
        let (results, rerank_report) = if rerank_enabled {
            self.reranker.rerank(&query, fused.results).await
        } else {
            (
                fused.results,
                RerankReport {
                    status: RerankStatus::Disabled,
                    latency_ms: 0,
                    candidates: 0,
                },
            )
        };

        // Post-rank.
        let postrank_started = Instant::now();
        let mut results = if self.settings.search.group_by_file {
            dedupe_by_path(results)
        } else {
            results
        };
        results.truncate(top_k);
        let ranked: Vec<RankedHit> = results
            .into_iter()
            .map(|result| RankedHit {
                display_score: display_percent(result.final_score),
                result,
            })
            .collect();
        let postrank_ms = postrank_started.elapsed().as_millis() as u64;

        let total_ms = started.elapsed().as_millis() as u64;

        self.telemetry.record(QueryRecord {
            request_id: request_id.clone(),
            timestamp: chrono::Utc::now(),
            store: request.store.clone(),
            query_type: classification.query_type.as_str().to_string(),
            classification_confidence: classification.confidence,
            embed_ms,
            sparse_ms: retrieval.sparse_ms,
            dense_ms: retrieval.dense_ms,
            fusion_ms,
            rerank_ms: rerank_report.latency_ms,
            postrank_ms,
            total_ms,
            sparse_count: sparse_scores.len(),
            dense_count: dense_scores.len(),
            fused_count,
            returned_count: ranked.len(),
            sparse_stats: ScoreStats::from_scores(&sparse_scores),
            dense_stats: ScoreStats::from_scores(&dense_scores),
            embed_cache_hit,
            symbol_matches: fused.symbol_matches,
            path_boost_applied: fused.path_boost_applied,
            reranked: rerank_report.status == RerankStatus::Applied,
            rerank_timed_out: rerank_report.status == RerankStatus::TimedOut,
            warnings: warnings.len(),
        });

        Ok(SearchResponse {
            request_id,
            results: ranked,
            query_type: classification.query_type.as_str().to_string(),
            classification_confidence: classification.confidence,
            reranked: rerank_report.status == RerankStatus::Applied,
            warnings,
            total_ms,
        })
    }

    // ------------------------------------------------------------------
    // Health & shutdown
    // ------------------------------------------------------------------

    pub async fn health(&self) -> HealthReport {
        let (inference, vector_store) =
            tokio::join!(self.inference.health(), self.vector.health());
        HealthReport {
            healthy: inference && vector_store,
            inference,
            vector_store,
        }
    }

    /// Stop queue workers. Pending jobs stay durable for the next start.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    /// Queue drain check, used by tests and by graceful shutdown paths.
    pub fn queues_idle(&self, store: &str) -> Result<bool> {
        let embed = self.manager.embed_counts();
        let lexical = self.manager.store_counts(store)?;
        Ok(embed.pending == 0
            && embed.active == 0
            && lexical.pending == 0
            && lexical.active == 0)
    }

    pub fn rerank_metrics(&self) -> &quarry_query::RerankMetrics {
        self.reranker.metrics()
    }
}
