//! Main settings tree.
//!
//! Loaded by [`load_settings`] from `config/default.toml`, an optional
//! environment-specific file, then `QUARRY_`-prefixed environment variables.
//! Every section is serde-defaulted so a missing file yields a working
//! development configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{cache, chunker, endpoints, fusion, queue, rerank, telemetry, timeouts};
use crate::ConfigError;

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// On-disk layout.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Inference service (embeddings + rerank).
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Vector store.
    #[serde(default)]
    pub vector: VectorConfig,

    /// Lexical BM25 index.
    #[serde(default)]
    pub lexical: LexicalConfig,

    /// Chunking.
    #[serde(default)]
    pub chunker: ChunkerConfig,

    /// Durable job queues.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Query pipeline.
    #[serde(default)]
    pub search: SearchConfig,

    /// Telemetry ring buffer.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// On-disk layout. Everything the engine persists lives under `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn lexical_dir(&self) -> PathBuf {
        self.data_dir.join("lexical")
    }

    pub fn tracking_dir(&self) -> PathBuf {
        self.data_dir.join("tracking")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.data_dir.join("queues")
    }

    pub fn stores_path(&self) -> PathBuf {
        self.data_dir.join("stores")
    }
}

/// Inference service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_endpoint")]
    pub endpoint: String,

    /// Dense embedding dimension. A deployment constant: validated at
    /// collection creation, mixing dimensions is refused.
    #[serde(default = "default_dense_dim")]
    pub dense_dim: usize,

    /// Ask the service for L2-normalized dense vectors.
    #[serde(default = "default_true")]
    pub normalize: bool,

    #[serde(default = "default_embed_query_timeout_secs")]
    pub embed_query_timeout_secs: u64,

    #[serde(default = "default_embed_index_timeout_secs")]
    pub embed_index_timeout_secs: u64,

    #[serde(default = "default_rerank_timeout_ms")]
    pub rerank_timeout_ms: u64,

    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_inference_endpoint() -> String {
    endpoints::INFERENCE_DEFAULT.clone()
}
fn default_dense_dim() -> usize {
    1024
}
fn default_true() -> bool {
    true
}
fn default_embed_query_timeout_secs() -> u64 {
    timeouts::EMBED_QUERY_SECS
}
fn default_embed_index_timeout_secs() -> u64 {
    timeouts::EMBED_INDEX_SECS
}
fn default_rerank_timeout_ms() -> u64 {
    timeouts::RERANK_MS
}
fn default_health_timeout_secs() -> u64 {
    timeouts::HEALTH_SECS
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_inference_endpoint(),
            dense_dim: default_dense_dim(),
            normalize: true,
            embed_query_timeout_secs: default_embed_query_timeout_secs(),
            embed_index_timeout_secs: default_embed_index_timeout_secs(),
            rerank_timeout_ms: default_rerank_timeout_ms(),
            health_timeout_secs: default_health_timeout_secs(),
            cache: CacheConfig::default(),
        }
    }
}

impl InferenceConfig {
    pub fn embed_query_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_query_timeout_secs)
    }

    pub fn embed_index_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_index_timeout_secs)
    }

    pub fn rerank_timeout(&self) -> Duration {
        Duration::from_millis(self.rerank_timeout_ms)
    }
}

/// LRU cache sizing for embeddings, sparse weights and rerank results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_embedding_capacity")]
    pub embedding_capacity: usize,
    #[serde(default = "default_sparse_capacity")]
    pub sparse_capacity: usize,
    #[serde(default = "default_rerank_capacity")]
    pub rerank_capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_embedding_capacity() -> usize {
    cache::EMBEDDING_CAPACITY
}
fn default_sparse_capacity() -> usize {
    cache::SPARSE_CAPACITY
}
fn default_rerank_capacity() -> usize {
    cache::RERANK_CAPACITY
}
fn default_cache_ttl_secs() -> u64 {
    cache::TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            embedding_capacity: default_embedding_capacity(),
            sparse_capacity: default_sparse_capacity(),
            rerank_capacity: default_rerank_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Vector store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// External store name `S` maps to collection `{prefix}{S}` (dense) and
    /// `{prefix}hybrid_{S}` (hybrid).
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Maintain hybrid collections with a sparse leg alongside dense.
    #[serde(default)]
    pub hybrid: bool,

    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u64,

    #[serde(default = "default_hnsw_ef_construction")]
    pub hnsw_ef_construction: u64,

    #[serde(default = "default_vector_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_exists_ttl_secs")]
    pub exists_cache_ttl_secs: u64,
}

fn default_qdrant_endpoint() -> String {
    endpoints::QDRANT_DEFAULT.clone()
}
fn default_collection_prefix() -> String {
    "quarry_".to_string()
}
fn default_hnsw_m() -> u64 {
    16
}
fn default_hnsw_ef_construction() -> u64 {
    200
}
fn default_vector_timeout_secs() -> u64 {
    timeouts::VECTOR_OP_SECS
}
fn default_exists_ttl_secs() -> u64 {
    cache::COLLECTION_EXISTS_TTL_SECS
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            api_key: None,
            collection_prefix: default_collection_prefix(),
            hybrid: false,
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construction: default_hnsw_ef_construction(),
            timeout_secs: default_vector_timeout_secs(),
            exists_cache_ttl_secs: default_exists_ttl_secs(),
        }
    }
}

/// Lexical index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexicalConfig {
    /// Tantivy writer heap per store index.
    #[serde(default = "default_writer_heap_bytes")]
    pub writer_heap_bytes: usize,
}

fn default_writer_heap_bytes() -> usize {
    50_000_000
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            writer_heap_bytes: default_writer_heap_bytes(),
        }
    }
}

/// Chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_max_ast_bytes")]
    pub max_ast_bytes: usize,
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    #[serde(default = "default_min_ast_chunk_lines")]
    pub min_ast_chunk_lines: usize,
}

fn default_max_ast_bytes() -> usize {
    chunker::MAX_AST_BYTES
}
fn default_max_chunk_lines() -> usize {
    chunker::MAX_CHUNK_LINES
}
fn default_overlap_lines() -> usize {
    chunker::OVERLAP_LINES
}
fn default_min_ast_chunk_lines() -> usize {
    chunker::MIN_AST_CHUNK_LINES
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_ast_bytes: default_max_ast_bytes(),
            max_chunk_lines: default_max_chunk_lines(),
            overlap_lines: default_overlap_lines(),
            min_ast_chunk_lines: default_min_ast_chunk_lines(),
        }
    }
}

/// Whether this process drains the job queues or only enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorRole {
    /// Runs workers. Exactly one processor per queue in a deployment.
    #[default]
    Processor,
    /// Enqueues but never processes.
    ClientOnly,
}

/// Job queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub role: ProcessorRole,

    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_completed_retention")]
    pub completed_retention: usize,

    #[serde(default = "default_upsert_batch")]
    pub upsert_batch: usize,
}

fn default_embed_concurrency() -> usize {
    queue::EMBED_CONCURRENCY
}
fn default_base_backoff_ms() -> u64 {
    queue::BASE_BACKOFF_MS
}
fn default_max_backoff_ms() -> u64 {
    queue::MAX_BACKOFF_MS
}
fn default_completed_retention() -> usize {
    queue::COMPLETED_RETENTION
}
fn default_upsert_batch() -> usize {
    queue::UPSERT_BATCH
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            role: ProcessorRole::default(),
            embed_concurrency: default_embed_concurrency(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            completed_retention: default_completed_retention(),
            upsert_batch: default_upsert_batch(),
        }
    }
}

/// Query pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_sparse_top_k")]
    pub sparse_top_k: usize,

    #[serde(default = "default_dense_top_k")]
    pub dense_top_k: usize,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,

    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,

    #[serde(default = "default_symbol_boost")]
    pub symbol_boost: f32,

    #[serde(default = "default_path_boost")]
    pub path_boost: f32,

    /// Shift fusion weights toward the more confident modality per query.
    #[serde(default)]
    pub confidence_weighting: bool,

    #[serde(default = "default_max_boost")]
    pub max_boost: f32,

    #[serde(default = "default_min_weight")]
    pub min_weight: f32,

    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,

    /// Keep only the best hit per file.
    #[serde(default)]
    pub group_by_file: bool,

    #[serde(default)]
    pub rerank: RerankConfig,
}

fn default_sparse_top_k() -> usize {
    fusion::SPARSE_TOP_K
}
fn default_dense_top_k() -> usize {
    fusion::DENSE_TOP_K
}
fn default_limit() -> usize {
    10
}
fn default_rrf_k() -> f32 {
    fusion::RRF_K
}
fn default_sparse_weight() -> f32 {
    fusion::SPARSE_WEIGHT
}
fn default_dense_weight() -> f32 {
    fusion::DENSE_WEIGHT
}
fn default_symbol_boost() -> f32 {
    fusion::SYMBOL_BOOST
}
fn default_path_boost() -> f32 {
    fusion::PATH_BOOST
}
fn default_max_boost() -> f32 {
    fusion::MAX_BOOST
}
fn default_min_weight() -> f32 {
    fusion::MIN_WEIGHT
}
fn default_overlap_threshold() -> f32 {
    fusion::OVERLAP_THRESHOLD
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sparse_top_k: default_sparse_top_k(),
            dense_top_k: default_dense_top_k(),
            default_limit: default_limit(),
            rrf_k: default_rrf_k(),
            sparse_weight: default_sparse_weight(),
            dense_weight: default_dense_weight(),
            symbol_boost: default_symbol_boost(),
            path_boost: default_path_boost(),
            confidence_weighting: false,
            max_boost: default_max_boost(),
            min_weight: default_min_weight(),
            overlap_threshold: default_overlap_threshold(),
            group_by_file: false,
            rerank: RerankConfig::default(),
        }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rerank_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_rerank_candidates")]
    pub candidates: usize,
}

fn default_rerank_candidates() -> usize {
    rerank::CANDIDATES
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: default_rerank_timeout_ms(),
            candidates: default_rerank_candidates(),
        }
    }
}

impl RerankConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

fn default_ring_capacity() -> usize {
    telemetry::RING_CAPACITY
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cross-field validation. Called after loading; a deployment with an
    /// invalid combination refuses to start rather than misbehaving later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.dense_dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "inference.dense_dim".into(),
                message: "dense dimension must be non-zero".into(),
            });
        }

        let weight_sum = self.search.sparse_weight + self.search.dense_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::InvalidValue {
                field: "search.sparse_weight/dense_weight".into(),
                message: format!("modality weights must sum to 1, got {weight_sum}"),
            });
        }

        if self.search.min_weight <= 0.0 || self.search.min_weight >= 0.5 {
            return Err(ConfigError::InvalidValue {
                field: "search.min_weight".into(),
                message: "min_weight must be in (0, 0.5)".into(),
            });
        }

        if self.search.max_boost <= 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_boost".into(),
                message: "max_boost caps an upward weight shift and must exceed 1".into(),
            });
        }

        if self.queue.embed_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.embed_concurrency".into(),
                message: "embedding worker concurrency must be at least 1".into(),
            });
        }

        if self.queue.upsert_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.upsert_batch".into(),
                message: "upsert batch size must be at least 1".into(),
            });
        }

        if self.chunker.overlap_lines >= self.chunker.max_chunk_lines {
            return Err(ConfigError::InvalidValue {
                field: "chunker.overlap_lines".into(),
                message: "overlap must be smaller than the chunk window".into(),
            });
        }

        if self.vector.collection_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vector.collection_prefix".into(),
                message: "collection prefix must not be empty".into(),
            });
        }

        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > `config/{env}.toml` > `config/default.toml` > defaults.
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory (tests).
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::from(dir.join("default")).required(false));

    if let Some(env_name) = env {
        builder = builder.add_source(File::from(dir.join(env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("QUARRY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.inference.dense_dim, 1024);
        assert_eq!(settings.search.sparse_top_k, 200);
        assert_eq!(settings.search.dense_top_k, 80);
        assert_eq!(settings.queue.embed_concurrency, 2);
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut settings = Settings::default();
        settings.search.sparse_weight = 0.8;
        settings.search.dense_weight = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_overlap_must_fit_window() {
        let mut settings = Settings::default();
        settings.chunker.overlap_lines = settings.chunker.max_chunk_lines;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_storage_layout() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/var/lib/quarry"),
        };
        assert_eq!(storage.lexical_dir(), PathBuf::from("/var/lib/quarry/lexical"));
        assert_eq!(storage.stores_path(), PathBuf::from("/var/lib/quarry/stores"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[inference]
dense_dim = 2560

[vector]
hybrid = true
collection_prefix = "qy_"
"#,
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(settings.inference.dense_dim, 2560);
        assert!(settings.vector.hybrid);
        assert_eq!(settings.vector.collection_prefix, "qy_");
        // Untouched sections keep defaults
        assert_eq!(settings.search.rrf_k, 60.0);
    }
}
