//! Qdrant-backed implementation of the vector store contract.
//!
//! A deployment runs in one of two collection shapes:
//! - dense (default): one collection `{prefix}{store}` with an unnamed
//!   cosine vector of the configured dimension;
//! - hybrid: one collection `{prefix}hybrid_{store}` carrying a named
//!   `dense` vector plus a named `sparse` inverted-index vector, searched
//!   server-side with RRF fusion.
//!
//! Point ids are UUIDv5 derived from the chunk's `doc_id` (Qdrant only
//! accepts integers or UUIDs); the original `doc_id` travels in the payload.
//! The language filter is evaluated server-side; the path-contains filter is
//! applied client-side over an over-fetched page, because the store has no
//! substring operator.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, value::Kind,
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    FieldCondition, Filter, Fusion, HnswConfigDiffBuilder, Match, NamedVectors, PointId,
    PointStruct, PointsIdsList, PrefetchQueryBuilder, Query, QueryPointsBuilder, RepeatedStrings,
    ScoredPoint, ScrollPointsBuilder, SearchParamsBuilder, SearchPointsBuilder,
    SparseVectorParamsBuilder, SparseVectorsConfigBuilder, UpsertPointsBuilder, Value, Vector,
    VectorInput, VectorParamsBuilder, VectorsConfigBuilder,
};
use qdrant_client::Qdrant;
use uuid::Uuid;

use quarry_config::VectorConfig;
use quarry_core::{
    Error, Hit, Language, Result, SearchFilter, SparseWeights, VectorIndex, VectorRecord,
};

use crate::sparse::encode_sparse;

const DENSE_VECTOR_NAME: &str = "dense";
const SPARSE_VECTOR_NAME: &str = "sparse";
const SCROLL_PAGE: u32 = 1_024;
const DELETE_BATCH: usize = 1_000;

/// Deterministic point id for a chunk.
fn point_uuid(doc_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, doc_id.as_bytes()).to_string()
}

fn payload_str(point_payload: &std::collections::HashMap<String, Value>, key: &str) -> String {
    match point_payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => s.clone(),
        _ => String::new(),
    }
}

fn payload_u64(point_payload: &std::collections::HashMap<String, Value>, key: &str) -> u64 {
    match point_payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::IntegerValue(n)) => *n as u64,
        _ => 0,
    }
}

/// Qdrant adapter.
pub struct QdrantVectorIndex {
    client: Qdrant,
    config: VectorConfig,
    dense_dim: usize,
    /// collection name → (exists, observed_at)
    exists_cache: DashMap<String, (bool, Instant)>,
}

impl QdrantVectorIndex {
    pub fn connect(config: VectorConfig, dense_dim: usize) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.endpoint)
            .timeout(Duration::from_secs(config.timeout_secs));

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder
            .build()
            .map_err(|e| Error::Upstream(format!("vector store connect: {e}")))?;

        Ok(Self {
            client,
            config,
            dense_dim,
            exists_cache: DashMap::new(),
        })
    }

    /// Collection holding a store's vectors under the configured shape.
    fn collection_name(&self, store: &str) -> String {
        if self.config.hybrid {
            format!("{}hybrid_{}", self.config.collection_prefix, store)
        } else {
            format!("{}{}", self.config.collection_prefix, store)
        }
    }

    /// Both possible collection names for a store; drop touches each so a
    /// shape change never strands data.
    fn all_collection_names(&self, store: &str) -> [String; 2] {
        [
            format!("{}{}", self.config.collection_prefix, store),
            format!("{}hybrid_{}", self.config.collection_prefix, store),
        ]
    }

    async fn collection_exists_uncached(&self, name: &str) -> Result<bool> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| Error::Upstream(format!("vector store exists: {e}")))?;
        self.exists_cache
            .insert(name.to_string(), (exists, Instant::now()));
        Ok(exists)
    }

    async fn collection_exists_cached(&self, name: &str) -> Result<bool> {
        let ttl = Duration::from_secs(self.config.exists_cache_ttl_secs);
        if let Some(entry) = self.exists_cache.get(name) {
            let (exists, observed_at) = *entry;
            if observed_at.elapsed() < ttl {
                return Ok(exists);
            }
        }
        self.collection_exists_uncached(name).await
    }

    fn server_filter(filter: Option<&SearchFilter>) -> Option<Filter> {
        let languages = filter?.languages.as_ref()?;
        if languages.is_empty() {
            return None;
        }
        let strings: Vec<String> = languages.iter().map(|l| l.as_str().to_string()).collect();
        let condition = Condition {
            condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
                key: "language".to_string(),
                r#match: Some(Match {
                    match_value: Some(MatchValue::Keywords(RepeatedStrings { strings })),
                }),
                ..Default::default()
            })),
        };
        Some(Filter {
            must: vec![condition],
            ..Default::default()
        })
    }

    fn payload_for(record: &VectorRecord) -> std::collections::HashMap<String, Value> {
        let chunk = &record.chunk;
        let mut payload: std::collections::HashMap<String, Value> = Default::default();
        payload.insert("chunk_id".to_string(), chunk.doc_id.clone().into());
        payload.insert("path".to_string(), chunk.path.clone().into());
        payload.insert("language".to_string(), chunk.language.as_str().into());
        payload.insert("start_line".to_string(), (chunk.start_line as i64).into());
        payload.insert("end_line".to_string(), (chunk.end_line as i64).into());
        payload.insert("content".to_string(), chunk.content.clone().into());
        payload.insert(
            "symbols".to_string(),
            serde_json::to_string(&chunk.symbols)
                .unwrap_or_else(|_| "[]".to_string())
                .into(),
        );
        payload
    }

    fn hit_from_point(point: ScoredPoint, rank: usize) -> Hit {
        let payload = point.payload;
        let symbols: Vec<String> = serde_json::from_str(&payload_str(&payload, "symbols"))
            .unwrap_or_default();
        Hit {
            doc_id: payload_str(&payload, "chunk_id"),
            path: payload_str(&payload, "path"),
            language: Language::parse(&payload_str(&payload, "language")),
            start_line: payload_u64(&payload, "start_line") as usize,
            end_line: payload_u64(&payload, "end_line") as usize,
            content: payload_str(&payload, "content"),
            symbols,
            score: point.score,
            rank,
        }
    }

    /// Re-rank/filter a scored page client-side: apply the path-contains
    /// predicate and assign dense ranks.
    fn collect_hits(
        points: Vec<ScoredPoint>,
        filter: Option<&SearchFilter>,
        top_k: usize,
    ) -> Vec<Hit> {
        let mut hits = Vec::with_capacity(top_k);
        for point in points {
            if let Some(f) = filter {
                if let Some(ref fragment) = f.path_contains {
                    let path = payload_str(&point.payload, "path");
                    if !path.contains(fragment.as_str()) {
                        continue;
                    }
                }
            }
            let rank = hits.len() + 1;
            hits.push(Self::hit_from_point(point, rank));
            if hits.len() == top_k {
                break;
            }
        }
        hits
    }

    fn fetch_size(filter: Option<&SearchFilter>, top_k: usize) -> usize {
        if filter.map_or(false, |f| f.path_contains.is_some()) {
            top_k.saturating_mul(4).max(top_k)
        } else {
            top_k
        }
    }

    async fn delete_point_ids(&self, name: &str, ids: Vec<PointId>) -> Result<()> {
        for batch in ids.chunks(DELETE_BATCH) {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(name)
                        .points(PointsIdsList {
                            ids: batch.to_vec(),
                        })
                        .wait(true),
                )
                .await
                .map_err(|e| Error::Upstream(format!("vector store delete: {e}")))?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn create_collection(&self, store: &str) -> Result<()> {
        let name = self.collection_name(store);
        if self.collection_exists_uncached(&name).await? {
            return Ok(());
        }

        let hnsw = HnswConfigDiffBuilder::default()
            .m(self.config.hnsw_m)
            .ef_construct(self.config.hnsw_ef_construction);

        let request = if self.config.hybrid {
            let mut vectors = VectorsConfigBuilder::default();
            vectors.add_named_vector_params(
                DENSE_VECTOR_NAME,
                VectorParamsBuilder::new(self.dense_dim as u64, Distance::Cosine),
            );
            let mut sparse = SparseVectorsConfigBuilder::default();
            sparse.add_named_vector_params(SPARSE_VECTOR_NAME, SparseVectorParamsBuilder::default());
            CreateCollectionBuilder::new(&name)
                .vectors_config(vectors)
                .sparse_vectors_config(sparse)
                .hnsw_config(hnsw)
        } else {
            CreateCollectionBuilder::new(&name)
                .vectors_config(VectorParamsBuilder::new(
                    self.dense_dim as u64,
                    Distance::Cosine,
                ))
                .hnsw_config(hnsw)
        };

        self.client
            .create_collection(request)
            .await
            .map_err(|e| Error::Upstream(format!("vector store create: {e}")))?;

        self.exists_cache
            .insert(name.clone(), (true, Instant::now()));
        tracing::info!(collection = %name, dim = self.dense_dim, hybrid = self.config.hybrid, "collection created");
        Ok(())
    }

    async fn drop_collection(&self, store: &str) -> Result<()> {
        for name in self.all_collection_names(store) {
            if self.collection_exists_uncached(&name).await? {
                self.client
                    .delete_collection(&name)
                    .await
                    .map_err(|e| Error::Upstream(format!("vector store drop: {e}")))?;
            }
            self.exists_cache
                .insert(name.clone(), (false, Instant::now()));
        }
        Ok(())
    }

    async fn collection_exists(&self, store: &str) -> Result<bool> {
        let name = self.collection_name(store);
        self.collection_exists_cached(&name).await
    }

    async fn upsert(&self, store: &str, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        // Dimension is a deployment constant; refuse to mix.
        for record in records {
            if record.dense.len() != self.dense_dim {
                return Err(Error::InvalidArgument(format!(
                    "dense vector dimension {} does not match deployment dimension {}",
                    record.dense.len(),
                    self.dense_dim
                )));
            }
            if self.config.hybrid && record.sparse.is_none() {
                return Err(Error::InvalidArgument(
                    "hybrid collections require sparse weights on every record".into(),
                ));
            }
        }

        let name = self.collection_name(store);

        // Delete-then-insert keeps upsert idempotent on the primary key even
        // if payload shape evolves.
        let ids: Vec<PointId> = records
            .iter()
            .map(|r| PointId::from(point_uuid(&r.chunk.doc_id)))
            .collect();
        self.delete_point_ids(&name, ids).await?;

        let mut points = Vec::with_capacity(records.len());
        for record in records {
            let payload = Self::payload_for(record);
            let id = point_uuid(&record.chunk.doc_id);
            let point = match (&record.sparse, self.config.hybrid) {
                (Some(sparse), true) => {
                    let (indices, values) = encode_sparse(sparse);
                    let vectors = NamedVectors::default()
                        .add_vector(DENSE_VECTOR_NAME, Vector::new_dense(record.dense.clone()))
                        .add_vector(SPARSE_VECTOR_NAME, Vector::new_sparse(indices, values));
                    PointStruct::new(id, vectors, payload)
                }
                _ => PointStruct::new(id, record.dense.clone(), payload),
            };
            points.push(point);
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&name, points).wait(true))
            .await
            .map_err(|e| Error::Upstream(format!("vector store upsert: {e}")))?;

        Ok(())
    }

    async fn delete_by_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }
        let name = self.collection_name(store);
        if !self.collection_exists_cached(&name).await? {
            return Ok(());
        }
        let ids: Vec<PointId> = doc_ids
            .iter()
            .map(|d| PointId::from(point_uuid(d)))
            .collect();
        self.delete_point_ids(&name, ids).await
    }

    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()> {
        let name = self.collection_name(store);
        if !self.collection_exists_cached(&name).await? {
            return Ok(());
        }

        // The store has no prefix operator; scroll payloads and match
        // client-side. Prefix-anchored, unlike the search filter.
        let mut to_delete: Vec<PointId> = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut builder = ScrollPointsBuilder::new(&name)
                .limit(SCROLL_PAGE)
                .with_payload(true);
            if let Some(o) = offset.take() {
                builder = builder.offset(o);
            }
            let page = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| Error::Upstream(format!("vector store scroll: {e}")))?;

            for point in page.result {
                let path = payload_str(&point.payload, "path");
                if path.starts_with(prefix) {
                    if let Some(id) = point.id {
                        to_delete.push(id);
                    }
                }
            }

            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        if to_delete.is_empty() {
            return Ok(());
        }
        tracing::debug!(collection = %name, points = to_delete.len(), prefix, "prefix delete");
        self.delete_point_ids(&name, to_delete).await
    }

    async fn search(
        &self,
        store: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        let name = self.collection_name(store);
        if !self.collection_exists_cached(&name).await? {
            return Ok(Vec::new());
        }

        let fetch = Self::fetch_size(filter, top_k);
        let ef = (2 * top_k as u64).max(64);

        let mut builder = SearchPointsBuilder::new(&name, query_vector.to_vec(), fetch as u64)
            .with_payload(true)
            .params(SearchParamsBuilder::default().hnsw_ef(ef));
        if self.config.hybrid {
            builder = builder.vector_name(DENSE_VECTOR_NAME);
        }
        if let Some(f) = Self::server_filter(filter) {
            builder = builder.filter(f);
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(|e| Error::Upstream(format!("vector store search: {e}")))?;

        Ok(Self::collect_hits(response.result, filter, top_k))
    }

    async fn hybrid_search(
        &self,
        store: &str,
        query_dense: &[f32],
        query_sparse: &SparseWeights,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        if !self.config.hybrid {
            return Err(Error::NotFound(
                "hybrid search requires a hybrid collection shape".into(),
            ));
        }
        let name = self.collection_name(store);
        if !self.collection_exists_cached(&name).await? {
            return Ok(Vec::new());
        }

        let fetch = Self::fetch_size(filter, top_k);
        let (indices, values) = encode_sparse(query_sparse);

        let mut builder = QueryPointsBuilder::new(&name)
            .add_prefetch(
                PrefetchQueryBuilder::default()
                    .query(Query::new_nearest(query_dense.to_vec()))
                    .using(DENSE_VECTOR_NAME)
                    .limit(fetch as u64),
            )
            .add_prefetch(
                PrefetchQueryBuilder::default()
                    .query(Query::new_nearest(VectorInput::new_sparse(indices, values)))
                    .using(SPARSE_VECTOR_NAME)
                    .limit(fetch as u64),
            )
            .query(Query::new_fusion(Fusion::Rrf))
            .limit(fetch as u64)
            .with_payload(true);
        if let Some(f) = Self::server_filter(filter) {
            builder = builder.filter(f);
        }

        let response = self
            .client
            .query(builder)
            .await
            .map_err(|e| Error::Upstream(format!("vector store hybrid search: {e}")))?;

        Ok(Self::collect_hits(response.result, filter, top_k))
    }

    async fn count(&self, store: &str) -> Result<u64> {
        let name = self.collection_name(store);
        if !self.collection_exists_cached(&name).await? {
            return Err(Error::NotFound(format!("collection for store {store}")));
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&name).exact(true))
            .await
            .map_err(|e| Error::Upstream(format!("vector store count: {e}")))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }

    async fn health(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Chunk;

    #[test]
    fn test_point_uuid_is_deterministic() {
        let a = point_uuid("src/auth.py#0#deadbeef");
        let b = point_uuid("src/auth.py#0#deadbeef");
        assert_eq!(a, b);
        assert_ne!(a, point_uuid("src/auth.py#1#deadbeef"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_collection_naming() {
        let dense = QdrantVectorIndex {
            client: Qdrant::from_url("http://127.0.0.1:6334").build().unwrap(),
            config: VectorConfig::default(),
            dense_dim: 1024,
            exists_cache: DashMap::new(),
        };
        assert_eq!(dense.collection_name("docs"), "quarry_docs");

        let hybrid = QdrantVectorIndex {
            client: Qdrant::from_url("http://127.0.0.1:6334").build().unwrap(),
            config: VectorConfig {
                hybrid: true,
                ..VectorConfig::default()
            },
            dense_dim: 1024,
            exists_cache: DashMap::new(),
        };
        assert_eq!(hybrid.collection_name("docs"), "quarry_hybrid_docs");
    }

    #[test]
    fn test_payload_roundtrip_fields() {
        let chunk = Chunk {
            doc_id: "a.py#0#1".into(),
            path: "a.py".into(),
            language: Language::Python,
            start_line: 3,
            end_line: 9,
            content: "def f(): pass".into(),
            chunk_index: 0,
            symbols: vec!["f".into()],
            node_type: None,
        };
        let record = VectorRecord {
            chunk,
            dense: vec![0.0; 4],
            sparse: None,
        };
        let payload = QdrantVectorIndex::payload_for(&record);
        assert_eq!(payload_str(&payload, "chunk_id"), "a.py#0#1");
        assert_eq!(payload_str(&payload, "language"), "python");
        assert_eq!(payload_u64(&payload, "start_line"), 3);
        assert_eq!(payload_str(&payload, "symbols"), "[\"f\"]");
    }
}
