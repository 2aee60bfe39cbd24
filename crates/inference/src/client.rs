//! HTTP client for the external embedding / rerank service.
//!
//! Endpoints are OpenAI-shaped: `POST /encode` for dense and sparse
//! embeddings, `POST /rerank` for cross-encoder scores, `POST /embeddings`
//! as an OpenAI-compatible alternative, `GET /health`.
//!
//! Failure policy: no internal retries. The job queue is the retry authority
//! on the indexing path and search callers choose their own fallback, so a
//! failed call surfaces immediately. Batch calls split into cached and
//! uncached texts, send only the uncached remainder, and merge positionally.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use quarry_config::InferenceConfig;
use quarry_core::{fnv1a32, Error, InferenceService, RerankEntry, Result, SparseWeights};

use crate::cache::TtlLru;

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    texts: &'a [String],
    return_dense: bool,
    return_sparse: bool,
    return_colbert: bool,
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    #[serde(default)]
    dense: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    sparse: Option<Vec<HashMap<String, f32>>>,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResponseEntry>,
}

#[derive(Debug, Deserialize)]
struct RerankResponseEntry {
    index: usize,
    score: f32,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingsRequest<'a> {
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingsResponse {
    data: Vec<OpenAiEmbeddingEntry>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingEntry {
    embedding: Vec<f32>,
}

/// Client for the inference service, with per-modality caches.
pub struct InferenceClient {
    client: Client,
    config: InferenceConfig,
    dense_cache: TtlLru<Vec<f32>>,
    sparse_cache: TtlLru<SparseWeights>,
    rerank_cache: TtlLru<Vec<RerankEntry>>,
}

impl InferenceClient {
    /// Build the client. The connection pool keeps sockets alive and has no
    /// artificial cap; deadlines are per request, not per client.
    pub fn new(config: InferenceConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {e}")))?;

        let ttl = Duration::from_secs(config.cache.ttl_secs);
        Ok(Self {
            dense_cache: TtlLru::new(config.cache.embedding_capacity, ttl),
            sparse_cache: TtlLru::new(config.cache.sparse_capacity, ttl),
            rerank_cache: TtlLru::new(config.cache.rerank_capacity, ttl),
            client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn map_err(operation: &str, deadline: Duration, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(operation, deadline.as_millis() as u64)
        } else {
            Error::Upstream(format!("{operation}: {err}"))
        }
    }

    async fn encode(
        &self,
        texts: &[String],
        return_dense: bool,
        return_sparse: bool,
        deadline: Duration,
    ) -> Result<EncodeResponse> {
        let request = EncodeRequest {
            texts,
            return_dense,
            return_sparse,
            return_colbert: false,
            normalize: self.config.normalize,
        };

        let response = self
            .client
            .post(self.url("/encode"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_err("encode", deadline, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!("encode failed: {status} - {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("encode: bad response body: {e}")))
    }

    /// Split `texts` into cache hits and the indices that still need the
    /// service.
    fn partition_cached<V: Clone>(
        cache: &TtlLru<V>,
        texts: &[String],
    ) -> (Vec<Option<V>>, Vec<usize>) {
        let mut resolved: Vec<Option<V>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match cache.get(text) {
                Some(v) => resolved.push(Some(v)),
                None => {
                    resolved.push(None);
                    missing.push(i);
                }
            }
        }
        (resolved, missing)
    }

    /// OpenAI-compatible alternative to `/encode` for dense embeddings.
    /// Bypasses no policy: same deadline handling, same no-retry rule, and
    /// the same cache is populated.
    pub async fn embed_openai(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = OpenAiEmbeddingsRequest { input: texts };
        let response = self
            .client
            .post(self.url("/embeddings"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_err("embeddings", deadline, e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Upstream(format!("embeddings failed: {status}")));
        }

        let body: OpenAiEmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("embeddings: bad response body: {e}")))?;

        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|d| d.embedding).collect();
        if vectors.len() != texts.len() {
            return Err(Error::Upstream(format!(
                "embeddings returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for (text, vector) in texts.iter().zip(vectors.iter()) {
            self.dense_cache.set(text.clone(), vector.clone());
        }
        Ok(vectors)
    }

    fn rerank_cache_key(query: &str, documents: &[String]) -> String {
        let mut digest = fnv1a32(query);
        for doc in documents {
            digest ^= fnv1a32(doc).rotate_left(13);
        }
        format!("{query}\u{1}{}\u{1}{digest:08x}", documents.len())
    }

    /// Rerank that never fails: on any error the input order is preserved
    /// with synthetic, strictly decreasing scores.
    pub async fn rerank_with_fallback(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Vec<RerankEntry> {
        match self.rerank(query, documents, top_k).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "rerank failed, falling back to input order");
                (0..documents.len().min(top_k))
                    .map(|index| RerankEntry {
                        index,
                        score: 1.0 - index as f32 * 0.01,
                    })
                    .collect()
            }
        }
    }

    pub fn cache_stats(&self) -> (crate::cache::CacheStats, crate::cache::CacheStats) {
        (self.dense_cache.stats(), self.sparse_cache.stats())
    }
}

#[async_trait]
impl InferenceService for InferenceClient {
    async fn embed_dense(&self, texts: &[String], deadline: Duration) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (mut resolved, missing) = Self::partition_cached(&self.dense_cache, texts);

        if !missing.is_empty() {
            let uncached: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let response = self.encode(&uncached, true, false, deadline).await?;
            let dense = response
                .dense
                .ok_or_else(|| Error::Upstream("encode returned no dense field".into()))?;
            if dense.len() != uncached.len() {
                return Err(Error::Upstream(format!(
                    "encode returned {} dense vectors for {} texts",
                    dense.len(),
                    uncached.len()
                )));
            }
            for (&slot, vector) in missing.iter().zip(dense.into_iter()) {
                self.dense_cache.set(texts[slot].clone(), vector.clone());
                resolved[slot] = Some(vector);
            }
        }

        resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal("dense embedding batch left unresolved slots".into()))
    }

    async fn embed_sparse(
        &self,
        texts: &[String],
        deadline: Duration,
    ) -> Result<Vec<SparseWeights>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let (mut resolved, missing) = Self::partition_cached(&self.sparse_cache, texts);

        if !missing.is_empty() {
            let uncached: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let response = self.encode(&uncached, false, true, deadline).await?;
            let sparse = response
                .sparse
                .ok_or_else(|| Error::Upstream("encode returned no sparse field".into()))?;
            if sparse.len() != uncached.len() {
                return Err(Error::Upstream(format!(
                    "encode returned {} sparse maps for {} texts",
                    sparse.len(),
                    uncached.len()
                )));
            }
            for (&slot, weights) in missing.iter().zip(sparse.into_iter()) {
                self.sparse_cache.set(texts[slot].clone(), weights.clone());
                resolved[slot] = Some(weights);
            }
        }

        resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal("sparse embedding batch left unresolved slots".into()))
    }

    async fn embed_both(
        &self,
        texts: &[String],
        deadline: Duration,
    ) -> Result<(Vec<Vec<f32>>, Vec<SparseWeights>)> {
        if texts.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        // A text only skips the call when both modalities are cached.
        let mut dense_resolved: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut sparse_resolved: Vec<Option<SparseWeights>> = Vec::with_capacity(texts.len());
        let mut missing = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let dense = self.dense_cache.get(text);
            let sparse = self.sparse_cache.get(text);
            if let (Some(d), Some(s)) = (dense, sparse) {
                dense_resolved.push(Some(d));
                sparse_resolved.push(Some(s));
            } else {
                dense_resolved.push(None);
                sparse_resolved.push(None);
                missing.push(i);
            }
        }

        if !missing.is_empty() {
            let uncached: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let response = self.encode(&uncached, true, true, deadline).await?;
            let dense = response
                .dense
                .ok_or_else(|| Error::Upstream("encode returned no dense field".into()))?;
            let sparse = response
                .sparse
                .ok_or_else(|| Error::Upstream("encode returned no sparse field".into()))?;
            if dense.len() != uncached.len() || sparse.len() != uncached.len() {
                return Err(Error::Upstream(
                    "encode returned mismatched batch sizes".into(),
                ));
            }
            for ((&slot, vector), weights) in
                missing.iter().zip(dense.into_iter()).zip(sparse.into_iter())
            {
                self.dense_cache.set(texts[slot].clone(), vector.clone());
                self.sparse_cache.set(texts[slot].clone(), weights.clone());
                dense_resolved[slot] = Some(vector);
                sparse_resolved[slot] = Some(weights);
            }
        }

        let dense = dense_resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal("embedding batch left unresolved slots".into()))?;
        let sparse = sparse_resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Internal("embedding batch left unresolved slots".into()))?;
        Ok((dense, sparse))
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankEntry>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let cache_key = Self::rerank_cache_key(query, documents);
        if let Some(entries) = self.rerank_cache.get(&cache_key) {
            return Ok(entries);
        }

        let deadline = self.config.rerank_timeout();
        let started = Instant::now();
        let request = RerankRequest {
            query,
            documents,
            top_k,
        };

        let response = self
            .client
            .post(self.url("/rerank"))
            .timeout(deadline)
            .json(&request)
            .send()
            .await
            .map_err(|e| Self::map_err("rerank", deadline, e))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Upstream(format!("rerank failed: {status}")));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("rerank: bad response body: {e}")))?;

        // The service does not guarantee order; honor `index` and drop
        // anything out of range rather than guessing.
        let mut entries: Vec<RerankEntry> = body
            .results
            .into_iter()
            .filter(|r| r.index < documents.len())
            .map(|r| RerankEntry {
                index: r.index,
                score: r.score,
            })
            .collect();
        entries.truncate(top_k);

        tracing::debug!(
            documents = documents.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "rerank complete"
        );

        self.rerank_cache.set(cache_key, entries.clone());
        Ok(entries)
    }

    fn embedding_cache_hits(&self) -> u64 {
        self.dense_cache.stats().hits
    }

    async fn health(&self) -> bool {
        let deadline = Duration::from_secs(self.config.health_timeout_secs);
        match self
            .client
            .get(self.url("/health"))
            .timeout(deadline)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
