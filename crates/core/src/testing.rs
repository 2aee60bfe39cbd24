//! In-memory backend fakes for integration tests.
//!
//! Deterministic stand-ins for the three external collaborators. The
//! embedding fake derives vectors from token hashes so that texts sharing
//! tokens really are cosine-close, which lets end-to-end retrieval tests
//! assert on ranking instead of stubbed scores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::hash::fnv1a32;
use crate::traits::{InferenceService, LexicalIndex, VectorIndex};
use crate::types::{
    Chunk, Hit, LexicalStats, RerankEntry, SearchFilter, SparseWeights, VectorRecord,
};

use parking_lot::Mutex;

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Term-overlap "BM25": score = matching query terms, weighted double for
/// symbol matches. Zero-score documents are not returned.
#[derive(Default)]
pub struct InMemoryLexical {
    stores: Mutex<HashMap<String, HashMap<String, Chunk>>>,
}

impl InMemoryLexical {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self, store: &str) -> usize {
        self.stores
            .lock()
            .get(store)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LexicalIndex for InMemoryLexical {
    async fn index(&self, store: &str, chunks: &[Chunk]) -> Result<()> {
        let mut stores = self.stores.lock();
        let docs = stores.entry(store.to_string()).or_default();
        for chunk in chunks {
            docs.insert(chunk.doc_id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn search(
        &self,
        store: &str,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        let stores = self.stores.lock();
        let Some(docs) = stores.get(store) else {
            return Ok(Vec::new());
        };

        let query_terms = tokens(query);
        let mut scored: Vec<(f32, &Chunk)> = docs
            .values()
            .filter(|c| filter.map_or(true, |f| f.matches(&c.path, c.language)))
            .filter_map(|chunk| {
                let content_terms = tokens(&chunk.content);
                let symbol_terms: Vec<String> =
                    chunk.symbols.iter().map(|s| s.to_lowercase()).collect();
                let mut score = 0.0f32;
                for term in &query_terms {
                    if content_terms.contains(term) {
                        score += 1.0;
                    }
                    if symbol_terms.contains(term) {
                        score += 2.0;
                    }
                }
                (score > 0.0).then_some((score, chunk))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.doc_id.cmp(&b.1.doc_id))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (score, chunk))| Hit {
                doc_id: chunk.doc_id.clone(),
                path: chunk.path.clone(),
                language: chunk.language,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                content: chunk.content.clone(),
                symbols: chunk.symbols.clone(),
                score,
                rank: i + 1,
            })
            .collect())
    }

    async fn delete_paths(&self, store: &str, paths: &[String]) -> Result<()> {
        if let Some(docs) = self.stores.lock().get_mut(store) {
            docs.retain(|_, c| !paths.contains(&c.path));
        }
        Ok(())
    }

    async fn delete_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()> {
        if let Some(docs) = self.stores.lock().get_mut(store) {
            for id in doc_ids {
                docs.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()> {
        if let Some(docs) = self.stores.lock().get_mut(store) {
            docs.retain(|_, c| !c.path.starts_with(prefix));
        }
        Ok(())
    }

    async fn stats(&self, store: &str) -> Result<LexicalStats> {
        let stores = self.stores.lock();
        match stores.get(store) {
            Some(docs) => Ok(LexicalStats {
                num_docs: docs.len() as u64,
                num_segments: 1,
            }),
            None => Err(Error::NotFound(format!("lexical index for store {store}"))),
        }
    }

    async fn drop_store(&self, store: &str) -> Result<()> {
        self.stores.lock().remove(store);
        Ok(())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Exact cosine search over stored records.
#[derive(Default)]
pub struct InMemoryVector {
    collections: Mutex<HashMap<String, HashMap<String, VectorRecord>>>,
}

impl InMemoryVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, store: &str) -> usize {
        self.collections
            .lock()
            .get(store)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    pub fn contains_doc(&self, store: &str, doc_id: &str) -> bool {
        self.collections
            .lock()
            .get(store)
            .map(|c| c.contains_key(doc_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVector {
    async fn create_collection(&self, store: &str) -> Result<()> {
        self.collections
            .lock()
            .entry(store.to_string())
            .or_default();
        Ok(())
    }

    async fn drop_collection(&self, store: &str) -> Result<()> {
        self.collections.lock().remove(store);
        Ok(())
    }

    async fn collection_exists(&self, store: &str) -> Result<bool> {
        Ok(self.collections.lock().contains_key(store))
    }

    async fn upsert(&self, store: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.lock();
        let collection = collections
            .get_mut(store)
            .ok_or_else(|| Error::NotFound(format!("collection for store {store}")))?;
        for record in records {
            collection.insert(record.chunk.doc_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete_by_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()> {
        if let Some(collection) = self.collections.lock().get_mut(store) {
            for id in doc_ids {
                collection.remove(id);
            }
        }
        Ok(())
    }

    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()> {
        if let Some(collection) = self.collections.lock().get_mut(store) {
            collection.retain(|_, r| !r.chunk.path.starts_with(prefix));
        }
        Ok(())
    }

    async fn search(
        &self,
        store: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        let collections = self.collections.lock();
        let Some(collection) = collections.get(store) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(f32, &VectorRecord)> = collection
            .values()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.chunk.path, r.chunk.language)))
            .map(|r| (cosine(query_vector, &r.dense), r))
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.chunk.doc_id.cmp(&b.1.chunk.doc_id))
        });

        Ok(scored
            .into_iter()
            .take(top_k)
            .enumerate()
            .map(|(i, (score, record))| Hit {
                doc_id: record.chunk.doc_id.clone(),
                path: record.chunk.path.clone(),
                language: record.chunk.language,
                start_line: record.chunk.start_line,
                end_line: record.chunk.end_line,
                content: record.chunk.content.clone(),
                symbols: record.chunk.symbols.clone(),
                score,
                rank: i + 1,
            })
            .collect())
    }

    async fn hybrid_search(
        &self,
        store: &str,
        query_dense: &[f32],
        query_sparse: &SparseWeights,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        // Dense cosine plus sparse dot product, which is close enough to
        // server-side fusion for pipeline tests.
        let mut hits = self.search(store, query_dense, top_k * 2, filter).await?;
        let collections = self.collections.lock();
        if let Some(collection) = collections.get(store) {
            for hit in &mut hits {
                if let Some(record) = collection.get(&hit.doc_id) {
                    if let Some(ref sparse) = record.sparse {
                        let dot: f32 = query_sparse
                            .iter()
                            .filter_map(|(token, w)| sparse.get(token).map(|sw| w * sw))
                            .sum();
                        hit.score += dot;
                    }
                }
            }
        }
        drop(collections);
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(top_k);
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }
        Ok(hits)
    }

    async fn count(&self, store: &str) -> Result<u64> {
        let collections = self.collections.lock();
        collections
            .get(store)
            .map(|c| c.len() as u64)
            .ok_or_else(|| Error::NotFound(format!("collection for store {store}")))
    }

    async fn health(&self) -> bool {
        true
    }
}

/// Deterministic inference fake.
///
/// Dense vectors accumulate token hashes into a fixed number of buckets;
/// sparse weights are `token → 1.0`; rerank scores are token overlap with
/// the query. A configurable delay and failure switch cover the timeout
/// and fail-open paths.
pub struct HashEmbedInference {
    pub dim: usize,
    rerank_delay: Mutex<Option<Duration>>,
    fail_rerank: AtomicBool,
    pub embed_calls: AtomicU64,
    pub rerank_calls: AtomicU64,
}

impl Default for HashEmbedInference {
    fn default() -> Self {
        Self::new(16)
    }
}

impl HashEmbedInference {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            rerank_delay: Mutex::new(None),
            fail_rerank: AtomicBool::new(false),
            embed_calls: AtomicU64::new(0),
            rerank_calls: AtomicU64::new(0),
        }
    }

    pub fn set_rerank_delay(&self, delay: Option<Duration>) {
        *self.rerank_delay.lock() = delay;
    }

    pub fn set_fail_rerank(&self, fail: bool) {
        self.fail_rerank.store(fail, Ordering::SeqCst);
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokens(text) {
            v[(fnv1a32(&token) as usize) % self.dim] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl InferenceService for HashEmbedInference {
    async fn embed_dense(&self, texts: &[String], _deadline: Duration) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::Relaxed);
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn embed_sparse(
        &self,
        texts: &[String],
        _deadline: Duration,
    ) -> Result<Vec<SparseWeights>> {
        Ok(texts
            .iter()
            .map(|t| tokens(t).into_iter().map(|tok| (tok, 1.0f32)).collect())
            .collect())
    }

    async fn embed_both(
        &self,
        texts: &[String],
        deadline: Duration,
    ) -> Result<(Vec<Vec<f32>>, Vec<SparseWeights>)> {
        Ok((
            self.embed_dense(texts, deadline).await?,
            self.embed_sparse(texts, deadline).await?,
        ))
    }

    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<RerankEntry>> {
        self.rerank_calls.fetch_add(1, Ordering::Relaxed);
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let delay = *self.rerank_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_rerank.load(Ordering::SeqCst) {
            return Err(Error::Upstream("rerank model unavailable".into()));
        }

        let query_terms = tokens(query);
        let mut entries: Vec<RerankEntry> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| {
                let doc_terms = tokens(doc);
                let overlap = query_terms
                    .iter()
                    .filter(|t| doc_terms.contains(t))
                    .count();
                RerankEntry {
                    index,
                    score: overlap as f32 / (query_terms.len().max(1)) as f32,
                }
            })
            .collect();
        entries.truncate(top_k);
        Ok(entries)
    }

    async fn health(&self) -> bool {
        true
    }
}
