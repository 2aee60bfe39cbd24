//! Parallel retrieval fan-out.
//!
//! Runs the lexical leg and the vector leg concurrently and collects the
//! raw ranked lists. Per-leg failures are downgraded: a missing collection
//! or index is an ordinary empty result, and an upstream failure on one leg
//! must not sink a search the other leg can still serve. Dropping the
//! returned future cancels both in-flight legs.

use std::sync::Arc;
use std::time::Instant;

use quarry_core::{Hit, LexicalIndex, SearchFilter, SparseWeights, VectorIndex};

/// Query-side embeddings, produced before fan-out. Either may be missing
/// when the inference call failed; the affected leg is skipped with a
/// warning instead of failing the search.
#[derive(Debug, Clone, Default)]
pub struct QueryVectors {
    pub dense: Option<Vec<f32>>,
    pub sparse: Option<SparseWeights>,
}

/// Raw ranked lists plus timing, one entry per modality.
#[derive(Debug, Default)]
pub struct RetrievalOutput {
    pub sparse: Vec<Hit>,
    pub dense: Vec<Hit>,
    pub sparse_ms: u64,
    pub dense_ms: u64,
    pub warnings: Vec<String>,
}

impl RetrievalOutput {
    /// True when no modality produced anything and at least one failed.
    pub fn all_legs_failed(&self) -> bool {
        self.sparse.is_empty() && self.dense.is_empty() && !self.warnings.is_empty()
    }
}

/// Fan-out coordinator over the two retrieval backends.
pub struct RetrieverCoordinator {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    hybrid: bool,
}

impl RetrieverCoordinator {
    pub fn new(lexical: Arc<dyn LexicalIndex>, vector: Arc<dyn VectorIndex>, hybrid: bool) -> Self {
        Self {
            lexical,
            vector,
            hybrid,
        }
    }

    pub async fn retrieve(
        &self,
        store: &str,
        query: &str,
        vectors: &QueryVectors,
        filter: Option<&SearchFilter>,
        sparse_top_k: usize,
        dense_top_k: usize,
    ) -> RetrievalOutput {
        let lexical_leg = async {
            let started = Instant::now();
            let outcome = self.lexical.search(store, query, sparse_top_k, filter).await;
            (outcome, started.elapsed().as_millis() as u64)
        };

        let vector_leg = async {
            let started = Instant::now();
            let outcome = match (&vectors.dense, &vectors.sparse) {
                (Some(dense), Some(sparse)) if self.hybrid => {
                    self.vector
                        .hybrid_search(store, dense, sparse, dense_top_k, filter)
                        .await
                        .map(Some)
                }
                (Some(dense), _) => self
                    .vector
                    .search(store, dense, dense_top_k, filter)
                    .await
                    .map(Some),
                (None, _) => Ok(None),
            };
            (outcome, started.elapsed().as_millis() as u64)
        };

        let ((sparse_outcome, sparse_ms), (dense_outcome, dense_ms)) =
            tokio::join!(lexical_leg, vector_leg);

        let mut output = RetrievalOutput {
            sparse_ms,
            dense_ms,
            ..Default::default()
        };

        match sparse_outcome {
            Ok(hits) => output.sparse = hits,
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(store, error = %e, "lexical leg failed");
                output.warnings.push(format!("sparse retrieval failed: {e}"));
            }
        }

        match dense_outcome {
            Ok(Some(hits)) => output.dense = hits,
            Ok(None) => output
                .warnings
                .push("dense leg skipped: query embedding unavailable".to_string()),
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(store, error = %e, "vector leg failed");
                output.warnings.push(format!("dense retrieval failed: {e}"));
            }
        }

        output
    }
}
