//! Cross-encoder reranking with a hard deadline.
//!
//! The reranker is an optional quality stage: it may improve ordering, it
//! must never break a search. Every exit path other than a confirmed rerank
//! response returns the fused order unchanged (fail-open), and the deadline
//! is enforced here with `tokio::time::timeout` regardless of what the
//! inference client does internally.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use quarry_config::constants::rerank::{DOMINANT_TOP_RATIO, MIN_QUERY_CHARS};
use quarry_config::RerankConfig;
use quarry_core::{InferenceService, SearchResult};

/// Why a rerank pass ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankStatus {
    Applied,
    Skipped,
    TimedOut,
    Failed,
    Disabled,
}

/// Outcome metadata for telemetry.
#[derive(Debug, Clone, Copy)]
pub struct RerankReport {
    pub status: RerankStatus,
    pub latency_ms: u64,
    pub candidates: usize,
}

/// Counters over the reranker's lifetime.
#[derive(Debug, Default)]
pub struct RerankMetrics {
    pub success: AtomicU64,
    pub timeout: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
    latency_ms_sum: AtomicU64,
    latency_samples: AtomicU64,
}

impl RerankMetrics {
    pub fn average_latency_ms(&self) -> f64 {
        let samples = self.latency_samples.load(AtomicOrdering::Relaxed);
        if samples == 0 {
            return 0.0;
        }
        self.latency_ms_sum.load(AtomicOrdering::Relaxed) as f64 / samples as f64
    }

    fn observe_latency(&self, ms: u64) {
        self.latency_ms_sum.fetch_add(ms, AtomicOrdering::Relaxed);
        self.latency_samples.fetch_add(1, AtomicOrdering::Relaxed);
    }
}

pub struct Reranker {
    inference: Arc<dyn InferenceService>,
    config: RerankConfig,
    metrics: RerankMetrics,
}

impl Reranker {
    pub fn new(inference: Arc<dyn InferenceService>, config: RerankConfig) -> Self {
        Self {
            inference,
            config,
            metrics: RerankMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &RerankMetrics {
        &self.metrics
    }

    /// Skip heuristics: too few results, a degenerate query, or a top hit so
    /// dominant that reordering the tail cannot change what the user sees.
    pub fn should_rerank(&self, query: &str, results: &[SearchResult]) -> bool {
        if results.len() <= 2 {
            return false;
        }
        if query.trim().chars().count() < MIN_QUERY_CHARS {
            return false;
        }
        if results[0].final_score > DOMINANT_TOP_RATIO * results[1].final_score {
            return false;
        }
        true
    }

    /// Rerank the head of `results`. Returns the (possibly re-ordered)
    /// results and a report for telemetry.
    pub async fn rerank(
        &self,
        query: &str,
        mut results: Vec<SearchResult>,
    ) -> (Vec<SearchResult>, RerankReport) {
        if !self.config.enabled {
            return (
                results,
                RerankReport {
                    status: RerankStatus::Disabled,
                    latency_ms: 0,
                    candidates: 0,
                },
            );
        }

        if !self.should_rerank(query, &results) {
            self.metrics.skipped.fetch_add(1, AtomicOrdering::Relaxed);
            return (
                results,
                RerankReport {
                    status: RerankStatus::Skipped,
                    latency_ms: 0,
                    candidates: 0,
                },
            );
        }

        let candidates = results.len().min(self.config.candidates);
        let documents: Vec<String> = results[..candidates]
            .iter()
            .map(|r| r.content.clone())
            .collect();

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.timeout(),
            self.inference.rerank(query, &documents, candidates),
        )
        .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(entries)) => {
                // Honor `index`: the service does not promise sorted output,
                // and anything outside the candidate head is ignored.
                for entry in &entries {
                    if entry.index >= candidates {
                        continue;
                    }
                    if let Some(result) = results.get_mut(entry.index) {
                        result.rerank_score = Some(entry.score);
                        result.final_score = entry.score;
                    }
                }

                let mut order: Vec<(usize, f32)> = entries
                    .iter()
                    .filter(|e| e.index < candidates)
                    .map(|e| (e.index, e.score))
                    .collect();
                order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
                for (rank0, (index, _)) in order.into_iter().enumerate() {
                    if let Some(result) = results.get_mut(index) {
                        result.rerank_rank = Some(rank0 + 1);
                    }
                }

                results.sort_by(|a, b| {
                    b.final_score
                        .partial_cmp(&a.final_score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.doc_id.cmp(&b.doc_id))
                });

                self.metrics.success.fetch_add(1, AtomicOrdering::Relaxed);
                self.metrics.observe_latency(latency_ms);
                (
                    results,
                    RerankReport {
                        status: RerankStatus::Applied,
                        latency_ms,
                        candidates,
                    },
                )
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "rerank failed, keeping fused order");
                self.metrics.failed.fetch_add(1, AtomicOrdering::Relaxed);
                (
                    results,
                    RerankReport {
                        status: RerankStatus::Failed,
                        latency_ms,
                        candidates,
                    },
                )
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.timeout_ms,
                    "rerank deadline missed, keeping fused order"
                );
                self.metrics.timeout.fetch_add(1, AtomicOrdering::Relaxed);
                (
                    results,
                    RerankReport {
                        status: RerankStatus::TimedOut,
                        latency_ms,
                        candidates,
                    },
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quarry_core::{Language, RerankEntry, Result, SparseWeights};
    use std::time::Duration;

    enum Script {
        Respond(Vec<RerankEntry>),
        Sleep(Duration),
        Fail,
    }

    struct ScriptedInference {
        script: Script,
    }

    #[async_trait]
    impl InferenceService for ScriptedInference {
        async fn embed_dense(&self, _: &[String], _: Duration) -> Result<Vec<Vec<f32>>> {
            Ok(Vec::new())
        }
        async fn embed_sparse(&self, _: &[String], _: Duration) -> Result<Vec<SparseWeights>> {
            Ok(Vec::new())
        }
        async fn embed_both(
            &self,
            _: &[String],
            _: Duration,
        ) -> Result<(Vec<Vec<f32>>, Vec<SparseWeights>)> {
            Ok((Vec::new(), Vec::new()))
        }
        async fn rerank(&self, _: &str, docs: &[String], _: usize) -> Result<Vec<RerankEntry>> {
            match &self.script {
                Script::Respond(entries) => Ok(entries.clone()),
                Script::Sleep(d) => {
                    tokio::time::sleep(*d).await;
                    Ok((0..docs.len())
                        .map(|index| RerankEntry {
                            index,
                            score: 0.5,
                        })
                        .collect())
                }
                Script::Fail => Err(quarry_core::Error::Upstream("model crashed".into())),
            }
        }
        async fn health(&self) -> bool {
            true
        }
    }

    fn results(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| SearchResult {
                doc_id: format!("doc{i}"),
                path: format!("doc{i}.py"),
                language: Language::Python,
                start_line: 1,
                end_line: 5,
                content: format!("content {i}"),
                symbols: vec![],
                final_score: 1.0 - i as f32 * 0.05,
                sparse_score: None,
                dense_score: None,
                sparse_rank: None,
                dense_rank: None,
                rerank_score: None,
                rerank_rank: None,
            })
            .collect()
    }

    fn reranker(script: Script, timeout_ms: u64) -> Reranker {
        let config = RerankConfig {
            enabled: true,
            timeout_ms,
            candidates: 20,
        };
        Reranker::new(Arc::new(ScriptedInference { script }), config)
    }

    #[tokio::test]
    async fn test_timeout_fails_open_preserving_order() {
        let r = reranker(Script::Sleep(Duration::from_millis(500)), 100);
        let input = results(10);
        let expected: Vec<String> = input.iter().map(|r| r.doc_id.clone()).collect();

        let (output, report) = r.rerank("find the auth handler", input).await;

        let got: Vec<String> = output.iter().map(|r| r.doc_id.clone()).collect();
        assert_eq!(got, expected, "fail-open must preserve fused order");
        assert_eq!(report.status, RerankStatus::TimedOut);
        assert_eq!(r.metrics().timeout.load(AtomicOrdering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_error_fails_open() {
        let r = reranker(Script::Fail, 100);
        let input = results(5);
        let expected: Vec<String> = input.iter().map(|r| r.doc_id.clone()).collect();

        let (output, report) = r.rerank("find the auth handler", input).await;

        let got: Vec<String> = output.iter().map(|r| r.doc_id.clone()).collect();
        assert_eq!(got, expected);
        assert_eq!(report.status, RerankStatus::Failed);
    }

    #[tokio::test]
    async fn test_success_reorders_head_and_keeps_tail_scores() {
        // Reverse the top three.
        let entries = vec![
            RerankEntry { index: 0, score: 0.1 },
            RerankEntry { index: 1, score: 0.5 },
            RerankEntry { index: 2, score: 0.9 },
        ];
        let config = RerankConfig {
            enabled: true,
            timeout_ms: 1_000,
            candidates: 3,
        };
        let r = Reranker::new(
            Arc::new(ScriptedInference {
                script: Script::Respond(entries),
            }),
            config,
        );

        let (output, report) = r.rerank("find the auth handler", results(5)).await;
        assert_eq!(report.status, RerankStatus::Applied);

        let got: Vec<&str> = output.iter().map(|r| r.doc_id.as_str()).collect();
        assert_eq!(got, vec!["doc2", "doc3", "doc4", "doc1", "doc0"]);

        let doc2 = &output[0];
        assert_eq!(doc2.final_score, 0.9);
        assert_eq!(doc2.rerank_score, Some(0.9));
        assert_eq!(doc2.rerank_rank, Some(1));

        // The untouched tail keeps its fused scores.
        let doc3 = output.iter().find(|o| o.doc_id == "doc3").unwrap();
        assert_eq!(doc3.final_score, 0.85);
        assert_eq!(doc3.rerank_score, None);
    }

    #[tokio::test]
    async fn test_skip_heuristics() {
        let r = reranker(Script::Fail, 100);

        // Too few results.
        let (_, report) = r.rerank("query text", results(2)).await;
        assert_eq!(report.status, RerankStatus::Skipped);

        // Degenerate query.
        let (_, report) = r.rerank(" a ", results(10)).await;
        assert_eq!(report.status, RerankStatus::Skipped);

        // Dominant top hit.
        let mut dominant = results(5);
        dominant[0].final_score = 10.0;
        dominant[1].final_score = 1.0;
        let (_, report) = r.rerank("query text", dominant).await;
        assert_eq!(report.status, RerankStatus::Skipped);

        assert_eq!(r.metrics().skipped.load(AtomicOrdering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let config = RerankConfig {
            enabled: false,
            timeout_ms: 100,
            candidates: 20,
        };
        let r = Reranker::new(
            Arc::new(ScriptedInference { script: Script::Fail }),
            config,
        );
        let (_, report) = r.rerank("query text", results(10)).await;
        assert_eq!(report.status, RerankStatus::Disabled);
    }
}
