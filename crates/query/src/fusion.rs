//! Reciprocal rank fusion with confidence weighting and code boosts.
//!
//! Fusion is written against the "ranked retriever" capability: each
//! modality contributes a list of `(doc_id, score, rank)` and nothing else.
//! Adding a modality means adding a leg in the coordinator and a weight
//! here.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use quarry_config::SearchConfig;
use quarry_core::{Hit, SearchResult};

/// Path-like fragments in a query: `a/b`, `src/auth/login.py`, `..\x\y`.
static PATH_FRAGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w\-.]+(?:[/\\][\w\-.]+)+").unwrap());

/// Bare filenames: `login.py`, `Makefile.am`.
static FILENAME_FRAGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[\w\-]+\.\w+\b").unwrap());

/// Fusion products plus the telemetry the engine records about the pass.
#[derive(Debug)]
pub struct FusionOutcome {
    pub results: Vec<SearchResult>,
    pub sparse_weight: f32,
    pub dense_weight: f32,
    /// Total query-term ∩ chunk-symbol matches across fused results.
    pub symbol_matches: usize,
    pub path_boost_applied: bool,
    /// Top-20 overlap ratio between the two modalities.
    pub overlap: f32,
    pub sparse_confidence: Option<f32>,
    pub dense_confidence: Option<f32>,
}

pub struct Fuser {
    config: SearchConfig,
}

impl Fuser {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    /// Per-modality result confidence from its raw score distribution:
    /// half the weight on the gap between the top two scores, the rest on
    /// score spread and result count.
    fn modality_confidence(hits: &[Hit]) -> f32 {
        if hits.is_empty() {
            return 0.0;
        }

        let top_scores: Vec<f32> = hits.iter().take(10).map(|h| h.score).collect();
        let top = top_scores[0];
        let second = top_scores.get(1).copied().unwrap_or(0.0);
        let normalized_gap = if top > 0.0 { (top - second) / top } else { 0.0 };

        let mean = top_scores.iter().sum::<f32>() / top_scores.len() as f32;
        let variance = top_scores
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f32>()
            / top_scores.len() as f32;
        let std = variance.sqrt();
        let std_over_mean = if mean > 0.0 { (std / mean).min(1.0) } else { 1.0 };

        let count_term = (hits.len() as f32 / 20.0).min(1.0);

        0.5 * normalized_gap + 0.3 * (1.0 - std_over_mean) + 0.2 * count_term
    }

    /// Top-20 overlap ratio between the two ranked lists.
    fn overlap_ratio(sparse: &[Hit], dense: &[Hit]) -> f32 {
        if sparse.is_empty() || dense.is_empty() {
            return 0.0;
        }
        let a: HashSet<&str> = sparse.iter().take(20).map(|h| h.doc_id.as_str()).collect();
        let b: HashSet<&str> = dense.iter().take(20).map(|h| h.doc_id.as_str()).collect();
        let intersection = a.intersection(&b).count() as f32;
        intersection / a.len().min(b.len()) as f32
    }

    /// Compute the effective modality weights for this query.
    fn weights(
        &self,
        sparse: &[Hit],
        dense: &[Hit],
    ) -> (f32, f32, Option<f32>, Option<f32>, f32) {
        let mut w_s = self.config.sparse_weight;
        let mut w_d = self.config.dense_weight;
        let overlap = Self::overlap_ratio(sparse, dense);

        let mut sparse_confidence = None;
        let mut dense_confidence = None;

        if self.config.confidence_weighting {
            let cs = Self::modality_confidence(sparse);
            let cd = Self::modality_confidence(dense);
            sparse_confidence = Some(cs);
            dense_confidence = Some(cd);

            if cs > 0.0 && cd > 0.0 {
                let total = cs + cd;
                let adjust = |w: f32, c: f32| -> f32 {
                    let shifted = w * (1.0 + (c / total - 0.5) * self.config.max_boost);
                    shifted
                        .max(self.config.min_weight)
                        .min(w * self.config.max_boost)
                };
                w_s = adjust(w_s, cs);
                w_d = adjust(w_d, cd);
            }

            if overlap > self.config.overlap_threshold {
                let bonus = 1.0 + overlap * 0.2;
                w_s *= bonus;
                w_d *= bonus;
            }

            let sum = w_s + w_d;
            if sum > 0.0 {
                w_s /= sum;
                w_d /= sum;
            }
        }

        (w_s, w_d, sparse_confidence, dense_confidence, overlap)
    }

    /// Fuse the two ranked lists for `query`.
    pub fn fuse(&self, query: &str, sparse: &[Hit], dense: &[Hit]) -> FusionOutcome {
        let (w_s, w_d, sparse_confidence, dense_confidence, overlap) =
            self.weights(sparse, dense);
        let k = self.config.rrf_k;

        let mut by_doc: HashMap<String, SearchResult> = HashMap::new();

        for hit in sparse {
            let rrf = w_s / (k + hit.rank as f32);
            let entry = by_doc
                .entry(hit.doc_id.clone())
                .or_insert_with(|| SearchResult::from_hit(hit.clone()));
            entry.sparse_score = Some(hit.score);
            entry.sparse_rank = Some(hit.rank);
            entry.final_score = rrf;
        }

        for hit in dense {
            let rrf = w_d / (k + hit.rank as f32);
            let entry = by_doc.entry(hit.doc_id.clone()).or_insert_with(|| {
                let mut result = SearchResult::from_hit(hit.clone());
                result.final_score = 0.0;
                result
            });
            entry.dense_score = Some(hit.score);
            entry.dense_rank = Some(hit.rank);
            entry.final_score += rrf;
        }

        let query_terms: HashSet<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .flat_map(|t| {
                // Treat snake_case fragments as both whole and split terms.
                let t = t.to_lowercase();
                let mut v = Vec::new();
                if !t.is_empty() {
                    for part in t.split('_').filter(|p| !p.is_empty()) {
                        v.push(part.to_string());
                    }
                    v.push(t);
                }
                v
            })
            .collect();

        let path_fragments: Vec<String> = PATH_FRAGMENT
            .find_iter(query)
            .chain(FILENAME_FRAGMENT.find_iter(query))
            .map(|m| m.as_str().to_lowercase())
            .collect();

        let mut symbol_matches = 0usize;
        let mut path_boost_applied = false;

        let mut results: Vec<SearchResult> = by_doc
            .into_values()
            .map(|mut result| {
                let matched = result
                    .symbols
                    .iter()
                    .filter(|s| query_terms.contains(&s.to_lowercase()))
                    .count();
                if matched > 0 {
                    symbol_matches += matched;
                    result.final_score *=
                        self.config.symbol_boost.powi(matched.min(3) as i32);
                }

                if !path_fragments.is_empty() {
                    let path = result.path.to_lowercase();
                    if path_fragments.iter().any(|f| path.contains(f.as_str())) {
                        result.final_score *= self.config.path_boost;
                        path_boost_applied = true;
                    }
                }

                result
            })
            .collect();

        results.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        FusionOutcome {
            results,
            sparse_weight: w_s,
            dense_weight: w_d,
            symbol_matches,
            path_boost_applied,
            overlap,
            sparse_confidence,
            dense_confidence,
        }
    }
}
