//! Per-query telemetry.
//!
//! Records live in a fixed-size ring buffer; aggregate counters use atomic
//! updates; latency percentiles are recomputed as records arrive. The
//! export format is plain `key value` lines, one metric per line, suitable
//! for scraping.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// Summary statistics over one modality's raw scores.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ScoreStats {
    pub mean: f32,
    pub std: f32,
    pub top: f32,
    /// top − second; 0 with fewer than two scores.
    pub gap: f32,
}

impl ScoreStats {
    pub fn from_scores(scores: &[f32]) -> Self {
        if scores.is_empty() {
            return Self::default();
        }
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;
        let variance =
            scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / scores.len() as f32;
        let top = scores[0];
        let second = scores.get(1).copied().unwrap_or(top);
        Self {
            mean,
            std: variance.sqrt(),
            top,
            gap: top - second,
        }
    }
}

/// Everything recorded about one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub store: String,

    pub query_type: String,
    pub classification_confidence: f32,

    pub embed_ms: u64,
    pub sparse_ms: u64,
    pub dense_ms: u64,
    pub fusion_ms: u64,
    pub rerank_ms: u64,
    pub postrank_ms: u64,
    pub total_ms: u64,

    pub sparse_count: usize,
    pub dense_count: usize,
    pub fused_count: usize,
    pub returned_count: usize,

    pub sparse_stats: ScoreStats,
    pub dense_stats: ScoreStats,

    pub embed_cache_hit: bool,
    pub symbol_matches: usize,
    pub path_boost_applied: bool,
    pub reranked: bool,
    pub rerank_timed_out: bool,
    pub warnings: usize,
}

/// P50/P95/P99 of total query latency over the retained window.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Percentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((sorted.len() as f64 - 1.0) * p).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// Process-wide telemetry sink.
pub struct Telemetry {
    capacity: usize,
    ring: RwLock<VecDeque<QueryRecord>>,
    percentiles: RwLock<Percentiles>,

    queries_total: AtomicU64,
    results_returned_total: AtomicU64,
    rerank_applied_total: AtomicU64,
    rerank_timeout_total: AtomicU64,
    warnings_total: AtomicU64,
}

impl Telemetry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ring: RwLock::new(VecDeque::new()),
            percentiles: RwLock::new(Percentiles::default()),
            queries_total: AtomicU64::new(0),
            results_returned_total: AtomicU64::new(0),
            rerank_applied_total: AtomicU64::new(0),
            rerank_timeout_total: AtomicU64::new(0),
            warnings_total: AtomicU64::new(0),
        }
    }

    /// Append a record, evicting the oldest beyond capacity, and refresh
    /// the latency percentiles.
    pub fn record(&self, record: QueryRecord) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        self.results_returned_total
            .fetch_add(record.returned_count as u64, Ordering::Relaxed);
        if record.reranked {
            self.rerank_applied_total.fetch_add(1, Ordering::Relaxed);
        }
        if record.rerank_timed_out {
            self.rerank_timeout_total.fetch_add(1, Ordering::Relaxed);
        }
        self.warnings_total
            .fetch_add(record.warnings as u64, Ordering::Relaxed);

        let mut ring = self.ring.write();
        ring.push_back(record);
        while ring.len() > self.capacity {
            ring.pop_front();
        }

        let mut totals: Vec<u64> = ring.iter().map(|r| r.total_ms).collect();
        totals.sort_unstable();
        *self.percentiles.write() = Percentiles {
            p50: percentile(&totals, 0.50),
            p95: percentile(&totals, 0.95),
            p99: percentile(&totals, 0.99),
        };
    }

    pub fn percentiles(&self) -> Percentiles {
        *self.percentiles.read()
    }

    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent records, newest last.
    pub fn recent(&self, n: usize) -> Vec<QueryRecord> {
        let ring = self.ring.read();
        ring.iter().rev().take(n).rev().cloned().collect()
    }

    /// The latest record, if any.
    pub fn last(&self) -> Option<QueryRecord> {
        self.ring.read().back().cloned()
    }

    /// `key value` lines for scraping.
    pub fn export_text(&self) -> String {
        let p = self.percentiles();
        let mut out = String::new();
        let mut push = |key: &str, value: String| {
            out.push_str(key);
            out.push(' ');
            out.push_str(&value);
            out.push('\n');
        };

        push(
            "quarry_queries_total",
            self.queries_total.load(Ordering::Relaxed).to_string(),
        );
        push(
            "quarry_results_returned_total",
            self.results_returned_total.load(Ordering::Relaxed).to_string(),
        );
        push(
            "quarry_rerank_applied_total",
            self.rerank_applied_total.load(Ordering::Relaxed).to_string(),
        );
        push(
            "quarry_rerank_timeout_total",
            self.rerank_timeout_total.load(Ordering::Relaxed).to_string(),
        );
        push(
            "quarry_search_warnings_total",
            self.warnings_total.load(Ordering::Relaxed).to_string(),
        );
        push("quarry_query_latency_ms_p50", p.p50.to_string());
        push("quarry_query_latency_ms_p95", p.p95.to_string());
        push("quarry_query_latency_ms_p99", p.p99.to_string());
        push("quarry_query_records_retained", self.len().to_string());

        out
    }
}
