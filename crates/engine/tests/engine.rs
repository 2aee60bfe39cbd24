//! End-to-end engine scenarios over in-memory backends.
//!
//! The real chunker, tracker, queues, fusion, reranker and telemetry run;
//! only the inference service, vector store and lexical index are fakes.

use std::sync::Arc;
use std::time::Duration;

use quarry_config::Settings;
use quarry_core::testing::{HashEmbedInference, InMemoryLexical, InMemoryVector};
use quarry_core::Error;
use quarry_engine::{DeleteSelector, Engine, SearchRequest};
use quarry_indexer::FileDocument;

struct Harness {
    engine: Engine,
    inference: Arc<HashEmbedInference>,
    _dir: tempfile::TempDir,
}

fn harness_with(mutate: impl FnOnce(&mut Settings)) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.storage.data_dir = dir.path().to_path_buf();
    settings.queue.base_backoff_ms = 10;
    settings.queue.max_backoff_ms = 50;
    mutate(&mut settings);

    let inference = Arc::new(HashEmbedInference::default());
    let engine = Engine::with_backends(
        settings,
        Arc::new(InMemoryLexical::new()),
        Arc::new(InMemoryVector::new()),
        inference.clone(),
    )
    .unwrap();

    Harness {
        engine,
        inference,
        _dir: dir,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

async fn settle(h: &Harness, store: &str) {
    for _ in 0..500 {
        if h.engine.queues_idle(store).unwrap() {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if h.engine.queues_idle(store).unwrap() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queues did not settle");
}

fn doc(path: &str, content: &str) -> FileDocument {
    FileDocument::new(path, content)
}

#[tokio::test]
async fn test_e1_pure_lexical_win_with_symbol_boost() {
    let h = harness();
    h.engine.create_store("main", "").await.unwrap();

    h.engine
        .index(
            "main",
            &[
                doc("a.py", "def authenticate_user(): pass"),
                doc("b.py", "print('hi')"),
            ],
            false,
        )
        .unwrap();
    settle(&h, "main").await;

    let response = h
        .engine
        .search(SearchRequest::new("authenticate_user", "main"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].result.path, "a.py");
    assert!(response.results[0].result.final_score > 0.0);

    let record = h.engine.telemetry().last().unwrap();
    assert!(record.symbol_matches >= 1, "symbol boost must have applied");
}

#[tokio::test]
async fn test_e2_path_boost() {
    let h = harness();
    h.engine.create_store("main", "").await.unwrap();

    let mut docs = vec![doc(
        "src/auth/login.py",
        "def login(user):\n    return check_auth(user)\n",
    )];
    for i in 0..10 {
        docs.push(doc(
            &format!("src/misc/util_{i}.py"),
            &format!("def helper_{i}():\n    return {i}\n"),
        ));
    }
    h.engine.index("main", &docs, false).unwrap();
    settle(&h, "main").await;

    let response = h
        .engine
        .search(SearchRequest::new("auth/login.py", "main"))
        .await
        .unwrap();

    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].result.path, "src/auth/login.py");

    let record = h.engine.telemetry().last().unwrap();
    assert!(record.path_boost_applied);
}

#[tokio::test]
async fn test_e3_rerank_timeout_fails_open() {
    let h = harness_with(|s| {
        s.search.rerank.enabled = true;
        s.search.rerank.timeout_ms = 100;
    });
    h.engine.create_store("main", "").await.unwrap();

    // Ten lookalike candidates so the skip heuristics do not fire.
    let docs: Vec<FileDocument> = (0..10)
        .map(|i| {
            doc(
                &format!("mod_{i}.py"),
                &format!("def session_handler_{i}():\n    return connect_session({i})\n"),
            )
        })
        .collect();
    h.engine.index("main", &docs, false).unwrap();
    settle(&h, "main").await;

    // Fused order without reranking.
    let mut request = SearchRequest::new("session handler connect", "main");
    request.enable_reranking = Some(false);
    let baseline = h.engine.search(request).await.unwrap();
    let expected: Vec<String> = baseline
        .results
        .iter()
        .map(|r| r.result.doc_id.clone())
        .collect();

    // Reranker sleeps past the deadline.
    h.inference.set_rerank_delay(Some(Duration::from_millis(500)));
    let mut request = SearchRequest::new("session handler connect", "main");
    request.enable_reranking = Some(true);
    let response = h.engine.search(request).await.unwrap();

    let got: Vec<String> = response
        .results
        .iter()
        .map(|r| r.result.doc_id.clone())
        .collect();
    assert_eq!(got, expected, "timeout must preserve fused order");
    assert!(!response.reranked);

    let metrics = h.engine.rerank_metrics();
    assert_eq!(
        metrics.timeout.load(std::sync::atomic::Ordering::Relaxed),
        1
    );
    let record = h.engine.telemetry().last().unwrap();
    assert!(record.rerank_timed_out);
}

#[tokio::test]
async fn test_rerank_applies_when_fast() {
    let h = harness_with(|s| {
        s.search.rerank.enabled = true;
        s.search.rerank.timeout_ms = 1_000;
    });
    h.engine.create_store("main", "").await.unwrap();

    let docs: Vec<FileDocument> = (0..6)
        .map(|i| {
            doc(
                &format!("mod_{i}.py"),
                &format!("def handler_{i}():\n    return {i}\n"),
            )
        })
        .collect();
    h.engine.index("main", &docs, false).unwrap();
    settle(&h, "main").await;

    let response = h
        .engine
        .search(SearchRequest::new("handler return", "main"))
        .await
        .unwrap();
    assert!(response.reranked);
    assert!(response.results[0].result.rerank_score.is_some());
}

#[tokio::test]
async fn test_e6_classification_types() {
    let h = harness();

    let natural = h
        .engine
        .search(SearchRequest::new("how does authentication work", "none"))
        .await
        .unwrap();
    assert_eq!(natural.query_type, "natural");
    assert!(natural.classification_confidence >= 0.7);

    let code = h
        .engine
        .search(SearchRequest::new("def authenticate_user(", "none"))
        .await
        .unwrap();
    assert_eq!(code.query_type, "code");
    assert!(code.classification_confidence >= 0.6);

    let hybrid = h
        .engine
        .search(SearchRequest::new("login page slow", "none"))
        .await
        .unwrap();
    assert_eq!(hybrid.query_type, "hybrid");
    assert!(hybrid.classification_confidence > 0.5);
}

#[tokio::test]
async fn test_search_unknown_store_is_empty() {
    let h = harness();
    let response = h
        .engine
        .search(SearchRequest::new("anything", "ghost"))
        .await
        .unwrap();
    assert!(response.results.is_empty());
}

#[tokio::test]
async fn test_results_sorted_and_display_bounded() {
    let h = harness();
    h.engine.create_store("main", "").await.unwrap();

    let docs: Vec<FileDocument> = (0..8)
        .map(|i| doc(&format!("f{i}.py"), &format!("def search_thing_{i}(): pass")))
        .collect();
    h.engine.index("main", &docs, false).unwrap();
    settle(&h, "main").await;

    let response = h
        .engine
        .search(SearchRequest::new("search thing", "main"))
        .await
        .unwrap();

    let scores: Vec<f32> = response.results.iter().map(|r| r.result.final_score).collect();
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1], "results must be sorted descending");
    }
    for hit in &response.results {
        assert!((12..=100).contains(&hit.display_score));
        assert_ne!(hit.display_score, 0);
    }
}

#[tokio::test]
async fn test_store_lifecycle_and_stats() {
    let h = harness();
    h.engine.create_store("docs", "documentation").await.unwrap();

    assert!(matches!(
        h.engine.create_store("docs", "").await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        h.engine.create_store("bad name!", "").await,
        Err(Error::InvalidArgument(_))
    ));

    h.engine
        .index("docs", &[doc("readme.md", "installation and usage notes")], false)
        .unwrap();
    settle(&h, "docs").await;

    let stats = h.engine.get_store_stats("docs").await.unwrap();
    assert_eq!(stats.value.tracked_files, 1);
    assert_eq!(stats.value.lexical.num_docs, 1);
    assert_eq!(stats.value.vector_points, 1);

    h.engine.delete_store("docs").await.unwrap();
    assert!(h.engine.list_stores().is_empty());
    assert!(matches!(
        h.engine.get_store_stats("docs").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_index_unknown_store_rejected() {
    let h = harness();
    assert!(matches!(
        h.engine.index("nope", &[doc("a.py", "x = 1")], false),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_delete_prefix_end_to_end() {
    let h = harness();
    h.engine.create_store("main", "").await.unwrap();
    h.engine
        .index(
            "main",
            &[
                doc("pkg/a/one.py", "def shared_token_one(): pass"),
                doc("pkg/b/two.py", "def shared_token_two(): pass"),
            ],
            false,
        )
        .unwrap();
    settle(&h, "main").await;

    h.engine
        .delete("main", DeleteSelector::Prefix("pkg/a/".to_string()))
        .unwrap();
    settle(&h, "main").await;

    let mut request = SearchRequest::new("shared token", "main");
    request.filter = Some(quarry_core::SearchFilter::new().path_contains("pkg/a/"));
    let filtered = h.engine.search(request).await.unwrap();
    assert!(filtered.results.is_empty());

    let all = h
        .engine
        .search(SearchRequest::new("shared token", "main"))
        .await
        .unwrap();
    assert_eq!(all.results.len(), 1);
    assert_eq!(all.results[0].result.path, "pkg/b/two.py");
}

#[tokio::test]
async fn test_empty_query_is_invalid() {
    let h = harness();
    assert!(matches!(
        h.engine.search(SearchRequest::new("   ", "main")).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_telemetry_records_queries() {
    let h = harness();
    h.engine.create_store("main", "").await.unwrap();
    h.engine
        .index("main", &[doc("a.py", "def traced(): pass")], false)
        .unwrap();
    settle(&h, "main").await;

    for _ in 0..3 {
        h.engine
            .search(SearchRequest::new("traced", "main"))
            .await
            .unwrap();
    }

    assert_eq!(h.engine.telemetry().len(), 3);
    let export = h.engine.telemetry().export_text();
    assert!(export.contains("quarry_queries_total 3"));
}

#[tokio::test]
async fn test_hybrid_mode_search() {
    let h = harness_with(|s| {
        s.vector.hybrid = true;
    });
    h.engine.create_store("main", "").await.unwrap();
    h.engine
        .index(
            "main",
            &[
                doc("billing.py", "def charge_invoice(): pass"),
                doc("auth.py", "def verify_token(): pass"),
            ],
            false,
        )
        .unwrap();
    settle(&h, "main").await;

    let response = h
        .engine
        .search(SearchRequest::new("charge_invoice", "main"))
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert_eq!(response.results[0].result.path, "billing.py");
}

#[tokio::test]
async fn test_version_and_health() {
    let h = harness();
    assert!(!Engine::version().is_empty());
    let health = h.engine.health().await;
    assert!(health.healthy && health.inference && health.vector_store);
}
