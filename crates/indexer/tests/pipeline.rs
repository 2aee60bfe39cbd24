//! End-to-end indexing pipeline tests over in-memory backends.
//!
//! These drive the real queues, workers and tracker; only the three
//! external collaborators are fakes.

use std::sync::Arc;
use std::time::Duration;

use quarry_chunker::Chunker;
use quarry_config::QueueConfig;
use quarry_core::testing::{HashEmbedInference, InMemoryLexical, InMemoryVector};
use quarry_core::LexicalIndex;
use quarry_indexer::{
    EmbedJobHandler, FileDocument, FileSubstrate, FileTracker, IndexPipeline, LexicalJobHandler,
    QueueManager,
};

struct Harness {
    pipeline: IndexPipeline,
    tracker: Arc<FileTracker>,
    lexical: Arc<InMemoryLexical>,
    vector: Arc<InMemoryVector>,
    manager: Arc<QueueManager>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let tracker = Arc::new(FileTracker::new(dir.path().join("tracking")).unwrap());
    let lexical = Arc::new(InMemoryLexical::new());
    let vector = Arc::new(InMemoryVector::new());
    let inference = Arc::new(HashEmbedInference::default());

    let substrate = Arc::new(FileSubstrate::new(dir.path().join("queues")).unwrap());
    let config = QueueConfig {
        base_backoff_ms: 10,
        max_backoff_ms: 50,
        ..QueueConfig::default()
    };

    let lexical_handler = Arc::new(LexicalJobHandler::new(
        lexical.clone(),
        vector.clone(),
        tracker.clone(),
    ));
    let embed_handler = Arc::new(EmbedJobHandler::new(
        inference,
        vector.clone(),
        tracker.clone(),
        false,
        Duration::from_secs(300),
        3_000,
    ));

    let manager = QueueManager::new(substrate, config, lexical_handler, embed_handler).unwrap();

    let pipeline = IndexPipeline::new(
        Arc::new(Chunker::default()),
        tracker.clone(),
        lexical.clone(),
        vector.clone(),
        manager.clone(),
    );

    Harness {
        pipeline,
        tracker,
        lexical,
        vector,
        manager,
        _dir: dir,
    }
}

fn drained(h: &Harness) -> bool {
    let embed = h.manager.embed_counts();
    let store = h.manager.store_counts("main").expect("store queue");
    embed.pending == 0 && embed.active == 0 && store.pending == 0 && store.active == 0
}

async fn settle(h: &Harness) {
    // Queues drain asynchronously; wait until nothing is pending or active,
    // twice in a row to ride out handoffs between the two queue families.
    for _ in 0..500 {
        if drained(h) {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if drained(h) {
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
async fn test_index_commits_all_layers() {
    let h = harness();

    let receipt = h
        .pipeline
        .index(
            "main",
            &[
                doc("a.py", "def authenticate_user(): pass"),
                doc("b.py", "print('hi')"),
            ],
            false,
        )
        .unwrap();
    assert_eq!(receipt.new_files, 2);
    assert_eq!(receipt.chunks, 2);

    settle(&h).await;

    assert_eq!(h.lexical.doc_count("main"), 2);
    assert_eq!(h.vector.point_count("main"), 2);
    assert!(!h
        .tracker
        .has_file_changed("main", "a.py", "def authenticate_user(): pass")
        .unwrap());
}

#[tokio::test]
async fn test_unchanged_resubmit_is_noop() {
    let h = harness();
    let docs = vec![doc("a.py", "def login(): pass")];

    h.pipeline.index("main", &docs, false).unwrap();
    settle(&h).await;
    let embed_before = h.manager.embed_counts().completed;

    let receipt = h.pipeline.index("main", &docs, false).unwrap();
    assert_eq!(receipt.unchanged_files, 1);
    assert_eq!(receipt.chunks, 0);
    assert!(receipt.embed_job.is_none());

    settle(&h).await;
    assert_eq!(h.manager.embed_counts().completed, embed_before);
}

#[tokio::test]
async fn test_reindex_after_edit_purges_stale_chunks() {
    let h = harness();

    let c1 = "export function login() {\n  return 1;\n}\n";
    h.pipeline.index("main", &[doc("foo.ts", c1)], false).unwrap();
    settle(&h).await;

    let old_ids = h.tracker.chunk_ids("main", "foo.ts").unwrap();
    assert!(!old_ids.is_empty());

    let c2 = "export function login() {\n  return 2;\n}\n\nexport function logout() {\n  return 3;\n}\n";
    let receipt = h.pipeline.index("main", &[doc("foo.ts", c2)], false).unwrap();
    assert_eq!(receipt.changed_files, 1);
    settle(&h).await;

    let new_ids = h.tracker.chunk_ids("main", "foo.ts").unwrap();
    assert!(!new_ids.is_empty());

    for stale in old_ids.iter().filter(|id| !new_ids.contains(id)) {
        assert!(
            !h.vector.contains_doc("main", stale),
            "stale chunk {stale} still in vector store"
        );
    }
    assert!(!h.tracker.has_file_changed("main", "foo.ts", c2).unwrap());
}

#[tokio::test]
async fn test_delete_by_prefix_purges_every_layer() {
    let h = harness();

    h.pipeline
        .index(
            "main",
            &[
                doc("pkg/a/x.py", "def alpha(): pass"),
                doc("pkg/a/y.py", "def beta(): pass"),
                doc("pkg/b/z.py", "def gamma(): pass"),
            ],
            false,
        )
        .unwrap();
    settle(&h).await;
    assert_eq!(h.vector.point_count("main"), 3);

    h.pipeline.delete_prefix("main", "pkg/a/".to_string()).unwrap();
    settle(&h).await;

    let tracked = h.tracker.tracked_paths("main").unwrap();
    assert_eq!(tracked, vec!["pkg/b/z.py"]);
    assert_eq!(h.vector.point_count("main"), 1);

    let hits = h.lexical.search("main", "alpha beta", 10, None).await.unwrap();
    assert!(hits.is_empty(), "pkg/a content still searchable");
    let hits = h.lexical.search("main", "gamma", 10, None).await.unwrap();
    assert_eq!(hits.len(), 1, "pkg/b unaffected");
}

#[tokio::test]
async fn test_delete_paths_removes_tracked_chunks() {
    let h = harness();
    h.pipeline
        .index("main", &[doc("gone.py", "def gone(): pass")], false)
        .unwrap();
    settle(&h).await;
    let ids = h.tracker.chunk_ids("main", "gone.py").unwrap();

    h.pipeline
        .delete_paths("main", vec!["gone.py".to_string()])
        .unwrap();
    settle(&h).await;

    assert!(h.tracker.tracked_paths("main").unwrap().is_empty());
    for id in ids {
        assert!(!h.vector.contains_doc("main", &id));
    }
}

#[tokio::test]
async fn test_sync_removes_missing_paths() {
    let h = harness();
    h.pipeline
        .index(
            "main",
            &[doc("keep.py", "def keep(): pass"), doc("gone.py", "def gone(): pass")],
            false,
        )
        .unwrap();
    settle(&h).await;

    let removed = h.pipeline.sync("main", &["keep.py".to_string()]).unwrap();
    assert_eq!(removed, 1);
    settle(&h).await;

    assert_eq!(h.tracker.tracked_paths("main").unwrap(), vec!["keep.py"]);
}

#[tokio::test]
async fn test_reindex_clears_store_state() {
    let h = harness();
    h.pipeline
        .index("main", &[doc("old.py", "def old(): pass")], false)
        .unwrap();
    settle(&h).await;

    h.pipeline
        .reindex("main", &[doc("new.py", "def fresh(): pass")])
        .await
        .unwrap();
    settle(&h).await;

    let tracked = h.tracker.tracked_paths("main").unwrap();
    assert_eq!(tracked, vec!["new.py"]);
    let stats = h.lexical.stats("main").await.unwrap();
    assert_eq!(stats.num_docs, 1);
}

#[tokio::test]
async fn test_binary_and_empty_files_skipped() {
    let h = harness();
    let receipt = h
        .pipeline
        .index(
            "main",
            &[doc("blob.bin", "x\0y"), doc("empty.txt", "   ")],
            false,
        )
        .unwrap();
    assert_eq!(receipt.skipped_files, 2);
    assert_eq!(receipt.chunks, 0);
    assert!(receipt.lexical_job.is_none());
}

#[tokio::test]
async fn test_idempotent_upsert_no_duplicate_points() {
    let h = harness();
    let docs = vec![doc("a.py", "def stable(): pass")];

    h.pipeline.index("main", &docs, true).unwrap();
    settle(&h).await;
    let count_first = h.vector.point_count("main");

    // Force a full re-run of the same content.
    h.pipeline.index("main", &docs, true).unwrap();
    settle(&h).await;

    assert_eq!(h.vector.point_count("main"), count_first);
}
