//! Tantivy-backed implementation of the lexical BM25 contract.
//!
//! One index directory per store under a common root. Queries are tokenized
//! here rather than parsed: user queries routinely contain `(`, `::` or
//! quotes that a query-language parser would reject, and BM25 over the bag
//! of terms is what the fusion layer expects.
//!
//! The job queue guarantees a single writer per store; this adapter still
//! serializes its own writer handle so that misuse cannot corrupt an index.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, STORED, STRING, TEXT,
};
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, Term};

use quarry_config::LexicalConfig;
use quarry_core::{
    Chunk, Error, Hit, Language, LexicalIndex, LexicalStats, Result, SearchFilter,
};

/// Lowercased terms, split the same way tantivy's default analyzer splits
/// indexed text, so query terms and index terms always line up.
fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

#[derive(Clone, Copy)]
struct Fields {
    doc_id: Field,
    path: Field,
    language: Field,
    symbols: Field,
    content: Field,
    start_line: Field,
    end_line: Field,
    chunk_index: Field,
}

struct StoreIndex {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl StoreIndex {
    fn schema() -> (Schema, Fields) {
        let mut builder = Schema::builder();
        let doc_id = builder.add_text_field("doc_id", STRING | STORED);
        let path = builder.add_text_field("path", STRING | STORED);
        let language = builder.add_text_field("language", STRING | STORED);
        let symbols = builder.add_text_field("symbols", TEXT | STORED);
        let content = builder.add_text_field("content", TEXT | STORED);
        let start_line = builder.add_u64_field("start_line", STORED);
        let end_line = builder.add_u64_field("end_line", STORED);
        let chunk_index = builder.add_u64_field("chunk_index", STORED);
        (
            builder.build(),
            Fields {
                doc_id,
                path,
                language,
                symbols,
                content,
                start_line,
                end_line,
                chunk_index,
            },
        )
    }

    fn open(dir: &Path, writer_heap: usize) -> Result<Self> {
        let (schema, fields) = Self::schema();
        let mmap = tantivy::directory::MmapDirectory::open(dir)
            .map_err(|e| Error::Upstream(format!("lexical: open directory: {e}")))?;
        let index = Index::open_or_create(mmap, schema)
            .map_err(|e| Error::Upstream(format!("lexical: open index: {e}")))?;
        let reader = index
            .reader()
            .map_err(|e| Error::Upstream(format!("lexical: reader: {e}")))?;
        let writer = index
            .writer(writer_heap)
            .map_err(|e| Error::Upstream(format!("lexical: writer: {e}")))?;

        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let mut writer = self.writer.lock();

        for chunk in chunks {
            // Upsert semantics on the primary key.
            writer.delete_term(Term::from_field_text(self.fields.doc_id, &chunk.doc_id));

            let mut doc = TantivyDocument::default();
            doc.add_text(self.fields.doc_id, &chunk.doc_id);
            doc.add_text(self.fields.path, &chunk.path);
            doc.add_text(self.fields.language, chunk.language.as_str());
            doc.add_text(self.fields.symbols, chunk.symbols.join(" "));
            doc.add_text(self.fields.content, &chunk.content);
            doc.add_u64(self.fields.start_line, chunk.start_line as u64);
            doc.add_u64(self.fields.end_line, chunk.end_line as u64);
            doc.add_u64(self.fields.chunk_index, chunk.chunk_index as u64);
            writer
                .add_document(doc)
                .map_err(|e| Error::Upstream(format!("lexical: add document: {e}")))?;
        }

        writer
            .commit()
            .map_err(|e| Error::Upstream(format!("lexical: commit: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| Error::Upstream(format!("lexical: reload: {e}")))?;
        Ok(())
    }

    fn delete_terms(&self, field: Field, values: &[String]) -> Result<()> {
        let mut writer = self.writer.lock();
        for value in values {
            writer.delete_term(Term::from_field_text(field, value));
        }
        writer
            .commit()
            .map_err(|e| Error::Upstream(format!("lexical: commit delete: {e}")))?;
        self.reader
            .reload()
            .map_err(|e| Error::Upstream(format!("lexical: reload: {e}")))?;
        Ok(())
    }

    /// Collect doc_ids of documents whose path starts with `prefix`.
    fn doc_ids_with_path_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let searcher = self.reader.searcher();
        let addresses: HashSet<_> = searcher
            .search(&AllQuery, &DocSetCollector)
            .map_err(|e| Error::Upstream(format!("lexical: scan: {e}")))?;

        let mut doc_ids = Vec::new();
        for address in addresses {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Upstream(format!("lexical: fetch doc: {e}")))?;
            let path = text_value(&doc, self.fields.path);
            if path.starts_with(prefix) {
                doc_ids.push(text_value(&doc, self.fields.doc_id));
            }
        }
        Ok(doc_ids)
    }

    fn search(&self, query: &str, top_k: usize, filter: Option<&SearchFilter>) -> Result<Vec<Hit>> {
        let terms = query_terms(query);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        for term in &terms {
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.content, term),
                    IndexRecordOption::WithFreqs,
                )),
            ));
            clauses.push((
                Occur::Should,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.symbols, term),
                    IndexRecordOption::WithFreqs,
                )),
            ));
        }
        let boolean = BooleanQuery::from(clauses);

        // Metadata filters are applied on the stored fields after scoring;
        // over-fetch so a selective filter still fills top_k.
        let fetch = if filter.map_or(false, |f| !f.is_empty()) {
            top_k.saturating_mul(4)
        } else {
            top_k
        };

        let searcher = self.reader.searcher();
        let top_docs = searcher
            .search(&boolean, &TopDocs::with_limit(fetch.max(1)))
            .map_err(|e| Error::Upstream(format!("lexical: search: {e}")))?;

        let mut hits = Vec::with_capacity(top_docs.len().min(top_k));
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| Error::Upstream(format!("lexical: fetch doc: {e}")))?;

            let path = text_value(&doc, self.fields.path);
            let language = Language::parse(&text_value(&doc, self.fields.language));
            if let Some(f) = filter {
                if !f.matches(&path, language) {
                    continue;
                }
            }

            let symbols: Vec<String> = text_value(&doc, self.fields.symbols)
                .split_whitespace()
                .map(str::to_string)
                .collect();

            hits.push(Hit {
                doc_id: text_value(&doc, self.fields.doc_id),
                path,
                language,
                start_line: u64_value(&doc, self.fields.start_line) as usize,
                end_line: u64_value(&doc, self.fields.end_line) as usize,
                content: text_value(&doc, self.fields.content),
                symbols,
                score,
                rank: hits.len() + 1,
            });
            if hits.len() == top_k {
                break;
            }
        }

        Ok(hits)
    }

    fn stats(&self) -> LexicalStats {
        let searcher = self.reader.searcher();
        LexicalStats {
            num_docs: searcher.num_docs(),
            num_segments: searcher.segment_readers().len() as u64,
        }
    }
}

fn text_value(doc: &TantivyDocument, field: Field) -> String {
    match doc.get_first(field) {
        Some(OwnedValue::Str(s)) => s.clone(),
        _ => String::new(),
    }
}

fn u64_value(doc: &TantivyDocument, field: Field) -> u64 {
    match doc.get_first(field) {
        Some(OwnedValue::U64(n)) => *n,
        _ => 0,
    }
}

struct Inner {
    root: PathBuf,
    writer_heap: usize,
    stores: DashMap<String, Arc<StoreIndex>>,
    open_lock: Mutex<()>,
}

impl Inner {
    /// Cached handle for a store. `create` governs the missing-index policy:
    /// reads get `None` (empty result), writes create on first use.
    fn store_index(&self, store: &str, create: bool) -> Result<Option<Arc<StoreIndex>>> {
        if let Some(existing) = self.stores.get(store) {
            return Ok(Some(existing.clone()));
        }

        // Serialize opens: two writers on one directory would fight over
        // tantivy's lockfile.
        let _guard = self.open_lock.lock();
        if let Some(existing) = self.stores.get(store) {
            return Ok(Some(existing.clone()));
        }

        let dir = self.root.join(store);
        if !dir.exists() {
            if !create {
                return Ok(None);
            }
            fs::create_dir_all(&dir)
                .map_err(|e| Error::Upstream(format!("lexical: create {}: {e}", dir.display())))?;
        }

        let opened = Arc::new(StoreIndex::open(&dir, self.writer_heap)?);
        self.stores.insert(store.to_string(), opened.clone());
        Ok(Some(opened))
    }

    fn drop_store(&self, store: &str) -> Result<()> {
        self.stores.remove(store);
        let dir = self.root.join(store);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Upstream(format!(
                "lexical: remove {}: {e}",
                dir.display()
            ))),
        }
    }
}

/// Lexical BM25 adapter over per-store tantivy indexes.
pub struct TantivyLexicalIndex {
    inner: Arc<Inner>,
}

impl TantivyLexicalIndex {
    pub fn new(root: impl Into<PathBuf>, config: &LexicalConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| Error::Upstream(format!("lexical: create {}: {e}", root.display())))?;
        Ok(Self {
            inner: Arc::new(Inner {
                root,
                writer_heap: config.writer_heap_bytes,
                stores: DashMap::new(),
                open_lock: Mutex::new(()),
            }),
        })
    }

    async fn run_blocking<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Inner>) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || task(inner))
            .await
            .map_err(|e| Error::Internal(format!("lexical task panicked: {e}")))?
    }
}

#[async_trait]
impl LexicalIndex for TantivyLexicalIndex {
    async fn index(&self, store: &str, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let store = store.to_string();
        let chunks = chunks.to_vec();
        self.run_blocking(move |inner| {
            let index = inner
                .store_index(&store, true)?
                .ok_or_else(|| Error::Internal("index creation returned nothing".into()))?;
            index.add_chunks(&chunks)?;
            tracing::debug!(store = %store, chunks = chunks.len(), "lexical index commit");
            Ok(())
        })
        .await
    }

    async fn search(
        &self,
        store: &str,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Hit>> {
        let store = store.to_string();
        let query = query.to_string();
        let filter = filter.cloned();
        self.run_blocking(move |inner| match inner.store_index(&store, false)? {
            Some(index) => index.search(&query, top_k, filter.as_ref()),
            None => Ok(Vec::new()),
        })
        .await
    }

    async fn delete_paths(&self, store: &str, paths: &[String]) -> Result<()> {
        let store = store.to_string();
        let paths = paths.to_vec();
        self.run_blocking(move |inner| match inner.store_index(&store, false)? {
            Some(index) => index.delete_terms(index.fields.path, &paths),
            None => Ok(()),
        })
        .await
    }

    async fn delete_doc_ids(&self, store: &str, doc_ids: &[String]) -> Result<()> {
        let store = store.to_string();
        let doc_ids = doc_ids.to_vec();
        self.run_blocking(move |inner| match inner.store_index(&store, false)? {
            Some(index) => index.delete_terms(index.fields.doc_id, &doc_ids),
            None => Ok(()),
        })
        .await
    }

    async fn delete_by_path_prefix(&self, store: &str, prefix: &str) -> Result<()> {
        let store = store.to_string();
        let prefix = prefix.to_string();
        self.run_blocking(move |inner| match inner.store_index(&store, false)? {
            Some(index) => {
                let doc_ids = index.doc_ids_with_path_prefix(&prefix)?;
                if doc_ids.is_empty() {
                    return Ok(());
                }
                index.delete_terms(index.fields.doc_id, &doc_ids)
            }
            None => Ok(()),
        })
        .await
    }

    async fn stats(&self, store: &str) -> Result<LexicalStats> {
        let store = store.to_string();
        self.run_blocking(move |inner| match inner.store_index(&store, false)? {
            Some(index) => Ok(index.stats()),
            None => Err(Error::NotFound(format!("lexical index for store {store}"))),
        })
        .await
    }

    async fn drop_store(&self, store: &str) -> Result<()> {
        let store = store.to_string();
        self.run_blocking(move |inner| inner.drop_store(&store)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::Language;

    fn chunk(doc_id: &str, path: &str, content: &str, symbols: &[&str]) -> Chunk {
        Chunk {
            doc_id: doc_id.to_string(),
            path: path.to_string(),
            language: Language::from_path(path),
            start_line: 1,
            end_line: content.lines().count().max(1),
            content: content.to_string(),
            chunk_index: 0,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            node_type: None,
        }
    }

    fn adapter(dir: &tempfile::TempDir) -> TantivyLexicalIndex {
        TantivyLexicalIndex::new(dir.path(), &LexicalConfig::default()).unwrap()
    }

    #[test]
    fn test_query_terms_survive_code_punctuation() {
        assert_eq!(
            query_terms("def authenticate_user("),
            vec!["def", "authenticate", "user"]
        );
        assert_eq!(query_terms("::<>!!"), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_search_missing_store_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);
        let hits = lexical.search("nothing", "query", 10, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_index_and_search_ranks_matching_doc_first() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);

        lexical
            .index(
                "main",
                &[
                    chunk(
                        "a.py#0#1",
                        "a.py",
                        "def authenticate_user(): pass",
                        &["authenticate_user"],
                    ),
                    chunk("b.py#0#1", "b.py", "print('hi')", &[]),
                ],
            )
            .await
            .unwrap();

        let hits = lexical
            .search("main", "authenticate_user", 10, None)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].path, "a.py");
        assert_eq!(hits[0].rank, 1);
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_reindex_same_doc_id_does_not_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);

        let c = chunk("a.py#0#1", "a.py", "def login(): pass", &["login"]);
        lexical.index("main", &[c.clone()]).await.unwrap();
        lexical.index("main", &[c]).await.unwrap();

        let stats = lexical.stats("main").await.unwrap();
        assert_eq!(stats.num_docs, 1);
    }

    #[tokio::test]
    async fn test_delete_by_path_prefix_is_anchored() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);

        lexical
            .index(
                "main",
                &[
                    chunk("pkg/a/x.py#0#1", "pkg/a/x.py", "alpha content", &[]),
                    chunk("pkg/b/y.py#0#1", "pkg/b/y.py", "alpha content", &[]),
                    chunk("other/pkg/a/z.py#0#1", "other/pkg/a/z.py", "alpha content", &[]),
                ],
            )
            .await
            .unwrap();

        lexical.delete_by_path_prefix("main", "pkg/a/").await.unwrap();

        let hits = lexical.search("main", "alpha", 10, None).await.unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.path.as_str()).collect();
        assert!(!paths.contains(&"pkg/a/x.py"));
        assert!(paths.contains(&"pkg/b/y.py"));
        assert!(
            paths.contains(&"other/pkg/a/z.py"),
            "prefix delete must not behave like substring"
        );
    }

    #[tokio::test]
    async fn test_language_filter() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);

        lexical
            .index(
                "main",
                &[
                    chunk("a.py#0#1", "a.py", "shared token", &[]),
                    chunk("b.rs#0#1", "b.rs", "shared token", &[]),
                ],
            )
            .await
            .unwrap();

        let filter = SearchFilter::new().language(Language::Rust);
        let hits = lexical
            .search("main", "shared", 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.rs");
    }

    #[tokio::test]
    async fn test_stats_missing_store_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);
        assert!(matches!(
            lexical.stats("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_drop_store_then_search_empty() {
        let dir = tempfile::tempdir().unwrap();
        let lexical = adapter(&dir);

        lexical
            .index("main", &[chunk("a.py#0#1", "a.py", "content here", &[])])
            .await
            .unwrap();
        lexical.drop_store("main").await.unwrap();

        let hits = lexical.search("main", "content", 10, None).await.unwrap();
        assert!(hits.is_empty());
    }
}
