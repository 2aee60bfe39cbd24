//! Persistent per-store tracking of indexed files.
//!
//! One JSON document per store under the tracking directory, cached in
//! memory after first access. Saves are atomic (write temp, rename) so a
//! crash can lose at most the in-flight update, never corrupt the file.
//!
//! Only the queue worker mutates a store's tracking state; readers may look
//! at it at any time.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use quarry_core::{Error, Result, TrackedFile};

/// Change classification for a batch of incoming files.
#[derive(Debug, Default, Clone)]
pub struct FileClassification {
    pub new: Vec<String>,
    pub changed: Vec<String>,
    pub unchanged: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    store: String,
    files: HashMap<String, TrackedFile>,
    last_updated: DateTime<Utc>,
}

impl StoreDocument {
    fn empty(store: &str) -> Self {
        Self {
            store: store.to_string(),
            files: HashMap::new(),
            last_updated: Utc::now(),
        }
    }
}

/// Content hash used for change detection: first 16 hex chars of SHA-256.
/// Plenty for "did this file change", never used for integrity.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Tracker over all stores.
pub struct FileTracker {
    dir: PathBuf,
    cache: DashMap<String, StoreDocument>,
}

impl FileTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Internal(format!("tracker: create {}: {e}", dir.display())))?;
        Ok(Self {
            dir,
            cache: DashMap::new(),
        })
    }

    fn store_path(&self, store: &str) -> PathBuf {
        self.dir.join(format!("{store}.json"))
    }

    /// Load a store's document into the cache (idempotent).
    fn ensure_loaded(&self, store: &str) -> Result<()> {
        if self.cache.contains_key(store) {
            return Ok(());
        }
        let path = self.store_path(store);
        let document = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| Error::Internal(format!("tracker: read {}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Internal(format!("tracker: parse {}: {e}", path.display())))?
        } else {
            StoreDocument::empty(store)
        };
        self.cache.insert(store.to_string(), document);
        Ok(())
    }

    /// Atomic write-temp-then-rename of the full store document.
    fn save(&self, store: &str) -> Result<()> {
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal(format!("tracker: save of unloaded store {store}")))?;
        let raw = serde_json::to_vec_pretty(&*document)
            .map_err(|e| Error::Internal(format!("tracker: serialize {store}: {e}")))?;
        drop(document);

        let path = self.store_path(store);
        let tmp = self.dir.join(format!(".{store}.json.tmp"));
        fs::write(&tmp, raw)
            .map_err(|e| Error::Internal(format!("tracker: write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Internal(format!("tracker: rename {}: {e}", path.display())))?;
        Ok(())
    }

    /// Classify incoming `(path, content)` pairs against the stored hashes.
    pub fn check_files(
        &self,
        store: &str,
        files: &[(String, String)],
    ) -> Result<FileClassification> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;

        let mut classification = FileClassification::default();
        for (path, content) in files {
            match document.files.get(path) {
                None => classification.new.push(path.clone()),
                Some(tracked) if tracked.hash == content_hash(content) => {
                    classification.unchanged.push(path.clone())
                }
                Some(_) => classification.changed.push(path.clone()),
            }
        }
        Ok(classification)
    }

    /// True when `path` is untracked or its stored hash differs.
    pub fn has_file_changed(&self, store: &str, path: &str, content: &str) -> Result<bool> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
        Ok(match document.files.get(path) {
            Some(tracked) => tracked.hash != content_hash(content),
            None => true,
        })
    }

    /// Record a successful index of `path` with the given chunk ids.
    pub fn track(
        &self,
        store: &str,
        path: &str,
        content: &str,
        chunk_ids: Vec<String>,
    ) -> Result<()> {
        self.track_hashed(
            store,
            path,
            content_hash(content),
            content.len() as u64,
            chunk_ids,
        )
    }

    /// Like [`FileTracker::track`] with a precomputed hash, for callers that
    /// no longer hold the content (the embedding worker).
    pub fn track_hashed(
        &self,
        store: &str,
        path: &str,
        hash: String,
        size: u64,
        chunk_ids: Vec<String>,
    ) -> Result<()> {
        self.ensure_loaded(store)?;
        {
            let mut document = self
                .cache
                .get_mut(store)
                .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
            document.files.insert(
                path.to_string(),
                TrackedFile {
                    path: path.to_string(),
                    hash,
                    size,
                    indexed_at: Utc::now(),
                    chunk_ids,
                },
            );
            document.last_updated = Utc::now();
        }
        self.save(store)
    }

    /// Forget `path`; returns the chunk ids to delete from the indices.
    pub fn untrack(&self, store: &str, path: &str) -> Result<Vec<String>> {
        self.ensure_loaded(store)?;
        let removed = {
            let mut document = self
                .cache
                .get_mut(store)
                .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
            let removed = document.files.remove(path);
            document.last_updated = Utc::now();
            removed
        };
        self.save(store)?;
        Ok(removed.map(|f| f.chunk_ids).unwrap_or_default())
    }

    /// Forget every path starting with `prefix` (prefix-anchored).
    pub fn untrack_by_prefix(&self, store: &str, prefix: &str) -> Result<Vec<String>> {
        self.ensure_loaded(store)?;
        let chunk_ids = {
            let mut document = self
                .cache
                .get_mut(store)
                .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
            let matching: Vec<String> = document
                .files
                .keys()
                .filter(|p| p.starts_with(prefix))
                .cloned()
                .collect();
            let mut chunk_ids = Vec::new();
            for path in matching {
                if let Some(tracked) = document.files.remove(&path) {
                    chunk_ids.extend(tracked.chunk_ids);
                }
            }
            document.last_updated = Utc::now();
            chunk_ids
        };
        self.save(store)?;
        Ok(chunk_ids)
    }

    /// Tracked paths that are absent from `current_paths`.
    pub fn find_deleted(&self, store: &str, current_paths: &[String]) -> Result<Vec<String>> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
        let current: std::collections::HashSet<&str> =
            current_paths.iter().map(String::as_str).collect();
        Ok(document
            .files
            .keys()
            .filter(|p| !current.contains(p.as_str()))
            .cloned()
            .collect())
    }

    pub fn chunk_ids(&self, store: &str, path: &str) -> Result<Vec<String>> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
        Ok(document
            .files
            .get(path)
            .map(|f| f.chunk_ids.clone())
            .unwrap_or_default())
    }

    pub fn tracked_paths(&self, store: &str) -> Result<Vec<String>> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
        Ok(document.files.keys().cloned().collect())
    }

    pub fn file_count(&self, store: &str) -> Result<usize> {
        self.ensure_loaded(store)?;
        let document = self
            .cache
            .get(store)
            .ok_or_else(|| Error::Internal("tracker: store vanished from cache".into()))?;
        Ok(document.files.len())
    }

    /// Drop all tracking state for a store, in memory and on disk.
    pub fn clear(&self, store: &str) -> Result<()> {
        self.cache.insert(store.to_string(), StoreDocument::empty(store));
        let path = self.store_path(store);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Internal(format!(
                "tracker: remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &tempfile::TempDir) -> FileTracker {
        FileTracker::new(dir.path()).unwrap()
    }

    #[test]
    fn test_content_hash_shape() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hello "));
    }

    #[test]
    fn test_track_then_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);

        t.track("main", "a.py", "content", vec!["a.py#0#x".into()])
            .unwrap();
        assert!(!t.has_file_changed("main", "a.py", "content").unwrap());
        assert!(t.has_file_changed("main", "a.py", "content2").unwrap());
        assert!(t.has_file_changed("main", "b.py", "content").unwrap());
    }

    #[test]
    fn test_check_files_classification() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("main", "old.py", "v1", vec![]).unwrap();
        t.track("main", "same.py", "keep", vec![]).unwrap();

        let files = vec![
            ("old.py".to_string(), "v2".to_string()),
            ("same.py".to_string(), "keep".to_string()),
            ("new.py".to_string(), "fresh".to_string()),
        ];
        let c = t.check_files("main", &files).unwrap();
        assert_eq!(c.changed, vec!["old.py"]);
        assert_eq!(c.unchanged, vec!["same.py"]);
        assert_eq!(c.new, vec!["new.py"]);
    }

    #[test]
    fn test_persistence_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let t = tracker(&dir);
            t.track("main", "a.py", "content", vec!["id1".into(), "id2".into()])
                .unwrap();
        }
        let t = tracker(&dir);
        assert!(!t.has_file_changed("main", "a.py", "content").unwrap());
        assert_eq!(t.chunk_ids("main", "a.py").unwrap(), vec!["id1", "id2"]);
    }

    #[test]
    fn test_untrack_returns_chunk_ids() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("main", "a.py", "content", vec!["id1".into()]).unwrap();

        assert_eq!(t.untrack("main", "a.py").unwrap(), vec!["id1"]);
        assert!(t.untrack("main", "a.py").unwrap().is_empty());
        assert!(t.has_file_changed("main", "a.py", "content").unwrap());
    }

    #[test]
    fn test_untrack_by_prefix_is_anchored() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("main", "pkg/a/x.py", "1", vec!["x".into()]).unwrap();
        t.track("main", "pkg/b/y.py", "2", vec!["y".into()]).unwrap();
        t.track("main", "other/pkg/a/z.py", "3", vec!["z".into()])
            .unwrap();

        let ids = t.untrack_by_prefix("main", "pkg/a/").unwrap();
        assert_eq!(ids, vec!["x"]);
        let mut remaining = t.tracked_paths("main").unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["other/pkg/a/z.py", "pkg/b/y.py"]);
    }

    #[test]
    fn test_find_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("main", "keep.py", "1", vec![]).unwrap();
        t.track("main", "gone.py", "2", vec![]).unwrap();

        let deleted = t
            .find_deleted("main", &["keep.py".to_string()])
            .unwrap();
        assert_eq!(deleted, vec!["gone.py"]);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("main", "a.py", "content", vec![]).unwrap();
        t.clear("main").unwrap();
        assert_eq!(t.file_count("main").unwrap(), 0);
        assert!(!dir.path().join("main.json").exists());
    }

    #[test]
    fn test_stores_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let t = tracker(&dir);
        t.track("alpha", "a.py", "content", vec![]).unwrap();
        assert!(t.has_file_changed("beta", "a.py", "content").unwrap());
    }
}
