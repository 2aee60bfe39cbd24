//! The stores registry: names, descriptions and lifecycle timestamps.
//!
//! Persisted as a single JSON array in the `stores` file under the data
//! directory, replaced atomically on every mutation.

use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;

use quarry_core::{Error, Result, Store};

const MAX_STORE_NAME: usize = 64;

/// Store names travel into file names, collection names and queue names;
/// the character set is restricted accordingly.
pub fn validate_store_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_STORE_NAME {
        return Err(Error::InvalidArgument(format!(
            "store name must be 1..={MAX_STORE_NAME} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidArgument(format!(
            "store name {name:?} may only contain [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}

pub struct StoresRegistry {
    path: PathBuf,
    stores: Mutex<Vec<Store>>,
}

impl StoresRegistry {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Internal(format!("registry: create {}: {e}", parent.display())))?;
        }

        let stores = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|e| Error::Internal(format!("registry: read {}: {e}", path.display())))?;
            serde_json::from_str(&raw)
                .map_err(|e| Error::Internal(format!("registry: parse {}: {e}", path.display())))?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            stores: Mutex::new(stores),
        })
    }

    fn save(&self, stores: &[Store]) -> Result<()> {
        let raw = serde_json::to_vec_pretty(stores)
            .map_err(|e| Error::Internal(format!("registry: serialize: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)
            .map_err(|e| Error::Internal(format!("registry: write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Internal(format!("registry: rename {}: {e}", self.path.display())))?;
        Ok(())
    }

    pub fn create(&self, name: &str, description: &str) -> Result<Store> {
        validate_store_name(name)?;
        let mut stores = self.stores.lock();
        if stores.iter().any(|s| s.name == name) {
            return Err(Error::InvalidArgument(format!(
                "store {name} already exists"
            )));
        }
        let now = Utc::now();
        let store = Store {
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        stores.push(store.clone());
        self.save(&stores)?;
        Ok(store)
    }

    pub fn remove(&self, name: &str) -> Result<Store> {
        let mut stores = self.stores.lock();
        let position = stores
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("store {name}")))?;
        let removed = stores.remove(position);
        self.save(&stores)?;
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Result<Store> {
        self.stores
            .lock()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("store {name}")))
    }

    pub fn list(&self) -> Vec<Store> {
        let mut stores = self.stores.lock().clone();
        stores.sort_by(|a, b| a.name.cmp(&b.name));
        stores
    }

    /// Bump `updated_at` after a successful write operation.
    pub fn touch(&self, name: &str) -> Result<()> {
        let mut stores = self.stores.lock();
        let store = stores
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("store {name}")))?;
        store.updated_at = Utc::now();
        self.save(&stores)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.stores.lock().iter().any(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(validate_store_name("docs-main_01").is_ok());
        assert!(validate_store_name("").is_err());
        assert!(validate_store_name("has space").is_err());
        assert!(validate_store_name("slash/y").is_err());
        assert!(validate_store_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_create_list_remove() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoresRegistry::open(dir.path().join("stores")).unwrap();

        registry.create("beta", "").unwrap();
        registry.create("alpha", "first").unwrap();
        assert!(matches!(
            registry.create("alpha", ""),
            Err(Error::InvalidArgument(_))
        ));

        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        registry.remove("alpha").unwrap();
        assert!(matches!(registry.remove("alpha"), Err(Error::NotFound(_))));
        assert!(!registry.exists("alpha"));
        assert!(registry.exists("beta"));
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stores");
        {
            let registry = StoresRegistry::open(&path).unwrap();
            registry.create("kept", "still here").unwrap();
        }
        let registry = StoresRegistry::open(&path).unwrap();
        let store = registry.get("kept").unwrap();
        assert_eq!(store.description, "still here");
    }

    #[test]
    fn test_touch_updates_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let registry = StoresRegistry::open(dir.path().join("stores")).unwrap();
        let created = registry.create("s", "").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        registry.touch("s").unwrap();
        assert!(registry.get("s").unwrap().updated_at > created.updated_at);
    }
}
