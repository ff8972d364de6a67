//! # Persistent key-value store
//! String-keyed collaborator behind the feed cache. Persistence is
//! best-effort: a store that cannot read or write simply loses state, and
//! callers treat missing state as a cache miss rather than an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// Process-local store. Used in tests and as the default when no data
/// directory is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .insert(key.to_string(), value.to_string());
    }
}

/// One-file JSON store: the whole map is loaded at startup and rewritten on
/// every `set`. Read and write failures are logged and absorbed.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<HashMap<String, String>>(&raw).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), error = %e, "store file unreadable, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            inner: Mutex::new(map),
        }
    }

    fn flush(&self, map: &HashMap<String, String>) {
        let json = match serde_json::to_string(map) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "store serialization failed");
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, json) {
            tracing::warn!(path = %self.path.display(), error = %e, "store write failed");
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("file store mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        let mut map = self.inner.lock().expect("file store mutex poisoned");
        map.insert(key.to_string(), value.to_string());
        self.flush(&map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k"), None);
        store.set("k", "v1");
        store.set("k", "v2");
        assert_eq!(store.get("k"), Some("v2".to_string()));
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("azdo-newsfeed-store-{}", std::process::id()));
        let path = dir.join("kv.json");
        let _ = std::fs::remove_file(&path);

        let store = JsonFileStore::open(&path);
        store.set("feed", "{\"posts\":[]}");
        drop(store);

        let reopened = JsonFileStore::open(&path);
        assert_eq!(reopened.get("feed"), Some("{\"posts\":[]}".to_string()));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join(format!("azdo-newsfeed-corrupt-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("kv.json");
        std::fs::write(&path, "not json").expect("write fixture");

        let store = JsonFileStore::open(&path);
        assert_eq!(store.get("anything"), None);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
