//! Durable key-value storage for session state.
//!
//! The session manager persists its token and user under the keys "token"
//! and "user" so a session survives process restarts. Storage is behind a
//! trait so tests can run against an in-memory map.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Storage capability consumed by the session manager.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// File-backed store: a flat JSON object written through on every mutation.
///
/// A missing or unreadable file is treated as an empty store rather than an
/// error, so a corrupt session file degrades to the anonymous state.
pub struct FileStore {
    path: PathBuf,
    entries: HashMap<String, String>,
}

impl FileStore {
    /// Open the store at `path`, loading any existing entries.
    pub fn open(path: &Path) -> Result<Self> {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    fn persist(&self) {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() && std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(content) = serde_json::to_string_pretty(&self.entries) {
            if let Err(e) = std::fs::write(&self.path, content) {
                eprintln!(
                    "Warning: failed to write session file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

impl SessionStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist();
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.persist();
        }
    }
}

/// In-memory store for tests and `--no-persist` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        assert!(store.get("token").is_none());

        store.set("token", "abc");
        assert_eq!(store.get("token").as_deref(), Some("abc"));

        store.remove("token");
        assert!(store.get("token").is_none());
    }

    #[test]
    fn test_memory_store_remove_missing_is_noop() {
        let mut store = MemoryStore::new();
        store.remove("token");
        assert!(store.get("token").is_none());
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let mut store = FileStore::open(&path).unwrap();
            store.set("token", "tok-1");
            store.set("user", r#"{"username":"alice"}"#);
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("token").as_deref(), Some("tok-1"));
        assert_eq!(store.get("user").as_deref(), Some(r#"{"username":"alice"}"#));
    }

    #[test]
    fn test_file_store_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        {
            let mut store = FileStore::open(&path).unwrap();
            store.set("token", "tok-1");
            store.remove("token");
        }

        let store = FileStore::open(&path).unwrap();
        assert!(store.get("token").is_none());
    }

    #[test]
    fn test_file_store_corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileStore::open(&path).unwrap();
        assert!(store.get("token").is_none());
    }

    #[test]
    fn test_file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("session.json");

        let mut store = FileStore::open(&path).unwrap();
        store.set("token", "tok-1");

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("token").as_deref(), Some("tok-1"));
    }
}
