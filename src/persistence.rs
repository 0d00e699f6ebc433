use crate::error::{Result, TutorError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

/// String key-value storage owned by the host. The core only reads from it;
/// the binary also writes settings through it.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Read a JSON document stored under `key`.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn save_json<T: Serialize>(store: &mut dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Default location of the file-backed store
pub fn default_store_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| TutorError::Storage("Could not determine config directory".to_string()))?;
    Ok(config_dir.join("ai-tutor").join("store.json"))
}

/// All keys live in one JSON object on disk.
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        debug!("Loading store from {}", self.path.display());
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            TutorError::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        if json.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    fn write_all(&self, values: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TutorError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        debug!("Saving store to {}", self.path.display());
        let json = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, json).map_err(|e| {
            TutorError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and one-off runs
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    values: HashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_file_store_round_trip() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let mut store = FileKeyValueStore::new(path.clone());
        assert_eq!(store.get("settings")?, None);

        save_json(&mut store, "settings", &json!({"tutor_mode": "exam"}))?;
        store.set("other", "value")?;

        let reopened = FileKeyValueStore::new(path);
        let loaded: Option<serde_json::Value> = load_json(&reopened, "settings")?;
        assert_eq!(loaded, Some(json!({"tutor_mode": "exam"})));
        assert_eq!(reopened.get("other")?.as_deref(), Some("value"));
        Ok(())
    }

    #[test]
    fn test_file_store_remove() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileKeyValueStore::new(dir.path().join("store.json"));
        store.set("a", "1")?;
        store.remove("a")?;
        store.remove("missing")?;
        assert_eq!(store.get("a")?, None);
        Ok(())
    }

    #[test]
    fn test_corrupt_document_is_an_error() {
        let mut store = MemoryKeyValueStore::new();
        store.set("settings", "{not json").unwrap();
        let loaded: Result<Option<serde_json::Value>> = load_json(&store, "settings");
        assert!(matches!(loaded, Err(TutorError::Json(_))));
    }
}
