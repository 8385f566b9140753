//! File-backed storage tier.
//!
//! Each tier is one pretty-printed JSON object of string keys to string
//! values, e.g. `~/.planner/local_storage.json`. Every write goes straight
//! to disk.

use planner_sync::storage::{Result, Storage, StorageError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

pub const DURABLE_FILE: &str = "local_storage.json";
pub const SESSION_FILE: &str = "session_storage.json";

pub struct NativeStorage {
    /// Path to the storage file.
    path: PathBuf,
    /// In-memory cache.
    entries: RwLock<BTreeMap<String, String>>,
}

impl NativeStorage {
    /// Open the tier at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match Self::load(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Starting with empty storage, could not read {:?}: {}", path, e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(path).map_err(|e| StorageError::Io(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        fs::write(&self.path, contents).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl Storage for NativeStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.remove(key).is_some() {
            self.save(&entries)?;
        }
        Ok(())
    }
}
