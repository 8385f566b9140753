//! Key/value storage tiers for client-side state.
//!
//! Two tiers exist at runtime: a durable one (survives restarts, "remember
//! me") and a session-scoped one. Both sit behind the same [`Storage`] trait.
//!
//! Implementations:
//! - `MemoryStorage` - For testing and for session tiers
//! - `NativeStorage` (in planner-cli) - JSON file on disk

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Well-known storage keys.
pub mod keys {
    /// Remembered identity (durable tier).
    pub const USER: &str = "planner.user";
    /// Identity for this session only (session tier).
    pub const SESSION_USER: &str = "planner.session_user";
    /// Calendar day of the last load, for the daily quest reset (durable tier).
    pub const LAST_SEEN_DATE: &str = "planner.last_seen_date";
    /// Mirror of the current settings for presentation-only consumers (durable tier).
    pub const SETTINGS: &str = "planner.settings";
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// String key/value storage.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read `key` and parse it as JSON. Missing keys and unparseable values are
/// both reported as `None`; storage failures are errors.
pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> Result<Option<T>> {
    let Some(raw) = storage.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::debug!("Ignoring unparseable value under {}: {}", key, e);
            Ok(None)
        }
    }
}

pub fn write_json<T: Serialize>(storage: &dyn Storage, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Serialization(e.to_string()))?;
    storage.set(key, &raw)
}

/// In-memory storage for tests and session tiers.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

// Lets tests keep a handle on a tier they hand to the session.
impl<T: Storage> Storage for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}
