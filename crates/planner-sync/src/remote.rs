//! Contract with the hosted relational store.
//!
//! The engine only needs four per-table operations keyed by user id:
//! select, insert, upsert, and delete-by-id-list. Rows travel as JSON
//! objects; every row carries a `user_id` column.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing, with per-table failure injection
//! - `JsonFileRemote` (in planner-cli) - One JSON file per table on disk

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Duplicate key in {table}: {key}")]
    UniqueViolation { table: String, key: String },

    #[error("Schema mismatch: {0}")]
    Schema(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed row: {0}")]
    Decode(String),

    #[error("Remote error: {0}")]
    Other(String),
}

impl RemoteError {
    /// Errors caused by the server schema lagging behind the client.
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            RemoteError::Schema(_) => true,
            RemoteError::Other(message) | RemoteError::Network(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("column") || message.contains("schema cache")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Remote tables the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Profiles,
    DailyQuests,
    Tasks,
    Flashcards,
    Reflections,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Profiles,
        Table::DailyQuests,
        Table::Tasks,
        Table::Flashcards,
        Table::Reflections,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Profiles => "profiles",
            Table::DailyQuests => "daily_quests",
            Table::Tasks => "tasks",
            Table::Flashcards => "flashcards",
            Table::Reflections => "reflections",
        }
    }

    /// Primary key of `row`. Profiles and quests are one row per user,
    /// reflections one per user and day.
    pub fn primary_key(&self, row: &Value) -> Option<String> {
        let column = |name: &str| row.get(name).and_then(Value::as_str);
        match self {
            Table::Profiles | Table::DailyQuests => column("user_id").map(str::to_string),
            Table::Tasks | Table::Flashcards => column("id").map(str::to_string),
            Table::Reflections => {
                Some(format!("{}/{}", column("user_id")?, column("date")?))
            }
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations on the remote store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// All rows of `table` belonging to `user_id`.
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>>;

    /// Insert a new row. Fails with `UniqueViolation` if the key exists.
    async fn insert(&self, table: Table, row: Value) -> Result<()>;

    /// Insert or update rows by primary key.
    async fn upsert(&self, table: Table, rows: Vec<Value>) -> Result<()>;

    /// Delete rows by primary key.
    async fn delete(&self, table: Table, ids: &[String]) -> Result<()>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<T> {
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>> {
        (**self).select(table, user_id).await
    }

    async fn insert(&self, table: Table, row: Value) -> Result<()> {
        (**self).insert(table, row).await
    }

    async fn upsert(&self, table: Table, rows: Vec<Value>) -> Result<()> {
        (**self).upsert(table, rows).await
    }

    async fn delete(&self, table: Table, ids: &[String]) -> Result<()> {
        (**self).delete(table, ids).await
    }
}

/// Shallow upsert: columns present in `incoming` overwrite those in `existing`.
pub fn merge_row(existing: &mut Value, incoming: Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(target), Value::Object(columns)) => {
            for (column, value) in columns {
                target.insert(column, value);
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

/// Key for `row`, or a decode error naming the table.
pub fn require_key(table: Table, row: &Value) -> Result<String> {
    table
        .primary_key(row)
        .ok_or_else(|| RemoteError::Decode(format!("{} row without primary key", table)))
}

pub fn belongs_to(row: &Value, user_id: &str) -> bool {
    row.get("user_id").and_then(Value::as_str) == Some(user_id)
}

/// Remote operation kinds, for failure injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Upsert,
    Delete,
}

/// In-memory remote store for testing.
#[derive(Default)]
pub struct InMemoryRemote {
    tables: RwLock<HashMap<Table, BTreeMap<String, Value>>>,
    failures: RwLock<HashMap<(Table, Op), RemoteError>>,
    calls: RwLock<HashMap<(Table, Op), usize>>,
    /// Tables whose next select pretends to be empty (simulates a concurrent
    /// creator winning the race).
    stale_selects: RwLock<HashSet<Table>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `op` on `table` fail with `error` until cleared.
    pub fn fail(&self, table: Table, op: Op, error: RemoteError) {
        self.failures.write().unwrap_or_else(|e| e.into_inner()).insert((table, op), error);
    }

    pub fn clear_failures(&self) {
        self.failures.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Next select on `table` returns no rows.
    pub fn stale_next_select(&self, table: Table) {
        self.stale_selects.write().unwrap_or_else(|e| e.into_inner()).insert(table);
    }

    /// Put a row in place without going through the contract.
    pub fn seed(&self, table: Table, row: Value) -> Result<()> {
        let key = require_key(table, &row)?;
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table)
            .or_default()
            .insert(key, row);
        Ok(())
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self, table: Table) -> Vec<String> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn calls(&self, table: Table, op: Op) -> usize {
        self.calls
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(table, op))
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, table: Table, op: Op) -> Result<()> {
        *self.calls.write().unwrap_or_else(|e| e.into_inner()).entry((table, op)).or_default() += 1;
        match self.failures.read().unwrap_or_else(|e| e.into_inner()).get(&(table, op)) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>> {
        self.enter(table, Op::Select)?;
        if self.stale_selects.write().unwrap_or_else(|e| e.into_inner()).remove(&table) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.values()
                    .filter(|row| belongs_to(row, user_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, row: Value) -> Result<()> {
        self.enter(table, Op::Insert)?;
        let key = require_key(table, &row)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let rows = tables.entry(table).or_default();
        if rows.contains_key(&key) {
            return Err(RemoteError::UniqueViolation {
                table: table.name().to_string(),
                key,
            });
        }
        rows.insert(key, row);
        Ok(())
    }

    async fn upsert(&self, table: Table, rows: Vec<Value>) -> Result<()> {
        self.enter(table, Op::Upsert)?;
        let keyed = rows
            .into_iter()
            .map(|row| Ok((require_key(table, &row)?, row)))
            .collect::<Result<Vec<_>>>()?;

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let stored = tables.entry(table).or_default();
        for (key, row) in keyed {
            match stored.get_mut(&key) {
                Some(existing) => merge_row(existing, row),
                None => {
                    stored.insert(key, row);
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: Table, ids: &[String]) -> Result<()> {
        self.enter(table, Op::Delete)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if let Some(rows) = tables.get_mut(&table) {
            for id in ids {
                rows.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inmemory_remote_basic_operations() {
        let remote = InMemoryRemote::new();

        remote
            .upsert(
                Table::Tasks,
                vec![
                    json!({"id": "t1", "user_id": "a", "title": "One"}),
                    json!({"id": "t2", "user_id": "b", "title": "Two"}),
                ],
            )
            .await
            .unwrap();

        let rows = remote.select(Table::Tasks, "a").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], "One");

        remote
            .upsert(Table::Tasks, vec![json!({"id": "t1", "completed": true})])
            .await
            .unwrap();
        let rows = remote.select(Table::Tasks, "a").await.unwrap();
        assert_eq!(rows[0]["title"], "One");
        assert_eq!(rows[0]["completed"], true);

        remote.delete(Table::Tasks, &["t1".to_string()]).await.unwrap();
        assert!(remote.select(Table::Tasks, "a").await.unwrap().is_empty());
        assert_eq!(remote.keys(Table::Tasks), vec!["t2".to_string()]);
    }

    #[tokio::test]
    async fn test_insert_detects_duplicates() {
        let remote = InMemoryRemote::new();
        let row = json!({"user_id": "a", "name": "Ada"});

        remote.insert(Table::Profiles, row.clone()).await.unwrap();
        let err = remote.insert(Table::Profiles, row).await.unwrap_err();
        assert!(matches!(err, RemoteError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_counts() {
        let remote = InMemoryRemote::new();
        remote.fail(Table::Tasks, Op::Upsert, RemoteError::Network("offline".into()));

        assert!(remote.upsert(Table::Tasks, vec![]).await.is_err());
        assert!(remote.upsert(Table::Flashcards, vec![]).await.is_ok());
        assert_eq!(remote.calls(Table::Tasks, Op::Upsert), 1);

        remote.clear_failures();
        assert!(remote.upsert(Table::Tasks, vec![]).await.is_ok());
    }

    #[test]
    fn test_reflection_key_combines_user_and_date() {
        let row = json!({"user_id": "a", "date": "2025-03-10", "content": {}});
        assert_eq!(
            Table::Reflections.primary_key(&row).as_deref(),
            Some("a/2025-03-10")
        );
    }

    #[test]
    fn test_schema_mismatch_detection() {
        assert!(RemoteError::Schema("profiles.settings".into()).is_schema_mismatch());
        assert!(
            RemoteError::Other("column \"effort\" does not exist".into()).is_schema_mismatch()
        );
        assert!(!RemoteError::Network("timeout".into()).is_schema_mismatch());
    }
}
