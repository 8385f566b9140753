//! Remote store backed by a directory of JSON files, one per table.
//!
//! Lets the CLI run against a shared folder (or a second data directory)
//! in place of a hosted database. Each file maps primary key to row.

use async_trait::async_trait;
use planner_sync::remote::{
    RemoteError, RemoteStore, Result, Table, belongs_to, merge_row, require_key,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

type Rows = BTreeMap<String, Value>;

pub struct JsonFileRemote {
    base_path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileRemote {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            lock: Mutex::new(()),
        }
    }

    fn table_path(&self, table: Table) -> PathBuf {
        self.base_path.join(format!("{}.json", table.name()))
    }

    async fn read_table(&self, table: Table) -> Result<Rows> {
        let path = self.table_path(table);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Rows::new()),
            Err(e) => return Err(RemoteError::Network(e.to_string())),
        };
        serde_json::from_str(&contents)
            .map_err(|e| RemoteError::Decode(format!("{}: {}", table, e)))
    }

    async fn write_table(&self, table: Table, rows: &Rows) -> Result<()> {
        fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        let contents =
            serde_json::to_string_pretty(rows).map_err(|e| RemoteError::Other(e.to_string()))?;
        fs::write(self.table_path(table), contents)
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))
    }
}

#[async_trait]
impl RemoteStore for JsonFileRemote {
    async fn select(&self, table: Table, user_id: &str) -> Result<Vec<Value>> {
        let rows = self.read_table(table).await?;
        Ok(rows
            .into_values()
            .filter(|row| belongs_to(row, user_id))
            .collect())
    }

    async fn insert(&self, table: Table, row: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let key = require_key(table, &row)?;
        let mut rows = self.read_table(table).await?;
        if rows.contains_key(&key) {
            return Err(RemoteError::UniqueViolation {
                table: table.name().to_string(),
                key,
            });
        }
        rows.insert(key, row);
        self.write_table(table, &rows).await
    }

    async fn upsert(&self, table: Table, incoming: Vec<Value>) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_table(table).await?;
        for row in incoming {
            let key = require_key(table, &row)?;
            match rows.get_mut(&key) {
                Some(existing) => merge_row(existing, row),
                None => {
                    rows.insert(key, row);
                }
            }
        }
        self.write_table(table, &rows).await
    }

    async fn delete(&self, table: Table, ids: &[String]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut rows = self.read_table(table).await?;
        let before = rows.len();
        for id in ids {
            rows.remove(id);
        }
        if rows.len() != before {
            self.write_table(table, &rows).await?;
        }
        Ok(())
    }
}
