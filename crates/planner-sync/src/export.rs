//! Local JSON backup of the live snapshot.

use crate::model::Snapshot;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// A rendered backup, ready to be written wherever the caller likes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub file_name: String,
    pub json: String,
}

pub fn file_name(today: NaiveDate) -> String {
    format!("planner-backup-{}.json", today.format("%Y-%m-%d"))
}

/// Serialize `snapshot` as-is, pretty printed.
pub fn export_snapshot(snapshot: &Snapshot, today: NaiveDate) -> Result<Export> {
    let json = serde_json::to_string_pretty(snapshot)
        .map_err(|e| ExportError::Serialization(e.to_string()))?;
    Ok(Export {
        file_name: file_name(today),
        json,
    })
}
