//! User-visible sync status.

use crate::remote::RemoteError;

use serde::Serialize;
use std::fmt;

/// Message shown instead of the raw error when the server schema is behind.
pub const SCHEMA_MISMATCH_MESSAGE: &str = "Sync failed: the server database is out of date.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum SyncStatus {
    /// Nothing has happened yet in this session.
    #[default]
    Idle,
    Loading,
    Saving,
    Saved,
    /// Last load or push failed; carries a message fit for display.
    Error(String),
}

impl SyncStatus {
    pub fn from_error(error: &RemoteError) -> Self {
        SyncStatus::Error(user_message(error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, SyncStatus::Error(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => f.write_str("idle"),
            SyncStatus::Loading => f.write_str("loading"),
            SyncStatus::Saving => f.write_str("saving"),
            SyncStatus::Saved => f.write_str("saved"),
            SyncStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Display text for a remote failure.
pub fn user_message(error: &RemoteError) -> String {
    if error.is_schema_mismatch() {
        SCHEMA_MISMATCH_MESSAGE.to_string()
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_errors_get_generic_message() {
        let status = SyncStatus::from_error(&RemoteError::Schema("tasks.effort".into()));
        assert_eq!(status, SyncStatus::Error(SCHEMA_MISMATCH_MESSAGE.into()));
    }

    #[test]
    fn test_other_errors_keep_their_message() {
        let status = SyncStatus::from_error(&RemoteError::Network("timeout".into()));
        assert_eq!(status.to_string(), "error: Network error: timeout");
        assert!(status.is_error());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SyncStatus::Saved).unwrap();
        assert_eq!(json, r#"{"state":"saved"}"#);

        let json = serde_json::to_string(&SyncStatus::Error("boom".into())).unwrap();
        assert_eq!(json, r#"{"state":"error","message":"boom"}"#);
    }
}
