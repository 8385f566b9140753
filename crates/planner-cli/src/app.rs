//! Builds a [`Session`] over on-disk storage tiers and a file-backed remote.

use crate::file_remote::JsonFileRemote;
use crate::native_storage::{DURABLE_FILE, NativeStorage, SESSION_FILE};

use anyhow::{Context, Result};
use planner_sync::{IdentityGate, Session, Subscription, SyncConfig, SyncEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub type CliSession = Session<JsonFileRemote, NativeStorage, NativeStorage>;

/// Where the CLI keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerDirs {
    /// Local storage tiers.
    pub data: PathBuf,
    /// Table files standing in for the hosted database.
    pub remote: PathBuf,
}

impl PlannerDirs {
    /// Explicit directories win; otherwise `~/.planner` and its `remote/`.
    pub fn resolve(data: Option<PathBuf>, remote: Option<PathBuf>) -> Result<Self> {
        let data = match data {
            Some(data) => data,
            None => dirs::home_dir()
                .context("Could not determine home directory; pass --data-dir")?
                .join(".planner"),
        };
        let remote = remote.unwrap_or_else(|| data.join("remote"));
        Ok(Self { data, remote })
    }
}

pub fn open_session(dirs: &PlannerDirs, config: SyncConfig) -> CliSession {
    let gate = IdentityGate::new(
        NativeStorage::open(dirs.data.join(DURABLE_FILE)),
        NativeStorage::open(dirs.data.join(SESSION_FILE)),
    );
    let engine = Arc::new(SyncEngine::new(JsonFileRemote::new(&dirs.remote)));
    Session::new(gate, engine, config)
}

/// Hand every sync event to `sink` as a JSON line.
pub fn forward_events(
    session: &CliSession,
    sink: impl Fn(String) + Send + Sync + 'static,
) -> Subscription {
    session
        .engine()
        .events()
        .subscribe(move |event| match serde_json::to_string(&event) {
            Ok(line) => sink(line),
            Err(e) => warn!("Could not serialize sync event: {}", e),
        })
}

/// Log sync events at debug level for `--verbose` runs.
pub fn trace_events(session: &CliSession) -> Subscription {
    forward_events(session, |line| debug!(target: "planner::events", "{}", line))
}

/// Write the backup file into `dir` and return its path.
pub async fn write_export(session: &CliSession, dir: &Path) -> Result<PathBuf> {
    let export = session.export()?;
    let path = dir.join(&export.file_name);
    tokio::fs::write(&path, export.json)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_remote_defaults_under_data_dir() {
        let dirs = PlannerDirs::resolve(Some(PathBuf::from("/tmp/p")), None).unwrap();
        assert_eq!(dirs.remote, PathBuf::from("/tmp/p/remote"));

        let dirs = PlannerDirs::resolve(
            Some(PathBuf::from("/tmp/p")),
            Some(PathBuf::from("/srv/shared")),
        )
        .unwrap();
        assert_eq!(dirs.remote, PathBuf::from("/srv/shared"));
    }

    #[tokio::test]
    async fn test_forwarded_events_are_json_lines() {
        let temp_dir = TempDir::new().unwrap();
        let dirs = PlannerDirs::resolve(Some(temp_dir.path().to_path_buf()), None).unwrap();
        let mut session = open_session(&dirs, SyncConfig::default());

        let lines = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let lines = Arc::clone(&lines);
            forward_events(&session, move |line| lines.lock().unwrap().push(line))
        };
        session.login("Ada", "ada@example.com", false).await.unwrap();
        drop(subscription);
        session.shutdown().await;

        let lines = lines.lock().unwrap();
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert!(first["type"].is_string());
        assert!(
            lines
                .iter()
                .any(|line| line.contains("\"type\":\"loadCompleted\""))
        );
    }
}
