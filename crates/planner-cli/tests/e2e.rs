//! End-to-end tests for planner-cli.
//!
//! Drives sessions the way the binary does: on-disk storage tiers, a
//! file-backed remote directory, one session per "invocation".

use chrono::{TimeZone, Utc};
use planner_cli::native_storage::DURABLE_FILE;
use planner_cli::{NativeStorage, PlannerDirs, open_session, write_export};
use planner_sync::model::{NewTask, Quadrant, QuestKind};
use planner_sync::remote::RemoteStore;
use planner_sync::storage::keys;
use planner_sync::{Storage, SyncConfig, SyncStatus, Table};
use tempfile::TempDir;

fn dirs(data: &TempDir, remote: &TempDir) -> PlannerDirs {
    PlannerDirs {
        data: data.path().to_path_buf(),
        remote: remote.path().to_path_buf(),
    }
}

// ==================== Invocations ====================

#[tokio::test]
async fn test_remembered_login_resumes_next_invocation() {
    let data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let dirs = dirs(&data, &remote);

    let mut first = open_session(&dirs, SyncConfig::default());
    first.login("Ada", "ada@example.com", true).await.unwrap();
    first.shutdown().await;

    let mut second = open_session(&dirs, SyncConfig::default());
    let identity = second.start().await.unwrap().expect("identity persisted");
    assert_eq!(identity.user_id(), "ada@example.com");
    assert!(second.gate().durable().get(keys::USER).unwrap().is_some());
    assert!(second.gate().session().get(keys::SESSION_USER).unwrap().is_none());
    second.shutdown().await;
}

#[tokio::test]
async fn test_edits_are_pushed_on_shutdown() {
    let data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let dirs = dirs(&data, &remote);
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();

    let mut session = open_session(&dirs, SyncConfig::default());
    session.login("Ada", "ada@example.com", true).await.unwrap();
    let id = session
        .store()
        .add_task(NewTask::new("Water plants", Quadrant::Schedule), now);
    session.store().toggle_task(&id);
    session.store().set_quest(QuestKind::Work, "Inbox zero");
    let engine = std::sync::Arc::clone(session.engine());
    session.shutdown().await;

    assert_eq!(engine.status(), SyncStatus::Saved);
    assert!(remote.path().join("tasks.json").exists());

    let tasks = engine
        .remote()
        .select(Table::Tasks, "ada@example.com")
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["title"], "Water plants");

    let mut next = open_session(&dirs, SyncConfig::default());
    next.start().await.unwrap();
    assert_eq!(next.store().read(|s| s.points), 1);
    assert_eq!(
        next.store().read(|s| s.daily_quests.work.title.clone()),
        "Inbox zero"
    );
    next.shutdown().await;
}

#[tokio::test]
async fn test_two_devices_share_a_remote_directory() {
    let laptop_data = TempDir::new().unwrap();
    let phone_data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();

    let mut laptop = open_session(&dirs(&laptop_data, &remote), SyncConfig::default());
    laptop.login("Ada", "ada@example.com", false).await.unwrap();
    let card = laptop.store().add_flashcard("Capital of Peru?", "Lima", now);
    laptop.shutdown().await;

    let mut phone = open_session(&dirs(&phone_data, &remote), SyncConfig::default());
    phone.login("Ada", "ADA@example.com", false).await.unwrap();
    assert!(phone.store().read(|s| s.flashcard(&card).is_some()));

    phone.store().delete_flashcard(&card);
    phone.shutdown().await;

    let mut laptop = open_session(&dirs(&laptop_data, &remote), SyncConfig::default());
    laptop.start().await.unwrap();
    assert!(laptop.store().read(|s| s.flashcards.is_empty()));
    laptop.shutdown().await;
}

#[tokio::test]
async fn test_logout_forgets_identity_on_disk() {
    let data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let dirs = dirs(&data, &remote);

    let mut session = open_session(&dirs, SyncConfig::default());
    session.login("Ada", "ada@example.com", true).await.unwrap();
    session.logout().await.unwrap();
    session.shutdown().await;

    let mut next = open_session(&dirs, SyncConfig::default());
    assert_eq!(next.start().await.unwrap(), None);
}

#[tokio::test]
async fn test_export_writes_backup_file() {
    let data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let dirs = dirs(&data, &remote);

    let mut session = open_session(&dirs, SyncConfig::default());
    session.login("Ada", "ada@example.com", true).await.unwrap();
    let path = write_export(&session, out.path()).await.unwrap();
    session.shutdown().await;

    let file_name = path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("planner-backup-"));
    assert!(file_name.ends_with(".json"));
    let contents = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
    assert_eq!(value["name"], "Ada");
    assert_eq!(value["shopItems"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_daily_reset_sticks_across_invocations() {
    let data = TempDir::new().unwrap();
    let remote = TempDir::new().unwrap();
    let dirs = dirs(&data, &remote);

    let mut session = open_session(&dirs, SyncConfig::default());
    session.login("Ada", "ada@example.com", true).await.unwrap();
    session.store().set_quest(QuestKind::Work, "Inbox zero");
    session.store().toggle_quest(QuestKind::Work);
    session.shutdown().await;

    // Pretend the last run was yesterday.
    let storage = NativeStorage::open(data.path().join(DURABLE_FILE));
    storage.remove(keys::LAST_SEEN_DATE).unwrap();

    let mut reset = open_session(&dirs, SyncConfig::default());
    reset.start().await.unwrap();
    assert!(!reset.store().read(|s| s.daily_quests.work.completed));
    reset.shutdown().await;

    let mut again = open_session(&dirs, SyncConfig::default());
    again.start().await.unwrap();
    assert!(!again.store().read(|s| s.daily_quests.work.completed));
    again.shutdown().await;
}
