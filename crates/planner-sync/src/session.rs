//! Session shell: wires the identity gate, the store, the engine and the
//! push scheduler together.
//!
//! Lifecycle:
//!
//! 1. `start()` or `login()` yields an identity.
//! 2. `activate()` loads that identity's data once, migrates it, makes it
//!    the live snapshot and starts the push scheduler. If migration changed
//!    a successfully loaded snapshot, it is pushed straight away.
//! 3. Edits go through `store()`. The scheduler pushes them after the
//!    quiet period.
//! 4. `logout()` or `shutdown()` stops the scheduler, pushing anything
//!    still pending.

use crate::config::SyncConfig;
use crate::engine::{PushReport, SyncEngine};
use crate::export::{self, Export, ExportError};
use crate::identity::{Identity, IdentityError, IdentityGate};
use crate::migration::{LoadedSnapshot, migrate};
use crate::model::Settings;
use crate::remote::RemoteStore;
use crate::scheduler::PushScheduler;
use crate::status::SyncStatus;
use crate::storage::{self, Storage, StorageError, keys};
use crate::store::Store;

use chrono::{Local, NaiveDate};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Export(#[from] ExportError),
}

pub type Result<T> = std::result::Result<T, SessionError>;

type Clock = Box<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct Session<R, D, S> {
    gate: IdentityGate<D, S>,
    store: Store,
    engine: Arc<SyncEngine<R>>,
    config: SyncConfig,
    scheduler: Option<PushScheduler>,
    today: Clock,
}

impl<R, D, S> Session<R, D, S>
where
    R: RemoteStore + 'static,
    D: Storage,
    S: Storage,
{
    pub fn new(gate: IdentityGate<D, S>, engine: Arc<SyncEngine<R>>, config: SyncConfig) -> Self {
        Self {
            gate,
            store: Store::default(),
            engine,
            config,
            scheduler: None,
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the source of "today" used for the daily quest reset.
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R>> {
        &self.engine
    }

    pub fn gate(&self) -> &IdentityGate<D, S> {
        &self.gate
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    /// The identity whose data is live, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.scheduler.as_ref().map(PushScheduler::identity)
    }

    fn require_identity(&self) -> Result<&Identity> {
        self.identity().ok_or(SessionError::NotLoggedIn)
    }

    /// Resume a persisted identity, if there is one.
    pub async fn start(&mut self) -> Result<Option<Identity>> {
        match self.gate.resolve() {
            Some(identity) => {
                self.activate(identity.clone()).await?;
                Ok(Some(identity))
            }
            None => {
                debug!("No persisted identity, staying logged out");
                Ok(None)
            }
        }
    }

    pub async fn login(&mut self, name: &str, email: &str, remember: bool) -> Result<Identity> {
        let identity = self.gate.login(name, email, remember)?;
        self.activate(identity.clone()).await?;
        Ok(identity)
    }

    /// Stop syncing, forget the identity and drop the live snapshot.
    pub async fn logout(&mut self) -> Result<()> {
        self.stop().await;
        self.gate.logout()?;
        self.store.reset();
        Ok(())
    }

    /// Make `identity`'s data live. Returns `false` if it already was.
    ///
    /// A load failure is not an error here: the fallback snapshot goes live
    /// and the status says what happened.
    pub async fn activate(&mut self, identity: Identity) -> Result<bool> {
        if self
            .identity()
            .is_some_and(|active| active.user_id() == identity.user_id())
        {
            debug!("{} already loaded", identity.user_id());
            return Ok(false);
        }
        self.stop().await;

        let outcome = self.engine.load(&identity).await;

        let durable = self.gate.durable();
        let last_seen = storage::read_json::<NaiveDate>(durable, keys::LAST_SEEN_DATE)
            .unwrap_or_else(|e| {
                warn!("Could not read last seen date: {}", e);
                None
            });
        let loaded = !outcome.is_fallback();
        let migrated = migrate(outcome.loaded.clone(), last_seen, (self.today)());
        let upgraded = LoadedSnapshot::from(migrated.snapshot.clone()) != outcome.loaded;

        storage::write_json(durable, keys::SETTINGS, &migrated.snapshot.settings)?;
        self.store.replace(migrated.snapshot);

        // The watermark only moves once the remote holds the migrated
        // snapshot; otherwise the next load would bring back stale quest
        // completions without resetting them. A fallback is never pushed.
        let persisted = if !loaded {
            false
        } else if upgraded {
            info!("Pushing migrated snapshot for {}", identity.user_id());
            let report = self.engine.push(&identity, &self.store.snapshot()).await;
            report.failed() == 0
        } else {
            true
        };
        if persisted {
            storage::write_json(durable, keys::LAST_SEEN_DATE, &migrated.watermark)?;
        }

        self.scheduler = Some(PushScheduler::spawn(
            Arc::clone(&self.engine),
            identity.clone(),
            self.store.subscribe(),
            self.config.debounce,
        ));

        info!("Session active for {}", identity.user_id());
        Ok(true)
    }

    /// Change settings and mirror them to durable storage.
    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let settings = self.store.update_settings(f);
        storage::write_json(self.gate.durable(), keys::SETTINGS, &settings)?;
        Ok(settings)
    }

    /// Push the live snapshot now, ignoring the quiet period.
    pub async fn sync_now(&self) -> Result<PushReport> {
        let identity = self.require_identity()?;
        Ok(self.engine.push(identity, &self.store.snapshot()).await)
    }

    pub fn export(&self) -> Result<Export> {
        Ok(export::export_snapshot(
            &self.store.snapshot(),
            (self.today)(),
        )?)
    }

    /// Stop syncing, pushing anything still pending.
    pub async fn shutdown(mut self) {
        self.stop().await;
    }

    async fn stop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.flush_and_stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Quest, Snapshot};
    use crate::remote::{InMemoryRemote, Op, Table};
    use crate::storage::MemoryStorage;
    use serde_json::json;

    type TestSession = Session<Arc<InMemoryRemote>, Arc<MemoryStorage>, Arc<MemoryStorage>>;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn session(remote: &Arc<InMemoryRemote>, durable: &Arc<MemoryStorage>) -> TestSession {
        let gate = IdentityGate::new(Arc::clone(durable), Arc::new(MemoryStorage::new()));
        let engine = Arc::new(SyncEngine::new(Arc::clone(remote)));
        Session::new(gate, engine, SyncConfig::default()).with_clock(|| day(10))
    }

    #[tokio::test]
    async fn test_start_without_identity_stays_logged_out() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut session = session(&remote, &Arc::new(MemoryStorage::new()));

        assert_eq!(session.start().await.unwrap(), None);
        assert!(session.identity().is_none());
        assert_eq!(remote.calls(Table::Profiles, Op::Select), 0);
        assert!(matches!(
            session.sync_now().await,
            Err(SessionError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_activation_is_idempotent_per_user() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut session = session(&remote, &Arc::new(MemoryStorage::new()));

        let identity = session.login("Ada", "ada@example.com", true).await.unwrap();
        assert!(!session.activate(identity).await.unwrap());
        assert!(
            !session
                .activate(Identity {
                    name: "Ada".into(),
                    email: "ADA@example.com ".into(),
                })
                .await
                .unwrap()
        );

        assert_eq!(remote.calls(Table::Profiles, Op::Select), 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_activation_resets_quests_and_persists_watermark() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());
        remote.seed(
            Table::Profiles,
            json!({"user_id": "ada@example.com", "name": "Ada", "schema_version": 2}),
        )
        .unwrap();
        remote.seed(
            Table::DailyQuests,
            json!({"user_id": "ada@example.com", "work": {"title": "Ship", "completed": true}}),
        )
        .unwrap();
        storage::write_json(durable.as_ref(), keys::LAST_SEEN_DATE, &day(9)).unwrap();

        let mut session = session(&remote, &durable);
        session.login("Ada", "ada@example.com", true).await.unwrap();

        let quests = session.store().read(|s| s.daily_quests.clone());
        assert_eq!(
            quests.work,
            Quest {
                title: "Ship".into(),
                completed: false
            }
        );
        let watermark: Option<NaiveDate> =
            storage::read_json(durable.as_ref(), keys::LAST_SEEN_DATE).unwrap();
        assert_eq!(watermark, Some(day(10)));
        let mirrored: Option<Settings> =
            storage::read_json(durable.as_ref(), keys::SETTINGS).unwrap();
        assert_eq!(mirrored, Some(Settings::default()));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_daily_reset_survives_a_second_session_the_same_day() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());
        remote
            .seed(
                Table::DailyQuests,
                json!({"user_id": "ada@example.com", "work": {"title": "Ship", "completed": true}}),
            )
            .unwrap();
        storage::write_json(durable.as_ref(), keys::LAST_SEEN_DATE, &day(9)).unwrap();

        let mut first = session(&remote, &durable);
        first.login("Ada", "ada@example.com", true).await.unwrap();
        first.shutdown().await;
        assert_eq!(remote.rows(Table::DailyQuests)[0]["work"]["completed"], false);

        let mut second = session(&remote, &durable);
        second.start().await.unwrap();
        assert!(!second.store().read(|s| s.daily_quests.work.completed));
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_unchanged_load_is_not_pushed_back() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());

        let mut first = session(&remote, &durable);
        first.login("Ada", "ada@example.com", true).await.unwrap();
        first.shutdown().await;
        let upserts = remote.calls(Table::Profiles, Op::Upsert);

        let mut second = session(&remote, &durable);
        second.start().await.unwrap();
        second.shutdown().await;
        assert_eq!(remote.calls(Table::Profiles, Op::Upsert), upserts);
    }

    #[tokio::test]
    async fn test_fallback_is_not_pushed_and_keeps_watermark() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());
        remote
            .seed(
                Table::Tasks,
                json!({"id": "t1", "user_id": "ada@example.com", "title": "Keep me"}),
            )
            .unwrap();
        storage::write_json(durable.as_ref(), keys::LAST_SEEN_DATE, &day(9)).unwrap();
        remote.fail(
            Table::Tasks,
            Op::Select,
            crate::remote::RemoteError::Network("offline".into()),
        );

        let mut session = session(&remote, &durable);
        session.login("Ada", "ada@example.com", true).await.unwrap();

        assert!(session.status().is_error());
        assert_eq!(remote.calls(Table::Tasks, Op::Delete), 0);
        assert_eq!(remote.rows(Table::Tasks).len(), 1);
        let watermark: Option<NaiveDate> =
            storage::read_json(durable.as_ref(), keys::LAST_SEEN_DATE).unwrap();
        assert_eq!(watermark, Some(day(9)));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_logout_resets_store_and_flushes() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());
        let mut session = session(&remote, &durable);
        session.login("Ada", "ada@example.com", true).await.unwrap();

        session.store().update_state(crate::store::SnapshotPatch {
            intention: Some("Rest".into()),
            ..Default::default()
        });
        session.logout().await.unwrap();

        assert_eq!(session.store().snapshot(), Snapshot::default());
        assert!(session.identity().is_none());
        assert!(session.gate().resolve().is_none());
        assert_eq!(remote.rows(Table::Profiles)[0]["intention"], "Rest");
    }

    #[tokio::test]
    async fn test_update_settings_mirrors_to_storage() {
        let remote = Arc::new(InMemoryRemote::new());
        let durable = Arc::new(MemoryStorage::new());
        let mut session = session(&remote, &durable);
        session.login("Ada", "ada@example.com", true).await.unwrap();

        session
            .update_settings(|s| s.language = "fr".into())
            .unwrap();

        let mirrored: Option<Settings> =
            storage::read_json(durable.as_ref(), keys::SETTINGS).unwrap();
        assert_eq!(mirrored.unwrap().language, "fr");
        assert_eq!(session.store().read(|s| s.settings.language.clone()), "fr");
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_export_names_file_after_today() {
        let remote = Arc::new(InMemoryRemote::new());
        let mut session = session(&remote, &Arc::new(MemoryStorage::new()));
        session.login("Ada", "ada@example.com", false).await.unwrap();

        let export = session.export().unwrap();
        assert_eq!(export.file_name, "planner-backup-2025-03-10.json");
        assert!(export.json.contains("\"name\": \"Ada\""));
        session.shutdown().await;
    }
}
