//! Remote sync engine.
//!
//! Two phases:
//!
//! - **Load** runs once per identity: fetch-or-create the profile, fetch
//!   the per-user collections concurrently and assemble them into a
//!   [`LoadedSnapshot`]. Any failure degrades to a fallback snapshot, so a
//!   load never fails outright.
//! - **Push** persists a snapshot unit by unit. Each unit is its own upsert
//!   and fails independently; tasks and flashcards also reconcile deletes.
//!
//! The engine holds no snapshot of its own. Debouncing lives in
//! [`crate::scheduler`].

use crate::events::{EventBus, SyncEvent, now_millis};
use crate::identity::Identity;
use crate::migration::LoadedSnapshot;
use crate::model::Snapshot;
use crate::remote::{RemoteError, RemoteStore, Result, Table};
use crate::rows::{
    self, DailyQuestsRow, FlashcardRow, ProfileRow, ReflectionRow, RemoteRows, TaskRow,
};
use crate::status::{self, SyncStatus};

use futures::future::join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use web_time::Instant;

/// Independently persisted slice of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Profile,
    Quests,
    Tasks,
    Flashcards,
    Reflections,
}

impl Unit {
    /// Push order. Also the order in which the first error is picked.
    pub const ALL: [Unit; 5] = [
        Unit::Profile,
        Unit::Quests,
        Unit::Tasks,
        Unit::Flashcards,
        Unit::Reflections,
    ];

    pub fn table(&self) -> Table {
        match self {
            Unit::Profile => Table::Profiles,
            Unit::Quests => Table::DailyQuests,
            Unit::Tasks => Table::Tasks,
            Unit::Flashcards => Table::Flashcards,
            Unit::Reflections => Table::Reflections,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table().name())
    }
}

/// Result of a load. `error` is set when `loaded` is the fallback.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub loaded: LoadedSnapshot,
    pub error: Option<RemoteError>,
}

impl LoadOutcome {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct UnitReport {
    pub unit: Unit,
    /// Rows removed by delete reconciliation on success.
    pub result: std::result::Result<usize, RemoteError>,
}

/// Aggregated result of one push cycle.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub units: Vec<UnitReport>,
    pub status: SyncStatus,
    pub duration_ms: u64,
}

impl PushReport {
    pub fn succeeded(&self) -> usize {
        self.units.iter().filter(|u| u.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.units.len() - self.succeeded()
    }

    pub fn deleted(&self) -> usize {
        self.units
            .iter()
            .filter_map(|u| u.result.as_ref().ok())
            .sum()
    }

    /// First failure in push order.
    pub fn first_error(&self) -> Option<(Unit, &RemoteError)> {
        self.units
            .iter()
            .find_map(|u| u.result.as_ref().err().map(|e| (u.unit, e)))
    }

    pub fn unit(&self, unit: Unit) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit == unit)
    }
}

/// Loads and pushes snapshots against a [`RemoteStore`].
pub struct SyncEngine<R> {
    remote: R,
    events: Arc<EventBus>,
    status: RwLock<SyncStatus>,
    /// Serializes push cycles.
    push_lock: Mutex<()>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(remote: R) -> Self {
        Self::with_events(remote, Arc::new(EventBus::new()))
    }

    pub fn with_events(remote: R, events: Arc<EventBus>) -> Self {
        Self {
            remote,
            events,
            status: RwLock::new(SyncStatus::Idle),
            push_lock: Mutex::new(()),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn status(&self) -> SyncStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_status(&self, status: SyncStatus) {
        {
            let mut current = self.status.write().unwrap_or_else(|e| e.into_inner());
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        self.events.emit(SyncEvent::StatusChanged {
            status,
            timestamp: now_millis(),
        });
    }

    // ==================== Load ====================

    /// Fetch everything stored for `identity`.
    ///
    /// Never fails: on any error the outcome carries a fallback snapshot
    /// holding only the display name, and the status becomes `Error`.
    pub async fn load(&self, identity: &Identity) -> LoadOutcome {
        let user_id = identity.user_id();
        self.set_status(SyncStatus::Loading);
        info!("Loading snapshot for {}", user_id);

        match self.fetch(&user_id, &identity.name).await {
            Ok(loaded) => {
                info!(
                    "Loaded snapshot for {} (schema v{})",
                    user_id,
                    loaded.version()
                );
                self.events.emit(SyncEvent::LoadCompleted {
                    user_id,
                    version: loaded.version(),
                    timestamp: now_millis(),
                });
                self.set_status(SyncStatus::Saved);
                LoadOutcome {
                    loaded,
                    error: None,
                }
            }
            Err(e) => {
                error!("Load failed for {}, using defaults: {}", user_id, e);
                self.events.emit(SyncEvent::LoadFailed {
                    user_id,
                    message: e.to_string(),
                    timestamp: now_millis(),
                });
                self.set_status(SyncStatus::from_error(&e));
                LoadOutcome {
                    loaded: LoadedSnapshot::fallback(identity.name.clone()),
                    error: Some(e),
                }
            }
        }
    }

    async fn fetch(&self, user_id: &str, name: &str) -> Result<LoadedSnapshot> {
        let profile = self.fetch_or_create_profile(user_id, name).await?;

        let (quests, tasks, flashcards, reflections) = futures::try_join!(
            self.remote.select(Table::DailyQuests, user_id),
            self.remote.select(Table::Tasks, user_id),
            self.remote.select(Table::Flashcards, user_id),
            self.remote.select(Table::Reflections, user_id),
        )?;

        let quests = quests
            .into_iter()
            .next()
            .map(|row| rows::decode::<DailyQuestsRow>(Table::DailyQuests, row))
            .transpose()?;

        let rows = RemoteRows {
            profile,
            quests,
            tasks: rows::decode_all(Table::Tasks, tasks)?,
            flashcards: rows::decode_all(Table::Flashcards, flashcards)?,
            reflections: rows::decode_all(Table::Reflections, reflections)?,
        };
        Ok(rows.assemble(name))
    }

    /// Existing profile, or a freshly inserted one. Losing the insert race
    /// to another session is not an error: the winner's row is re-read.
    async fn fetch_or_create_profile(&self, user_id: &str, name: &str) -> Result<ProfileRow> {
        if let Some(row) = self.select_profile(user_id).await? {
            return Ok(row);
        }

        let profile = ProfileRow::new(user_id, name);
        match self
            .remote
            .insert(Table::Profiles, rows::encode(Table::Profiles, &profile)?)
            .await
        {
            Ok(()) => {
                info!("Created profile for {}", user_id);
                Ok(profile)
            }
            Err(RemoteError::UniqueViolation { .. }) => {
                debug!("Profile for {} created concurrently, re-reading", user_id);
                self.select_profile(user_id).await?.ok_or_else(|| {
                    RemoteError::Other(format!("profile for {} vanished after conflict", user_id))
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn select_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        self.remote
            .select(Table::Profiles, user_id)
            .await?
            .into_iter()
            .next()
            .map(|row| rows::decode(Table::Profiles, row))
            .transpose()
    }

    // ==================== Push ====================

    /// Persist `snapshot` for `identity`. Every unit is attempted; the
    /// report and the resulting status reflect all of them. No retries.
    pub async fn push(&self, identity: &Identity, snapshot: &Snapshot) -> PushReport {
        let _guard = self.push_lock.lock().await;
        let user_id = identity.user_id();
        let started = Instant::now();

        self.set_status(SyncStatus::Saving);
        self.events.emit(SyncEvent::PushStarted {
            user_id: user_id.clone(),
            timestamp: now_millis(),
        });

        let results = join_all(
            Unit::ALL
                .iter()
                .map(|&unit| self.push_unit(unit, &user_id, snapshot)),
        )
        .await;

        let units: Vec<UnitReport> = Unit::ALL
            .iter()
            .zip(results)
            .map(|(&unit, result)| UnitReport { unit, result })
            .collect();

        for report in &units {
            if let Err(e) = &report.result {
                warn!("Push of {} failed for {}: {}", report.unit, user_id, e);
                self.events.emit(SyncEvent::UnitFailed {
                    unit: report.unit.to_string(),
                    message: e.to_string(),
                    timestamp: now_millis(),
                });
            }
        }

        let mut report = PushReport {
            units,
            status: SyncStatus::Saved,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Some((_, e)) = report.first_error() {
            report.status = SyncStatus::Error(status::user_message(e));
        }

        debug!(
            "Push for {} done in {}ms: {} ok, {} failed, {} deleted",
            user_id,
            report.duration_ms,
            report.succeeded(),
            report.failed(),
            report.deleted()
        );
        self.events.emit(SyncEvent::PushCompleted {
            user_id,
            succeeded: report.succeeded(),
            failed: report.failed(),
            deleted: report.deleted(),
            duration_ms: report.duration_ms,
            timestamp: now_millis(),
        });
        self.set_status(report.status.clone());
        report
    }

    async fn push_unit(&self, unit: Unit, user_id: &str, snapshot: &Snapshot) -> Result<usize> {
        let table = unit.table();
        match unit {
            Unit::Profile => {
                let row = ProfileRow::from_snapshot(user_id, snapshot);
                self.remote
                    .upsert(table, vec![rows::encode(table, &row)?])
                    .await?;
                Ok(0)
            }
            Unit::Quests => {
                let row = DailyQuestsRow::from_quests(user_id, &snapshot.daily_quests);
                self.remote
                    .upsert(table, vec![rows::encode(table, &row)?])
                    .await?;
                Ok(0)
            }
            Unit::Tasks => {
                let rows = snapshot
                    .tasks
                    .iter()
                    .map(|task| rows::encode(table, &TaskRow::from_task(user_id, task)))
                    .collect::<Result<Vec<_>>>()?;
                let local = snapshot.tasks.iter().map(|t| t.id.as_str()).collect();
                self.upsert_and_reconcile(table, user_id, rows, local).await
            }
            Unit::Flashcards => {
                let rows = snapshot
                    .flashcards
                    .iter()
                    .map(|card| rows::encode(table, &FlashcardRow::from_card(user_id, card)))
                    .collect::<Result<Vec<_>>>()?;
                let local = snapshot.flashcards.iter().map(|c| c.id.as_str()).collect();
                self.upsert_and_reconcile(table, user_id, rows, local).await
            }
            Unit::Reflections => {
                let rows = snapshot
                    .reflections
                    .iter()
                    .map(|r| rows::encode(table, &ReflectionRow::from_reflection(user_id, r)))
                    .collect::<Result<Vec<_>>>()?;
                if !rows.is_empty() {
                    self.remote.upsert(table, rows).await?;
                }
                Ok(0)
            }
        }
    }

    /// Upsert `rows`, then delete remote rows of `user_id` whose ids are
    /// not in `local`. Returns how many rows were deleted.
    async fn upsert_and_reconcile(
        &self,
        table: Table,
        user_id: &str,
        rows: Vec<Value>,
        local: HashSet<&str>,
    ) -> Result<usize> {
        if !rows.is_empty() {
            self.remote.upsert(table, rows).await?;
        }

        let stale: Vec<String> = self
            .remote
            .select(table, user_id)
            .await?
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str))
            .filter(|id| !local.contains(id))
            .map(str::to_string)
            .collect();

        if !stale.is_empty() {
            debug!("Deleting {} stale row(s) from {}", stale.len(), table);
            self.remote.delete(table, &stale).await?;
        }
        Ok(stale.len())
    }
}
