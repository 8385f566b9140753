//! Event infrastructure for planner-sync.
//!
//! Provides `SyncEvent` for debug/monitoring and `EventBus` for subscriptions.
//! The bus is shared as `Arc<EventBus>` between the engine, the push
//! scheduler and whoever is watching.

use crate::status::SyncStatus;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, as carried in event timestamps.
pub fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or_default()
}

/// Events emitted by the sync engine for real-time monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Load phase finished and produced a snapshot from the remote store.
    LoadCompleted {
        #[serde(rename = "userId")]
        user_id: String,
        /// Profile schema version the rows were stored under.
        version: u32,
        timestamp: f64,
    },
    /// Load phase failed; the session continues on a fallback snapshot.
    LoadFailed {
        #[serde(rename = "userId")]
        user_id: String,
        message: String,
        timestamp: f64,
    },
    /// A push cycle began.
    PushStarted {
        #[serde(rename = "userId")]
        user_id: String,
        timestamp: f64,
    },
    /// One persistence unit failed during a push cycle.
    UnitFailed {
        /// Unit name, e.g. "tasks".
        unit: String,
        message: String,
        timestamp: f64,
    },
    /// A push cycle finished, successfully or not.
    PushCompleted {
        #[serde(rename = "userId")]
        user_id: String,
        succeeded: usize,
        failed: usize,
        /// Remote rows removed by delete reconciliation.
        deleted: usize,
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        timestamp: f64,
    },
    /// The user-visible sync status changed.
    StatusChanged { status: SyncStatus, timestamp: f64 },
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while emit holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Snapshot the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
