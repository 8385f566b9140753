//! Debounced push scheduling.
//!
//! One spawned task per active identity watches the store. Every change
//! restarts the quiet period; when the period elapses without further
//! changes, the latest snapshot is pushed. The loop awaits each push before
//! looking at the store again, so cycles never overlap.

use crate::engine::SyncEngine;
use crate::identity::Identity;
use crate::model::Snapshot;
use crate::remote::RemoteStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct PushScheduler {
    identity: Identity,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PushScheduler {
    /// Start watching `snapshots` and pushing for `identity`.
    ///
    /// The value current at spawn time is treated as already persisted; only
    /// later changes schedule a push.
    pub fn spawn<R>(
        engine: Arc<SyncEngine<R>>,
        identity: Identity,
        mut snapshots: watch::Receiver<Snapshot>,
        debounce: Duration,
    ) -> Self
    where
        R: RemoteStore + 'static,
    {
        snapshots.mark_unchanged();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let task_identity = identity.clone();

        let handle = tokio::spawn(async move {
            let identity = task_identity;
            debug!(
                "Push scheduler started for {} ({}ms debounce)",
                identity.user_id(),
                debounce.as_millis()
            );

            loop {
                // Idle: wait for the first change or shutdown. A change that
                // raced the shutdown still gets pushed.
                tokio::select! {
                    biased;
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }

                // Dirty: wait for quiet. Each change restarts the timer.
                let mut stopping = false;
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        changed = snapshots.changed() => {
                            if changed.is_err() {
                                stopping = true;
                                break;
                            }
                        }
                        _ = &mut shutdown_rx => {
                            stopping = true;
                            break;
                        }
                    }
                }

                let snapshot = snapshots.borrow_and_update().clone();
                engine.push(&identity, &snapshot).await;

                if stopping {
                    debug!("Flushed pending changes for {} on stop", identity.user_id());
                    return;
                }
            }

            debug!("Push scheduler for {} stopped", identity.user_id());
        });

        Self {
            identity,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Stop the scheduler. A change still waiting out its quiet period is
    /// pushed immediately; an in-flight push is awaited.
    pub async fn flush_and_stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                debug!("Push scheduler task ended abnormally: {}", e);
            }
        }
    }

    fn stop_now(&mut self) {
        // Abort before dropping the sender, which the task reads as a stop.
        if let Some(handle) = self.handle.take() {
            info!("Stopping push scheduler for {}", self.identity.user_id());
            handle.abort();
        }
        self.shutdown.take();
    }
}

// Dropping without `flush_and_stop` discards whatever is still pending.
impl Drop for PushScheduler {
    fn drop(&mut self) {
        self.stop_now();
    }
}
