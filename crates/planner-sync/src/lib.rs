//! planner-sync: keeps a planner snapshot in memory and in step with a
//! hosted relational store.
//!
//! This crate provides:
//! - The snapshot data model and the `Store` that owns the live copy
//! - Versioned migration of loaded snapshots (daily reset, backfills)
//! - Identity resolution over durable and session storage tiers
//! - A `RemoteStore` trait and the engine that loads and pushes through it
//! - A debounced push scheduler and the `Session` that ties it all together

pub mod config;
pub mod engine;
pub mod events;
pub mod export;
pub mod identity;
pub mod migration;
pub mod model;
pub mod remote;
pub mod rows;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod storage;
pub mod store;

pub use config::SyncConfig;
pub use engine::{LoadOutcome, PushReport, SyncEngine, Unit};
pub use events::{EventBus, Subscription, SyncEvent};
pub use export::Export;
pub use identity::{Identity, IdentityGate};
pub use migration::{LoadedSnapshot, Migrated, migrate};
pub use model::Snapshot;
pub use remote::{InMemoryRemote, RemoteError, RemoteStore, Table};
pub use scheduler::PushScheduler;
pub use session::{Session, SessionError};
pub use status::SyncStatus;
pub use storage::{MemoryStorage, Storage};
pub use store::{SnapshotPatch, Store, StoreError, TasksUpdate};
