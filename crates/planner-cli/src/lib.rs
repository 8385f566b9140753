//! planner-cli library: exposes the native adapters for testing.
//!
//! This is a thin library layer over the binary's components,
//! allowing integration tests to drive a real on-disk session.

pub mod app;
pub mod file_remote;
pub mod native_storage;

pub use app::{CliSession, PlannerDirs, forward_events, open_session, trace_events, write_export};
pub use file_remote::JsonFileRemote;
pub use native_storage::NativeStorage;
