//! Sync configuration.

use std::time::Duration;

/// Quiet period before a push, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long the store must stay unchanged before a push starts.
    pub debounce: Duration,
}

impl SyncConfig {
    pub fn with_debounce_ms(ms: u64) -> Self {
        Self {
            debounce: Duration::from_millis(ms),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::with_debounce_ms(DEFAULT_DEBOUNCE_MS)
    }
}
