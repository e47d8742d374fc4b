// File: src/config.rs
//
// Construction-time configuration for the engine

use serde::{Deserialize, Serialize};

/// What a facade write does when the document mutation committed but the
/// event append failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventErrorPolicy {
    /// Return the compound error; the caller learns the log is behind the
    /// document.
    #[default]
    Propagate,
    /// Log the append failure and return the mutation result.
    Swallow,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Capacity of the change-feed channels; a full channel blocks the feed
    /// reader instead of dropping events.
    pub channel_capacity: usize,

    /// Create snapshots automatically from the facade write path.
    pub auto_snapshot: bool,

    /// Auto-snapshot every N document versions.
    pub snapshot_interval: i64,

    pub event_error_policy: EventErrorPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            auto_snapshot: true,
            snapshot_interval: 10,
            event_error_policy: EventErrorPolicy::Propagate,
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_auto_snapshot(mut self, enabled: bool) -> Self {
        self.auto_snapshot = enabled;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: i64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    pub fn with_event_error_policy(mut self, policy: EventErrorPolicy) -> Self {
        self.event_error_policy = policy;
        self
    }
}
