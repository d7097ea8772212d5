//! Summary sync state for status indicators.

use serde::Serialize;

/// Coarse engine state derived from connectivity and the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    Syncing,
    /// Actions waiting for the next pass
    Pending,
    /// Nothing left to send
    Synced,
    /// Conflicts or exhausted failures need a caller decision
    NeedsAttention,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::NeedsAttention => "needs attention",
        };
        f.write_str(label)
    }
}
