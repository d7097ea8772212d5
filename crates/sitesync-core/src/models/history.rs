//! Sync history model

use serde::{Deserialize, Serialize};

use super::action::{ActionId, ActionKind, OfflineAction};

/// How an action left the active queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOutcome {
    /// Remote accepted the action
    Synced,
    /// Dropped in favour of the server state
    ServerWins,
    /// Accepted after a forced resubmission
    ClientWinsForced,
    /// Removed by the caller
    Discarded,
}

/// Audit entry for an action that left the active queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub action_id: ActionId,
    pub kind: ActionKind,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_label: String,
    pub outcome: HistoryOutcome,
    pub note: Option<String>,
    /// Recording timestamp (Unix ms)
    pub recorded_at: i64,
}

impl SyncHistoryEntry {
    pub fn from_action(
        action: &OfflineAction,
        outcome: HistoryOutcome,
        note: Option<String>,
    ) -> Self {
        Self {
            action_id: action.id,
            kind: action.kind,
            entity_type: action.entity_type.clone(),
            entity_id: action.entity_id.clone(),
            entity_label: action.entity_label.clone(),
            outcome,
            note,
            recorded_at: crate::util::unix_millis_now(),
        }
    }
}
