//! Sync conflict model

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::ActionId;

/// Version mismatch reported by the remote for a queued action.
///
/// Exactly one record exists per action in `Conflict` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    /// Action in conflict
    pub action_id: ActionId,
    /// Remote's authoritative version token, opaque to the client
    pub server_version: Option<String>,
    /// Remote's view of the entity
    pub server_state: Value,
    /// Client payload that was rejected
    pub client_state: Value,
    /// Non-authoritative hints for whoever resolves the conflict
    pub suggestions: Vec<String>,
    /// Detection timestamp (Unix ms)
    pub detected_at: i64,
}

/// Caller decision when resolving a conflict, also used as the automatic policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Manual,
    ServerWins,
    ClientWins,
    Merge,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Manual => "manual",
            Self::ServerWins => "server_wins",
            Self::ClientWins => "client_wins",
            Self::Merge => "merge",
        };
        f.write_str(label)
    }
}
