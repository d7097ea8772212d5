//! Offline action model

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a queued action, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new unique action ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ActionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of mutation carried by an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    Upload,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Upload => "upload",
        };
        f.write_str(label)
    }
}

/// Scheduling priority, immutable after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    const fn rank(self) -> u8 {
        match self {
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(label)
    }
}

/// Lifecycle status of a queued action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
    Conflict,
}

impl ActionStatus {
    /// Whether `self -> next` is a legal edge of the action state machine.
    ///
    /// `Synced` is terminal and `Syncing -> Syncing` is never allowed.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Syncing)
                | (
                    Self::Syncing,
                    Self::Synced | Self::Conflict | Self::Failed | Self::Pending
                )
                | (Self::Failed | Self::Conflict, Self::Pending)
                | (Self::Conflict, Self::Synced)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Conflict => "conflict",
        };
        f.write_str(label)
    }
}

/// A durable record of one pending mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineAction {
    /// Unique identifier
    pub id: ActionId,
    /// Mutation kind
    pub kind: ActionKind,
    /// Type of the mutated entity (e.g. "task", "daily_log")
    pub entity_type: String,
    /// Identifier of the mutated entity
    pub entity_id: String,
    /// Human-readable label for display and audit
    pub entity_label: String,
    /// Opaque mutation body
    pub payload: Value,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
    /// Enqueue ordinal, breaks ties within the same millisecond
    #[serde(default)]
    pub sequence: u64,
    /// Scheduling priority
    pub priority: Priority,
    /// Current lifecycle status
    pub status: ActionStatus,
    /// Attempts that failed so far
    pub retry_count: u32,
    /// Attempts allowed before the action becomes terminal
    pub max_retries: u32,
    /// Diagnostic from the last failure or conflict
    pub last_error: Option<String>,
    /// Serialized payload size
    pub size_bytes: Option<u64>,
    /// Earliest retry time for a failed action (Unix ms)
    #[serde(default)]
    pub next_attempt_at: Option<i64>,
    /// Submit with the force flag on the next attempt
    #[serde(default)]
    pub force: bool,
}

impl OfflineAction {
    /// Failed with retries left.
    pub const fn is_retryable(&self) -> bool {
        matches!(self.status, ActionStatus::Failed) && self.retry_count < self.max_retries
    }

    /// Failed with no retries left.
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.status, ActionStatus::Failed) && self.retry_count >= self.max_retries
    }

    /// Scheduling order: priority descending, then FIFO.
    pub fn schedule_cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then(self.enqueued_at.cmp(&other.enqueued_at))
            .then(self.sequence.cmp(&other.sequence))
    }
}

/// Caller input for enqueueing a new mutation
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub kind: ActionKind,
    pub entity_type: String,
    pub entity_id: String,
    pub entity_label: String,
    pub payload: Value,
    pub priority: Priority,
    /// Overrides the configured retry budget
    pub max_retries: Option<u32>,
}

impl NewAction {
    /// Create a medium-priority mutation for the given entity.
    pub fn new(
        kind: ActionKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        let entity_id = entity_id.into();
        Self {
            kind,
            entity_type: entity_type.into(),
            entity_label: entity_id.clone(),
            entity_id,
            payload,
            priority: Priority::default(),
            max_retries: None,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.entity_label = label.into();
        self
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Validate and turn into a pending action.
    ///
    /// The payload must serialize to at most `max_payload_bytes`.
    pub fn into_action(
        self,
        default_max_retries: u32,
        max_payload_bytes: u64,
        sequence: u64,
    ) -> Result<OfflineAction> {
        let entity_type = self.entity_type.trim().to_string();
        let entity_id = self.entity_id.trim().to_string();
        if entity_type.is_empty() {
            return Err(Error::Validation(
                "Action entity_type cannot be empty".to_string(),
            ));
        }
        if entity_id.is_empty() {
            return Err(Error::Validation(
                "Action entity_id cannot be empty".to_string(),
            ));
        }

        let size_bytes = u64::try_from(serde_json::to_vec(&self.payload)?.len()).unwrap_or(u64::MAX);
        if size_bytes > max_payload_bytes {
            return Err(Error::Validation(format!(
                "Action payload is {size_bytes} bytes, limit is {max_payload_bytes}"
            )));
        }

        let entity_label = match self.entity_label.trim() {
            "" => entity_id.clone(),
            label => label.to_string(),
        };

        Ok(OfflineAction {
            id: ActionId::new(),
            kind: self.kind,
            entity_type,
            entity_id,
            entity_label,
            payload: self.payload,
            enqueued_at: crate::util::unix_millis_now(),
            sequence,
            priority: self.priority,
            status: ActionStatus::Pending,
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            last_error: None,
            size_bytes: Some(size_bytes),
            next_attempt_at: None,
            force: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(priority: Priority, enqueued_at: i64, sequence: u64) -> OfflineAction {
        let mut action = NewAction::new(ActionKind::Update, "task", "t-1", json!({}))
            .with_priority(priority)
            .into_action(3, 1024, sequence)
            .unwrap();
        action.enqueued_at = enqueued_at;
        action
    }

    #[test]
    fn test_action_id_parse() {
        let id = ActionId::new();
        let parsed: ActionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_transition_table() {
        use ActionStatus::*;
        assert!(Pending.can_transition_to(Syncing));
        assert!(Syncing.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
        assert!(Conflict.can_transition_to(Synced));
        assert!(!Syncing.can_transition_to(Syncing));
        assert!(!Failed.can_transition_to(Syncing));
        for next in [Pending, Syncing, Synced, Failed, Conflict] {
            assert!(!Synced.can_transition_to(next));
        }
    }

    #[test]
    fn test_schedule_cmp_priority_then_fifo() {
        let low = action(Priority::Low, 1, 0);
        let high_late = action(Priority::High, 5, 1);
        let high_early = action(Priority::High, 2, 2);
        let same_ms = action(Priority::High, 2, 3);

        let mut all = [low.clone(), high_late.clone(), same_ms.clone(), high_early.clone()];
        all.sort_by(OfflineAction::schedule_cmp);
        assert_eq!(all[0].id, high_early.id);
        assert_eq!(all[1].id, same_ms.id);
        assert_eq!(all[2].id, high_late.id);
        assert_eq!(all[3].id, low.id);
    }

    #[test]
    fn test_new_action_validation() {
        assert!(NewAction::new(ActionKind::Create, " ", "1", json!({}))
            .into_action(3, 1024, 0)
            .is_err());
        assert!(NewAction::new(ActionKind::Create, "task", "", json!({}))
            .into_action(3, 1024, 0)
            .is_err());

        let oversized = NewAction::new(ActionKind::Upload, "photo", "p", json!("x".repeat(64)))
            .into_action(3, 16, 0);
        assert!(matches!(oversized, Err(Error::Validation(_))));
    }

    #[test]
    fn test_new_action_defaults() {
        let action = NewAction::new(ActionKind::Create, "task", "t-9", json!({"a": 1}))
            .into_action(4, 1024, 7)
            .unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.max_retries, 4);
        assert_eq!(action.entity_label, "t-9");
        assert_eq!(action.sequence, 7);
        assert_eq!(action.size_bytes, Some(7));
    }

    #[test]
    fn test_retryable_vs_exhausted() {
        let mut action = action(Priority::Low, 1, 0);
        action.status = ActionStatus::Failed;
        action.retry_count = 1;
        action.max_retries = 2;
        assert!(action.is_retryable());
        action.retry_count = 2;
        assert!(action.is_exhausted());
        assert!(!action.is_retryable());
    }
}
