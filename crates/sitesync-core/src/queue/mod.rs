//! Durable, priority-ordered queue of offline actions
//!
//! Every mutation is a compare-and-set on the action's current status, applied
//! to the durable store and the in-memory index under one lock. Callers racing
//! on the same action get `InvalidState` instead of a lost update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::db::{put_json, quarantine, KeyValueStore, ACTIONS_PREFIX};
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionStatus, NewAction, OfflineAction, Priority};

const EVENT_CAPACITY: usize = 256;

/// Change notification emitted after a queue mutation is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Enqueued {
        id: ActionId,
        priority: Priority,
    },
    StatusChanged {
        id: ActionId,
        from: ActionStatus,
        to: ActionStatus,
        retry_count: u32,
    },
    PayloadReplaced {
        id: ActionId,
    },
    Removed {
        id: ActionId,
    },
}

impl QueueEvent {
    pub const fn action_id(&self) -> ActionId {
        match self {
            Self::Enqueued { id, .. }
            | Self::StatusChanged { id, .. }
            | Self::PayloadReplaced { id }
            | Self::Removed { id } => *id,
        }
    }
}

/// Fields written together with a status transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: ActionStatus,
    pub retry_count: Option<u32>,
    pub last_error: Option<Option<String>>,
    pub next_attempt_at: Option<Option<i64>>,
    pub payload: Option<Value>,
    pub force: Option<bool>,
}

impl StatusUpdate {
    pub const fn to(status: ActionStatus) -> Self {
        Self {
            status,
            retry_count: None,
            last_error: None,
            next_attempt_at: None,
            payload: None,
            force: None,
        }
    }

    #[must_use]
    pub const fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    #[must_use]
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    #[must_use]
    pub const fn next_attempt_at(mut self, at: Option<i64>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }
}

struct QueueState {
    records: HashMap<ActionId, OfflineAction>,
    next_sequence: u64,
}

/// Durable store of offline actions, independent of sync orchestration
pub struct ActionQueue {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QueueState>,
    events: broadcast::Sender<QueueEvent>,
    max_payload_bytes: u64,
}

fn action_key(id: &ActionId) -> String {
    format!("{ACTIONS_PREFIX}{id}")
}

impl ActionQueue {
    /// Load the queue from `store`.
    ///
    /// Records left in `Syncing` by an interrupted process are reset to `Pending`;
    /// the interrupted attempt does not count as a retry. Records that fail to
    /// decode are moved under `quarantine/` rather than dropped.
    pub fn load(store: Arc<dyn KeyValueStore>, max_payload_bytes: u64) -> Result<Self> {
        let mut records = HashMap::new();
        let mut next_sequence = 0;

        for (key, raw) in store.list_prefix(ACTIONS_PREFIX)? {
            let mut action = match serde_json::from_str::<OfflineAction>(&raw) {
                Ok(action) => action,
                Err(error) => {
                    let moved = quarantine(store.as_ref(), &key, &raw)?;
                    tracing::error!(%key, %moved, %error, "Undecodable action quarantined");
                    continue;
                }
            };
            if action.status == ActionStatus::Syncing {
                tracing::warn!(action = %action.id, "Resetting interrupted action to pending");
                action.status = ActionStatus::Pending;
                put_json(store.as_ref(), &action_key(&action.id), &action)?;
            }
            next_sequence = next_sequence.max(action.sequence + 1);
            records.insert(action.id, action);
        }

        tracing::debug!(count = records.len(), "Loaded action queue");
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            store,
            state: Mutex::new(QueueState {
                records,
                next_sequence,
            }),
            events,
            max_payload_bytes,
        })
    }

    /// Validate and append a new pending action.
    pub fn enqueue(&self, new: NewAction, default_max_retries: u32) -> Result<ActionId> {
        let action = {
            let mut state = self.state();
            let action =
                new.into_action(default_max_retries, self.max_payload_bytes, state.next_sequence)?;
            put_json(self.store.as_ref(), &action_key(&action.id), &action)?;
            state.next_sequence += 1;
            state.records.insert(action.id, action.clone());
            action
        };

        tracing::info!(
            action = %action.id,
            kind = %action.kind,
            entity_type = %action.entity_type,
            entity_id = %action.entity_id,
            priority = %action.priority,
            "Queued offline action"
        );
        self.emit(QueueEvent::Enqueued {
            id: action.id,
            priority: action.priority,
        });
        Ok(action.id)
    }

    pub fn get(&self, id: &ActionId) -> Option<OfflineAction> {
        self.state().records.get(id).cloned()
    }

    /// Actions awaiting sync: `Pending` and retryable `Failed`, optionally one
    /// priority only, in scheduling order.
    pub fn list_pending(&self, priority: Option<Priority>) -> Vec<OfflineAction> {
        self.list_where(|action| {
            (action.status == ActionStatus::Pending || action.is_retryable())
                && priority.is_none_or(|p| action.priority == p)
        })
    }

    /// Every action in the active log, in scheduling order.
    pub fn list_all(&self) -> Vec<OfflineAction> {
        self.list_where(|_| true)
    }

    pub fn list_by_status(&self, status: ActionStatus) -> Vec<OfflineAction> {
        self.list_where(|action| action.status == status)
    }

    fn list_where<F>(&self, filter: F) -> Vec<OfflineAction>
    where
        F: Fn(&OfflineAction) -> bool,
    {
        let mut actions = self
            .state()
            .records
            .values()
            .filter(|action| filter(action))
            .cloned()
            .collect::<Vec<_>>();
        actions.sort_by(OfflineAction::schedule_cmp);
        actions
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any action is eligible for a drain pass.
    pub fn has_candidates(&self) -> bool {
        self.state()
            .records
            .values()
            .any(|action| action.status == ActionStatus::Pending || action.is_retryable())
    }

    /// Compare-and-set a status transition.
    ///
    /// Fails with `InvalidState` when the action is not in `expected`, when the
    /// edge is not part of the state machine, or when the retry count would
    /// leave `0..=max_retries`. Reaching `Synced` evicts the action from the
    /// active log.
    pub fn update_status(
        &self,
        id: &ActionId,
        expected: ActionStatus,
        update: StatusUpdate,
    ) -> Result<OfflineAction> {
        let mut events = Vec::with_capacity(3);
        let updated = {
            let mut state = self.state();
            let current = state
                .records
                .get(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            if current.status != expected {
                return Err(Error::InvalidState(format!(
                    "action {id} is {}, expected {expected}",
                    current.status
                )));
            }
            if !expected.can_transition_to(update.status) {
                return Err(Error::InvalidState(format!(
                    "action {id} cannot move from {expected} to {}",
                    update.status
                )));
            }

            let mut next = current.clone();
            next.status = update.status;
            if let Some(retry_count) = update.retry_count {
                if retry_count > next.max_retries {
                    return Err(Error::InvalidState(format!(
                        "action {id} retry count {retry_count} exceeds {}",
                        next.max_retries
                    )));
                }
                next.retry_count = retry_count;
            }
            if let Some(last_error) = update.last_error {
                next.last_error = last_error;
            }
            if let Some(next_attempt_at) = update.next_attempt_at {
                next.next_attempt_at = next_attempt_at;
            }
            if let Some(force) = update.force {
                next.force = force;
            }
            if let Some(payload) = update.payload {
                next.size_bytes = serde_json::to_vec(&payload)
                    .ok()
                    .and_then(|bytes| u64::try_from(bytes.len()).ok());
                next.payload = payload;
                events.push(QueueEvent::PayloadReplaced { id: *id });
            }

            let key = action_key(id);
            if next.status == ActionStatus::Synced {
                self.store.delete(&key)?;
                state.records.remove(id);
            } else {
                put_json(self.store.as_ref(), &key, &next)?;
                state.records.insert(*id, next.clone());
            }

            events.push(QueueEvent::StatusChanged {
                id: *id,
                from: expected,
                to: next.status,
                retry_count: next.retry_count,
            });
            if next.status == ActionStatus::Synced {
                events.push(QueueEvent::Removed { id: *id });
            }
            next
        };

        tracing::debug!(
            action = %id,
            from = %expected,
            to = %updated.status,
            retry_count = updated.retry_count,
            "Action status changed"
        );
        for event in events {
            self.emit(event);
        }
        Ok(updated)
    }

    /// Discard an action. Rejected while it is `Syncing`.
    pub fn remove(&self, id: &ActionId) -> Result<OfflineAction> {
        let removed = {
            let mut state = self.state();
            let current = state
                .records
                .get(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if current.status == ActionStatus::Syncing {
                return Err(Error::InvalidState(format!(
                    "action {id} is syncing and cannot be removed"
                )));
            }
            self.store.delete(&action_key(id))?;
            state
                .records
                .remove(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?
        };

        tracing::info!(action = %id, status = %removed.status, "Removed offline action");
        self.emit(QueueEvent::Removed { id: *id });
        Ok(removed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MemoryStore, QUARANTINE_PREFIX};
    use crate::models::ActionKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn queue() -> ActionQueue {
        ActionQueue::load(Arc::new(MemoryStore::new()), 1024).unwrap()
    }

    fn new_action(label: &str, priority: Priority) -> NewAction {
        NewAction::new(ActionKind::Update, "task", label, json!({ "label": label }))
            .with_label(label)
            .with_priority(priority)
    }

    #[test]
    fn enqueue_assigns_pending() {
        let queue = queue();
        let id = queue.enqueue(new_action("a", Priority::Low), 3).unwrap();
        let action = queue.get(&id).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.max_retries, 3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn enqueue_rejects_oversized_payload() {
        let queue = ActionQueue::load(Arc::new(MemoryStore::new()), 8).unwrap();
        let result = queue.enqueue(
            NewAction::new(ActionKind::Upload, "photo", "p1", json!("0123456789")),
            3,
        );
        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn list_pending_orders_by_priority_then_fifo() {
        let queue = queue();
        queue.enqueue(new_action("low", Priority::Low), 3).unwrap();
        queue.enqueue(new_action("high-1", Priority::High), 3).unwrap();
        queue.enqueue(new_action("medium", Priority::Medium), 3).unwrap();
        queue.enqueue(new_action("high-2", Priority::High), 3).unwrap();

        let labels = queue
            .list_pending(None)
            .into_iter()
            .map(|action| action.entity_label)
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["high-1", "high-2", "medium", "low"]);

        let high_only = queue.list_pending(Some(Priority::High));
        assert_eq!(high_only.len(), 2);
    }

    #[test]
    fn update_status_is_compare_and_set() {
        let queue = queue();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();

        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();

        let stale = queue.update_status(
            &id,
            ActionStatus::Pending,
            StatusUpdate::to(ActionStatus::Syncing),
        );
        assert!(matches!(stale, Err(Error::InvalidState(_))));

        let double_sync = queue.update_status(
            &id,
            ActionStatus::Syncing,
            StatusUpdate::to(ActionStatus::Syncing),
        );
        assert!(matches!(double_sync, Err(Error::InvalidState(_))));
        assert_eq!(queue.get(&id).unwrap().status, ActionStatus::Syncing);
    }

    #[test]
    fn retry_count_cannot_exceed_budget() {
        let queue = queue();
        let id = queue
            .enqueue(new_action("a", Priority::High).with_max_retries(1), 3)
            .unwrap();
        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();

        let result = queue.update_status(
            &id,
            ActionStatus::Syncing,
            StatusUpdate::to(ActionStatus::Failed).retry_count(2),
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(queue.get(&id).unwrap().retry_count, 0);
    }

    #[test]
    fn synced_is_terminal_and_evicted() {
        let queue = queue();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        let mut events = queue.subscribe();

        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();
        let synced = queue
            .update_status(&id, ActionStatus::Syncing, StatusUpdate::to(ActionStatus::Synced))
            .unwrap();
        assert_eq!(synced.status, ActionStatus::Synced);
        assert!(queue.get(&id).is_none());

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(seen.last(), Some(&QueueEvent::Removed { id }));
    }

    #[test]
    fn remove_rejects_syncing() {
        let queue = queue();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();

        assert!(matches!(queue.remove(&id), Err(Error::InvalidState(_))));
        assert!(queue.get(&id).is_some());

        queue
            .update_status(&id, ActionStatus::Syncing, StatusUpdate::to(ActionStatus::Pending))
            .unwrap();
        queue.remove(&id).unwrap();
        assert!(queue.get(&id).is_none());
        assert!(matches!(queue.remove(&id), Err(Error::NotFound(_))));
    }

    #[test]
    fn payload_replacement_updates_size() {
        let queue = queue();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();
        queue
            .update_status(&id, ActionStatus::Syncing, StatusUpdate::to(ActionStatus::Conflict))
            .unwrap();
        let merged = queue
            .update_status(
                &id,
                ActionStatus::Conflict,
                StatusUpdate::to(ActionStatus::Pending).payload(json!({"merged": true})),
            )
            .unwrap();
        assert_eq!(merged.payload, json!({"merged": true}));
        assert_eq!(merged.size_bytes, Some(15));
    }

    #[test]
    fn reload_reproduces_identical_records() {
        let store: Arc<dyn KeyValueStore> = Arc::new(Database::open_in_memory().unwrap());
        let queue = ActionQueue::load(Arc::clone(&store), 1024).unwrap();

        let a = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        let b = queue.enqueue(new_action("b", Priority::Low), 2).unwrap();
        queue
            .update_status(&b, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();
        queue
            .update_status(
                &b,
                ActionStatus::Syncing,
                StatusUpdate::to(ActionStatus::Failed)
                    .retry_count(1)
                    .error("timeout")
                    .next_attempt_at(Some(42)),
            )
            .unwrap();
        let before = queue.list_all();

        let reloaded = ActionQueue::load(store, 1024).unwrap();
        assert_eq!(reloaded.list_all(), before);
        assert_eq!(reloaded.get(&a).unwrap().payload, json!({"label": "a"}));

        let c = reloaded.enqueue(new_action("c", Priority::Low), 3).unwrap();
        assert!(reloaded.get(&c).unwrap().sequence > reloaded.get(&b).unwrap().sequence);
    }

    #[test]
    fn reload_quarantines_undecodable_actions() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = ActionQueue::load(Arc::clone(&store), 1024).unwrap();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        let broken = format!("{ACTIONS_PREFIX}not-an-action");
        store.put(&broken, "{\"status\": ").unwrap();

        let reloaded = ActionQueue::load(Arc::clone(&store), 1024).unwrap();

        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.get(&id).is_some());
        assert_eq!(store.get(&broken).unwrap(), None);
        assert_eq!(
            store
                .get(&format!("{QUARANTINE_PREFIX}{broken}"))
                .unwrap()
                .as_deref(),
            Some("{\"status\": ")
        );
    }

    #[test]
    fn reload_resets_interrupted_syncing() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = ActionQueue::load(Arc::clone(&store), 1024).unwrap();
        let id = queue.enqueue(new_action("a", Priority::High), 3).unwrap();
        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();

        let reloaded = ActionQueue::load(store, 1024).unwrap();
        let action = reloaded.get(&id).unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.retry_count, 0);
    }
}
