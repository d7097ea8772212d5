//! Conflict detection outcomes and resolution policies

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde_json::{Map, Value};

use crate::db::{list_json, put_json, KeyValueStore, CONFLICTS_PREFIX};
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, ActionStatus, ConflictPolicy, ConflictRecord, OfflineAction};
use crate::queue::ActionQueue;

/// Caller-supplied merge over `(server_state, client_state)`.
pub type MergeFn = Arc<dyn Fn(&Value, &Value) -> std::result::Result<Value, String> + Send + Sync>;

/// What to do with an action whose submission hit a version mismatch
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Drop the client payload; the server state stands
    ServerWins,
    /// Resubmit the unchanged payload once with the force flag
    ForceResubmit,
    /// Requeue with the merged payload
    Merged(Value),
    /// Keep the action in `Conflict` until the caller decides
    Park(ConflictRecord),
}

/// Object merge where client fields override server fields.
///
/// Non-object states resolve to the client state.
pub fn shallow_merge(server: &Value, client: &Value) -> std::result::Result<Value, String> {
    match (server, client) {
        (Value::Object(server), Value::Object(client)) => {
            let mut merged = server.clone();
            for (key, value) in client {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::Object(merged))
        }
        (_, Value::Null) => Err("client state is empty".to_string()),
        _ => Ok(client.clone()),
    }
}

fn object_keys(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object()
}

/// Human-readable hints for a conflict; never authoritative.
pub fn suggestions(action: &OfflineAction, server_state: &Value, client_state: &Value) -> Vec<String> {
    let mut hints = Vec::new();

    if server_state.is_null() {
        hints.push(format!(
            "{} {} no longer exists on the server; consider discarding this change",
            action.entity_type, action.entity_label
        ));
        return hints;
    }

    if action.kind == ActionKind::Delete {
        hints.push(format!(
            "{} {} was edited on the server after it was deleted locally",
            action.entity_type, action.entity_label
        ));
    }

    if let (Some(server), Some(client)) = (object_keys(server_state), object_keys(client_state)) {
        let mut changed = client
            .iter()
            .filter(|(key, value)| server.get(*key).is_some_and(|current| current != *value))
            .map(|(key, _)| key.as_str())
            .collect::<Vec<_>>();
        changed.sort_unstable();
        if !changed.is_empty() {
            hints.push(format!("Fields edited on both sides: {}", changed.join(", ")));
        }

        let mut server_only = server
            .keys()
            .filter(|key| !client.contains_key(*key))
            .map(String::as_str)
            .collect::<Vec<_>>();
        server_only.sort_unstable();
        if !server_only.is_empty() {
            hints.push(format!(
                "Server has fields missing locally: {}",
                server_only.join(", ")
            ));
        }
        hints.push("Merge field by field to keep both sets of edits".to_string());
    }

    hints.push("Keep the server version to discard local edits".to_string());
    hints.push("Overwrite with local changes if the server copy is stale".to_string());
    hints
}

/// Decides the fate of conflicting actions and tracks open conflict records
pub struct ConflictResolver {
    store: Arc<dyn KeyValueStore>,
    records: Mutex<HashMap<ActionId, ConflictRecord>>,
    merge_fn: RwLock<Option<MergeFn>>,
}

fn conflict_key(id: &ActionId) -> String {
    format!("{CONFLICTS_PREFIX}{id}")
}

impl ConflictResolver {
    pub fn load(store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let records = list_json::<ConflictRecord>(store.as_ref(), CONFLICTS_PREFIX)?
            .into_iter()
            .map(|record| (record.action_id, record))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            store,
            records: Mutex::new(records),
            merge_fn: RwLock::new(None),
        })
    }

    pub fn set_merge_fn(&self, merge_fn: MergeFn) {
        *self
            .merge_fn
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(merge_fn);
    }

    /// Apply `policy` to a conflict reported for `action`.
    ///
    /// `already_forced` marks a conflict returned by a forced resubmission;
    /// `ClientWins` then parks instead of forcing again.
    pub fn decide(
        &self,
        policy: ConflictPolicy,
        action: &OfflineAction,
        server_version: Option<String>,
        server_state: &Value,
        already_forced: bool,
    ) -> Resolution {
        match policy {
            ConflictPolicy::ServerWins => Resolution::ServerWins,
            ConflictPolicy::ClientWins if !already_forced => Resolution::ForceResubmit,
            ConflictPolicy::Merge => match self.merge(server_state, &action.payload) {
                Ok(merged) => Resolution::Merged(merged),
                Err(error) => {
                    tracing::warn!(action = %action.id, %error, "Merge failed, waiting for manual resolution");
                    Resolution::Park(Self::build_record(action, server_version, server_state))
                }
            },
            ConflictPolicy::ClientWins | ConflictPolicy::Manual => {
                let mut record = Self::build_record(action, server_version, server_state);
                if already_forced {
                    record
                        .suggestions
                        .insert(0, "Forced resubmission was rejected again".to_string());
                }
                Resolution::Park(record)
            }
        }
    }

    /// Run the configured merge function.
    pub fn merge(&self, server_state: &Value, client_state: &Value) -> Result<Value> {
        let merge_fn = self
            .merge_fn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::Validation("no merge function configured".to_string()))?;

        match merge_fn(server_state, client_state) {
            Ok(Value::Null) => Err(Error::Validation(
                "merge function returned an empty payload".to_string(),
            )),
            Ok(merged) => Ok(merged),
            Err(message) => Err(Error::Validation(format!("merge function failed: {message}"))),
        }
    }

    pub fn build_record(
        action: &OfflineAction,
        server_version: Option<String>,
        server_state: &Value,
    ) -> ConflictRecord {
        ConflictRecord {
            action_id: action.id,
            server_version,
            server_state: server_state.clone(),
            client_state: action.payload.clone(),
            suggestions: suggestions(action, server_state, &action.payload),
            detected_at: crate::util::unix_millis_now(),
        }
    }

    /// Store the record for an action entering `Conflict`, replacing any
    /// previous one.
    pub fn park(&self, record: ConflictRecord) -> Result<()> {
        let mut records = self.records();
        put_json(self.store.as_ref(), &conflict_key(&record.action_id), &record)?;
        records.insert(record.action_id, record);
        Ok(())
    }

    pub fn get(&self, id: &ActionId) -> Option<ConflictRecord> {
        self.records().get(id).cloned()
    }

    /// Open conflicts, oldest first.
    pub fn list(&self) -> Vec<ConflictRecord> {
        let mut records = self.records().values().cloned().collect::<Vec<_>>();
        records.sort_by_key(|record| (record.detected_at, record.action_id));
        records
    }

    /// Remove the record once its action left `Conflict`.
    pub fn clear(&self, id: &ActionId) -> Result<Option<ConflictRecord>> {
        let mut records = self.records();
        self.store.delete(&conflict_key(id))?;
        Ok(records.remove(id))
    }

    /// Drop records whose action is gone or no longer in `Conflict`.
    pub fn reconcile(&self, queue: &ActionQueue) -> Result<usize> {
        let stale = self
            .records()
            .keys()
            .filter(|id| {
                queue
                    .get(id)
                    .is_none_or(|action| action.status != ActionStatus::Conflict)
            })
            .copied()
            .collect::<Vec<_>>();

        for id in &stale {
            self.clear(id)?;
            tracing::debug!(action = %id, "Dropped stale conflict record");
        }
        Ok(stale.len())
    }

    fn records(&self) -> MutexGuard<'_, HashMap<ActionId, ConflictRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{NewAction, Priority};
    use crate::queue::StatusUpdate;
    use serde_json::json;

    fn action(payload: Value) -> OfflineAction {
        NewAction::new(ActionKind::Update, "rfi", "rfi-12", payload)
            .with_priority(Priority::High)
            .into_action(3, 4096, 0)
            .unwrap()
    }

    fn resolver() -> ConflictResolver {
        ConflictResolver::load(Arc::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn server_wins_and_client_wins() {
        let resolver = resolver();
        let action = action(json!({"status": "open"}));
        let server = json!({"status": "closed"});

        assert_eq!(
            resolver.decide(ConflictPolicy::ServerWins, &action, None, &server, false),
            Resolution::ServerWins
        );
        assert_eq!(
            resolver.decide(ConflictPolicy::ClientWins, &action, None, &server, false),
            Resolution::ForceResubmit
        );
        let second = resolver.decide(ConflictPolicy::ClientWins, &action, None, &server, true);
        let Resolution::Park(record) = second else {
            panic!("expected park after forced retry");
        };
        assert_eq!(record.suggestions[0], "Forced resubmission was rejected again");
    }

    #[test]
    fn merge_uses_configured_function() {
        let resolver = resolver();
        resolver.set_merge_fn(Arc::new(shallow_merge));
        let action = action(json!({"status": "open"}));
        let server = json!({"status": "closed", "assignee": "kim"});

        let resolution =
            resolver.decide(ConflictPolicy::Merge, &action, Some("v7".into()), &server, false);
        assert_eq!(
            resolution,
            Resolution::Merged(json!({"status": "open", "assignee": "kim"}))
        );
    }

    #[test]
    fn merge_failure_degrades_to_manual() {
        let resolver = resolver();
        let action = action(json!({"status": "open"}));
        let server = json!({"status": "closed"});

        // No merge function
        assert!(matches!(
            resolver.decide(ConflictPolicy::Merge, &action, None, &server, false),
            Resolution::Park(_)
        ));

        resolver.set_merge_fn(Arc::new(|_, _| Err("incompatible".to_string())));
        assert!(matches!(
            resolver.decide(ConflictPolicy::Merge, &action, None, &server, false),
            Resolution::Park(_)
        ));

        resolver.set_merge_fn(Arc::new(|_, _| Ok(Value::Null)));
        assert!(resolver.merge(&server, &action.payload).is_err());
    }

    #[test]
    fn suggestions_describe_divergence() {
        let action = action(json!({"status": "open", "due": "05-01"}));
        let hints = suggestions(
            &action,
            &json!({"status": "closed", "due": "05-01", "cost": 10}),
            &action.payload,
        );
        assert!(hints.contains(&"Fields edited on both sides: status".to_string()));
        assert!(hints.contains(&"Server has fields missing locally: cost".to_string()));

        let gone = suggestions(&action, &Value::Null, &action.payload);
        assert_eq!(gone.len(), 1);
        assert!(gone[0].contains("no longer exists"));
    }

    #[test]
    fn park_keeps_one_record_per_action_and_persists() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let resolver = ConflictResolver::load(Arc::clone(&store)).unwrap();
        let action = action(json!({"status": "open"}));

        let first = ConflictResolver::build_record(&action, Some("v1".into()), &json!({}));
        let second = ConflictResolver::build_record(&action, Some("v2".into()), &json!({}));
        resolver.park(first).unwrap();
        resolver.park(second).unwrap();
        assert_eq!(resolver.list().len(), 1);
        assert_eq!(
            resolver.get(&action.id).unwrap().server_version.as_deref(),
            Some("v2")
        );

        let reloaded = ConflictResolver::load(Arc::clone(&store)).unwrap();
        assert_eq!(reloaded.list().len(), 1);

        reloaded.clear(&action.id).unwrap();
        assert!(reloaded.get(&action.id).is_none());
        assert!(ConflictResolver::load(store).unwrap().list().is_empty());
    }

    #[test]
    fn reconcile_drops_records_without_conflict_action() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = ActionQueue::load(Arc::clone(&store), 4096).unwrap();
        let resolver = ConflictResolver::load(Arc::clone(&store)).unwrap();

        let id = queue
            .enqueue(NewAction::new(ActionKind::Update, "rfi", "1", json!({})), 3)
            .unwrap();
        queue
            .update_status(&id, ActionStatus::Pending, StatusUpdate::to(ActionStatus::Syncing))
            .unwrap();
        queue
            .update_status(&id, ActionStatus::Syncing, StatusUpdate::to(ActionStatus::Conflict))
            .unwrap();
        let conflicted = queue.get(&id).unwrap();
        resolver
            .park(ConflictResolver::build_record(&conflicted, None, &json!({})))
            .unwrap();

        let orphan = action(json!({}));
        resolver
            .park(ConflictResolver::build_record(&orphan, None, &json!({})))
            .unwrap();

        assert_eq!(resolver.reconcile(&queue).unwrap(), 1);
        assert!(resolver.get(&id).is_some());
        assert!(resolver.get(&orphan.id).is_none());
    }
}
