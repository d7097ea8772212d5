//! Engine-agnostic key/value storage used by the queue, quota manager, and settings

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Key namespace for queued actions
pub const ACTIONS_PREFIX: &str = "actions/";
/// Key namespace for cached storage items
pub const STORAGE_PREFIX: &str = "storage/";
/// Key namespace for open conflict records
pub const CONFLICTS_PREFIX: &str = "conflicts/";
/// Key of the single sync settings record
pub const SETTINGS_KEY: &str = "settings/sync";
/// Key namespace for records that failed to decode, keyed by their original key
pub const QUARANTINE_PREFIX: &str = "quarantine/";

/// Durable key/value storage with prefix scans.
///
/// Values are serialized JSON documents; keys are `namespace/id`.
pub trait KeyValueStore: Send + Sync {
    /// Fetch a value by key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace a value
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, ordered by key
    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// Serialize `value` and store it under `key`.
pub fn put_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    store.put(key, &encoded)
}

/// Load and deserialize the value under `key`.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    store
        .get(key)?
        .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
        .transpose()
}

/// Load and deserialize every value under `prefix`.
///
/// Undecodable entries are skipped with a warning instead of failing the load.
pub fn list_json<T: DeserializeOwned>(store: &dyn KeyValueStore, prefix: &str) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for (key, raw) in store.list_prefix(prefix)? {
        match serde_json::from_str(&raw) {
            Ok(value) => values.push(value),
            Err(error) => tracing::warn!(%key, %error, "Skipping undecodable stored record"),
        }
    }
    Ok(values)
}

/// Move the raw value under `key` aside to `quarantine/{key}`.
///
/// Returns the quarantine key. The value is copied before the original is
/// deleted, so a failure leaves it in at least one place.
pub fn quarantine(store: &dyn KeyValueStore, key: &str, raw: &str) -> Result<String> {
    let moved = format!("{QUARANTINE_PREFIX}{key}");
    store.put(&moved, raw)?;
    store.delete(key)?;
    Ok(moved)
}

/// In-memory store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        Ok(self
            .entries()?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
    }

    #[test]
    fn memory_store_prefix_scan_is_bounded() {
        let store = MemoryStore::new();
        store.put("actions/2", "b").unwrap();
        store.put("actions/1", "a").unwrap();
        store.put("actionsx/1", "x").unwrap();
        store.put("storage/1", "s").unwrap();

        let listed = store.list_prefix(ACTIONS_PREFIX).unwrap();
        assert_eq!(
            listed,
            vec![
                ("actions/1".to_string(), "a".to_string()),
                ("actions/2".to_string(), "b".to_string()),
            ]
        );

        store.delete("actions/1").unwrap();
        store.delete("actions/missing").unwrap();
        assert_eq!(store.list_prefix(ACTIONS_PREFIX).unwrap().len(), 1);
    }

    #[test]
    fn json_helpers_skip_bad_records() {
        let store = MemoryStore::new();
        put_json(&store, "storage/a", &Sample { name: "a".into() }).unwrap();
        store.put("storage/b", "not json").unwrap();

        let loaded: Vec<Sample> = list_json(&store, STORAGE_PREFIX).unwrap();
        assert_eq!(loaded, vec![Sample { name: "a".into() }]);

        let single: Option<Sample> = get_json(&store, "storage/a").unwrap();
        assert_eq!(single.unwrap().name, "a");
        assert!(get_json::<Sample>(&store, "storage/zzz").unwrap().is_none());
    }
}
