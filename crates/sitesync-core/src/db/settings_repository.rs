//! Settings repository implementation

use crate::error::Result;
use crate::models::SyncSettings;

use super::store::{get_json, put_json, KeyValueStore, SETTINGS_KEY};

/// Trait for settings storage operations
pub trait SettingsRepository {
    /// Load settings, falling back to defaults when none are stored
    fn load(&self) -> Result<SyncSettings>;

    /// Save settings
    fn save(&self, settings: &SyncSettings) -> Result<()>;
}

/// Key/value implementation of `SettingsRepository`
pub struct StoreSettingsRepository<'a> {
    store: &'a dyn KeyValueStore,
}

impl<'a> StoreSettingsRepository<'a> {
    /// Create a new repository over the given store
    pub const fn new(store: &'a dyn KeyValueStore) -> Self {
        Self { store }
    }
}

impl SettingsRepository for StoreSettingsRepository<'_> {
    fn load(&self) -> Result<SyncSettings> {
        let stored = match get_json::<SyncSettings>(self.store, SETTINGS_KEY) {
            Ok(stored) => stored,
            Err(error) => {
                tracing::warn!(%error, "Stored sync settings unreadable, using defaults");
                None
            }
        };

        let Some(settings) = stored else {
            return Ok(SyncSettings::default());
        };

        if let Err(error) = settings.validate() {
            tracing::warn!(%error, "Stored sync settings invalid, using defaults");
            return Ok(SyncSettings::default());
        }

        Ok(settings)
    }

    fn save(&self, settings: &SyncSettings) -> Result<()> {
        settings.validate()?;
        put_json(self.store, SETTINGS_KEY, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MemoryStore};
    use crate::models::{BackoffStrategy, ConflictPolicy};

    #[test]
    fn test_load_default_settings() {
        let db = Database::open_in_memory().unwrap();
        let repo = StoreSettingsRepository::new(&db);

        let settings = repo.load().unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_save_and_load_settings() {
        let db = Database::open_in_memory().unwrap();
        let repo = StoreSettingsRepository::new(&db);

        let settings = SyncSettings {
            wifi_only: true,
            conflict_resolution: ConflictPolicy::Merge,
            backoff: BackoffStrategy::Exponential,
            max_retries: 7,
            ..SyncSettings::default()
        };

        repo.save(&settings).unwrap();

        let loaded = repo.load().unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_invalid_stored_settings_fall_back_to_defaults() {
        let store = MemoryStore::new();
        store
            .put(SETTINGS_KEY, r#"{"sync_interval_seconds": 0}"#)
            .unwrap();
        let repo = StoreSettingsRepository::new(&store);
        assert_eq!(repo.load().unwrap(), SyncSettings::default());

        store.put(SETTINGS_KEY, "garbage").unwrap();
        assert_eq!(repo.load().unwrap(), SyncSettings::default());
    }

    #[test]
    fn test_save_rejects_invalid_settings() {
        let store = MemoryStore::new();
        let repo = StoreSettingsRepository::new(&store);
        let settings = SyncSettings {
            retry_interval_seconds: 0,
            ..SyncSettings::default()
        };
        assert!(repo.save(&settings).is_err());
        assert!(store.get(SETTINGS_KEY).unwrap().is_none());
    }
}
