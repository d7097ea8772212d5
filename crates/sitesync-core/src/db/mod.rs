//! Durable storage layer for sitesync

mod connection;
mod migrations;
mod settings_repository;
mod store;

pub use connection::Database;
pub use settings_repository::{SettingsRepository, StoreSettingsRepository};
pub use store::{
    get_json, list_json, put_json, quarantine, KeyValueStore, MemoryStore, ACTIONS_PREFIX,
    CONFLICTS_PREFIX, QUARANTINE_PREFIX, SETTINGS_KEY, STORAGE_PREFIX,
};
