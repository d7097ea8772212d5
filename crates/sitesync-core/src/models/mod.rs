//! Data models for sitesync

mod action;
mod conflict;
mod history;
mod network;
mod settings;
mod storage_item;

pub use action::{ActionId, ActionKind, ActionStatus, NewAction, OfflineAction, Priority};
pub use conflict::{ConflictPolicy, ConflictRecord};
pub use history::{HistoryOutcome, SyncHistoryEntry};
pub use network::{ConnectionType, EffectiveType, NetworkStatus};
pub use settings::{
    BackoffStrategy, SettingsPatch, SyncSettings, MAX_BACKOFF_SECS, MAX_INTERVAL_SECS,
    MAX_RETRIES_LIMIT,
};
pub use storage_item::{ItemSyncStatus, StorageItem, StorageItemId, StorageItemKind};
