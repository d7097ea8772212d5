//! Cached storage item model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for a cached storage item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageItemId(Uuid);

impl StorageItemId {
    /// Create a new unique storage item ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for StorageItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StorageItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StorageItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageItemKind {
    Project,
    Template,
    Media,
    Document,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemSyncStatus {
    #[default]
    Synced,
    PendingUpload,
    LocalOnly,
}

/// A cached artifact outside the mutation queue (project snapshot, template, media).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageItem {
    pub id: StorageItemId,
    pub kind: StorageItemKind,
    pub name: String,
    pub size_bytes: u64,
    /// Last access timestamp (Unix ms)
    pub last_accessed_at: i64,
    /// Never evicted automatically
    pub essential: bool,
    /// User may delete it
    pub can_delete: bool,
    pub sync_status: ItemSyncStatus,
}

impl StorageItem {
    /// Create a deletable, non-essential item accessed now.
    pub fn new(kind: StorageItemKind, name: impl Into<String>, size_bytes: u64) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::Validation(
                "Storage item name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            id: StorageItemId::new(),
            kind,
            name,
            size_bytes,
            last_accessed_at: crate::util::unix_millis_now(),
            essential: false,
            can_delete: true,
            sync_status: ItemSyncStatus::Synced,
        })
    }

    /// Mark as essential; essential items are never deletable.
    #[must_use]
    pub const fn essential(mut self) -> Self {
        self.essential = true;
        self.can_delete = false;
        self
    }

    /// Eligible for automatic eviction.
    pub const fn is_evictable(&self) -> bool {
        self.can_delete && !self.essential
    }

    /// Enforce `essential` over `can_delete`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.essential && self.can_delete {
            tracing::debug!(item = %self.id, "Essential storage item forced non-deletable");
            self.can_delete = false;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_item_new() {
        let item = StorageItem::new(StorageItemKind::Media, "site-photo.jpg", 2048).unwrap();
        assert!(item.is_evictable());
        assert!(item.last_accessed_at > 0);
        assert!(StorageItem::new(StorageItemKind::Media, "  ", 1).is_err());
    }

    #[test]
    fn test_essential_is_stronger_than_can_delete() {
        let mut item = StorageItem::new(StorageItemKind::Project, "tower-b", 10).unwrap();
        item.essential = true;
        let item = item.normalized();
        assert!(!item.can_delete);
        assert!(!item.is_evictable());

        let item = StorageItem::new(StorageItemKind::Template, "rfi", 10)
            .unwrap()
            .essential();
        assert!(!item.can_delete);
    }
}
