//! Local storage quota accounting and least-recently-used eviction

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::db::{list_json, put_json, KeyValueStore, STORAGE_PREFIX};
use crate::error::{Error, Result};
use crate::models::{StorageItem, StorageItemId, StorageItemKind};

pub const DEFAULT_EVICTION_THRESHOLD: f64 = 0.8;

/// Snapshot of storage consumption
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsage {
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    pub eviction_threshold: f64,
    pub item_count: usize,
    /// Bytes that automatic eviction may reclaim
    pub evictable_bytes: u64,
    pub by_kind: BTreeMap<StorageItemKind, u64>,
}

impl StorageUsage {
    pub fn ratio(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return if self.used_bytes == 0 { 0.0 } else { f64::INFINITY };
        }
        self.used_bytes as f64 / self.capacity_bytes as f64
    }
}

struct QuotaState {
    items: HashMap<StorageItemId, StorageItem>,
    capacity_bytes: u64,
}

impl QuotaState {
    fn used_bytes(&self) -> u64 {
        self.items.values().map(|item| item.size_bytes).sum()
    }
}

/// Tracks cached artifacts against a byte capacity.
///
/// Independent of the action queue: it never reads or writes queued actions.
pub struct StorageQuotaManager {
    store: Arc<dyn KeyValueStore>,
    state: Mutex<QuotaState>,
    threshold: f64,
}

fn item_key(id: &StorageItemId) -> String {
    format!("{STORAGE_PREFIX}{id}")
}

fn over_threshold(used: u64, capacity: u64, threshold: f64) -> bool {
    if capacity == 0 {
        return used > 0;
    }
    used as f64 / capacity as f64 > threshold
}

impl StorageQuotaManager {
    pub fn load(store: Arc<dyn KeyValueStore>, capacity_bytes: u64, threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Validation(format!(
                "eviction threshold must be within (0, 1], got {threshold}"
            )));
        }

        let items = list_json::<StorageItem>(store.as_ref(), STORAGE_PREFIX)?
            .into_iter()
            .map(|item| (item.id, item.normalized()))
            .collect::<HashMap<_, _>>();
        tracing::debug!(count = items.len(), capacity_bytes, "Loaded storage items");

        Ok(Self {
            store,
            state: Mutex::new(QuotaState {
                items,
                capacity_bytes,
            }),
            threshold,
        })
    }

    /// Record an item and evict least-recently-accessed deletable items while
    /// usage stays above the threshold.
    ///
    /// Returns the evicted items. If eviction cannot bring usage down to the
    /// threshold, nothing changes and `QuotaExceeded` is returned.
    pub fn register(&self, item: StorageItem) -> Result<Vec<StorageItem>> {
        let item = item.normalized();
        let mut state = self.state();

        let replaced = state.items.get(&item.id).map_or(0, |old| old.size_bytes);
        let used_after = state.used_bytes() - replaced + item.size_bytes;

        let mut victims = Vec::new();
        if over_threshold(used_after, state.capacity_bytes, self.threshold) {
            let mut candidates = state
                .items
                .values()
                .filter(|existing| existing.id != item.id && existing.is_evictable())
                .collect::<Vec<_>>();
            candidates.sort_by_key(|existing| (existing.last_accessed_at, existing.id));

            let mut remaining = used_after;
            for candidate in candidates {
                if !over_threshold(remaining, state.capacity_bytes, self.threshold) {
                    break;
                }
                remaining -= candidate.size_bytes;
                victims.push(candidate.id);
            }

            if over_threshold(remaining, state.capacity_bytes, self.threshold) {
                return Err(Error::QuotaExceeded(format!(
                    "{} needs {} bytes; {remaining} of {} bytes would remain in use after eviction",
                    item.name, item.size_bytes, state.capacity_bytes
                )));
            }
        }

        let mut evicted = Vec::with_capacity(victims.len());
        for id in victims {
            self.store.delete(&item_key(&id))?;
            if let Some(removed) = state.items.remove(&id) {
                tracing::info!(
                    item = %removed.id,
                    name = %removed.name,
                    size_bytes = removed.size_bytes,
                    "Evicted storage item"
                );
                evicted.push(removed);
            }
        }

        put_json(self.store.as_ref(), &item_key(&item.id), &item)?;
        tracing::debug!(item = %item.id, name = %item.name, size_bytes = item.size_bytes, "Registered storage item");
        state.items.insert(item.id, item);
        Ok(evicted)
    }

    /// Refresh an item's last access time.
    pub fn touch(&self, id: &StorageItemId) -> Result<StorageItem> {
        let mut state = self.state();
        let item = state
            .items
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let mut touched = item.clone();
        touched.last_accessed_at = crate::util::unix_millis_now().max(item.last_accessed_at);
        put_json(self.store.as_ref(), &item_key(id), &touched)?;
        *item = touched.clone();
        Ok(touched)
    }

    /// Delete an item on request. Essential items are refused.
    pub fn remove(&self, id: &StorageItemId) -> Result<StorageItem> {
        let mut state = self.state();
        let item = state
            .items
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if item.essential || !item.can_delete {
            return Err(Error::InvalidState(format!(
                "storage item {} is essential and cannot be removed",
                item.name
            )));
        }

        self.store.delete(&item_key(id))?;
        let removed = state
            .items
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        tracing::info!(item = %removed.id, name = %removed.name, "Removed storage item");
        Ok(removed)
    }

    pub fn get(&self, id: &StorageItemId) -> Option<StorageItem> {
        self.state().items.get(id).cloned()
    }

    /// Items, most recently accessed first.
    pub fn list(&self) -> Vec<StorageItem> {
        let mut items = self.state().items.values().cloned().collect::<Vec<_>>();
        items.sort_by(|a, b| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        items
    }

    pub fn used_bytes(&self) -> u64 {
        self.state().used_bytes()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.state().capacity_bytes
    }

    /// Change capacity. Takes effect at the next registration.
    pub fn set_capacity(&self, capacity_bytes: u64) {
        self.state().capacity_bytes = capacity_bytes;
    }

    pub fn usage(&self) -> StorageUsage {
        let state = self.state();
        let mut by_kind = BTreeMap::new();
        let mut evictable_bytes = 0;
        for item in state.items.values() {
            *by_kind.entry(item.kind).or_insert(0) += item.size_bytes;
            if item.is_evictable() {
                evictable_bytes += item.size_bytes;
            }
        }

        StorageUsage {
            used_bytes: state.used_bytes(),
            capacity_bytes: state.capacity_bytes,
            eviction_threshold: self.threshold,
            item_count: state.items.len(),
            evictable_bytes,
            by_kind,
        }
    }

    fn state(&self) -> MutexGuard<'_, QuotaState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use pretty_assertions::assert_eq;

    const MB: u64 = 1024 * 1024;

    fn item(name: &str, size: u64, accessed: i64) -> StorageItem {
        let mut item = StorageItem::new(StorageItemKind::Media, name, size).unwrap();
        item.last_accessed_at = accessed;
        item
    }

    fn manager(capacity: u64) -> StorageQuotaManager {
        StorageQuotaManager::load(
            Arc::new(MemoryStore::new()),
            capacity,
            DEFAULT_EVICTION_THRESHOLD,
        )
        .unwrap()
    }

    #[test]
    fn evicts_least_recently_accessed_first() {
        // 50 MB capacity, threshold 40 MB
        let quota = manager(50 * MB);
        let old = item("old-photo", 10 * MB, 100);
        let recent = item("recent-photo", 10 * MB, 300);
        let mut snapshot = item("project-snapshot", 22 * MB, 50).essential();
        snapshot.kind = StorageItemKind::Project;
        assert!(quota.register(snapshot).unwrap().is_empty());
        assert!(quota.register(old.clone()).unwrap().is_empty());
        assert_eq!(quota.used_bytes(), 32 * MB);

        // Crosses the threshold at 42 MB: the oldest deletable item goes.
        let evicted = quota.register(recent.clone()).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, old.id);
        assert_eq!(quota.used_bytes(), 32 * MB);
        assert!(quota.get(&recent.id).is_some());
    }

    #[test]
    fn never_evicts_the_new_item_or_essentials() {
        let quota = manager(50 * MB);
        quota
            .register(item("template", 30 * MB, 1).essential())
            .unwrap();

        let result = quota.register(item("video", 15 * MB, 2));
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));
        assert_eq!(quota.used_bytes(), 30 * MB);
        assert_eq!(quota.list().len(), 1);
    }

    #[test]
    fn rejection_leaves_existing_items_untouched() {
        let quota = manager(10 * MB);
        let keep = item("plan.pdf", 2 * MB, 1);
        quota.register(keep.clone()).unwrap();

        let result = quota.register(item("scan.tiff", 9 * MB, 2));
        assert!(matches!(result, Err(Error::QuotaExceeded(_))));
        assert!(quota.get(&keep.id).is_some());
    }

    #[test]
    fn remove_refuses_essential_items() {
        let quota = manager(100 * MB);
        let essential = item("site-plan", MB, 1).essential();
        let cached = item("thumbnail", MB, 1);
        quota.register(essential.clone()).unwrap();
        quota.register(cached.clone()).unwrap();

        assert!(matches!(
            quota.remove(&essential.id),
            Err(Error::InvalidState(_))
        ));
        quota.remove(&cached.id).unwrap();
        assert_eq!(quota.used_bytes(), MB);
        assert!(matches!(quota.remove(&cached.id), Err(Error::NotFound(_))));
    }

    #[test]
    fn touch_protects_recent_items() {
        let quota = manager(10 * MB);
        let a = item("a", 4 * MB, 1);
        let b = item("b", 4 * MB, 2);
        quota.register(a.clone()).unwrap();
        quota.register(b.clone()).unwrap();
        quota.touch(&a.id).unwrap();

        let evicted = quota.register(item("c", 2 * MB, 3)).unwrap();
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, b.id);
    }

    #[test]
    fn usage_breaks_down_by_kind() {
        let quota = manager(100 * MB);
        let mut doc = item("drawings.pdf", 3 * MB, 1);
        doc.kind = StorageItemKind::Document;
        quota.register(doc).unwrap();
        quota.register(item("photo", 2 * MB, 1)).unwrap();
        quota.register(item("template", MB, 1).essential()).unwrap();

        let usage = quota.usage();
        assert_eq!(usage.used_bytes, 6 * MB);
        assert_eq!(usage.item_count, 3);
        assert_eq!(usage.evictable_bytes, 5 * MB);
        assert_eq!(usage.by_kind.get(&StorageItemKind::Document), Some(&(3 * MB)));
        assert_eq!(usage.by_kind.get(&StorageItemKind::Media), Some(&(3 * MB)));
        assert!((usage.ratio() - 0.06).abs() < 1e-9);
    }

    #[test]
    fn items_survive_reload() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let quota = StorageQuotaManager::load(Arc::clone(&store), 100 * MB, 0.8).unwrap();
        let kept = item("drawing", 5 * MB, 7);
        quota.register(kept.clone()).unwrap();

        let reloaded = StorageQuotaManager::load(store, 100 * MB, 0.8).unwrap();
        assert_eq!(reloaded.get(&kept.id), Some(kept));
        assert_eq!(reloaded.used_bytes(), 5 * MB);
    }

    #[test]
    fn rejects_invalid_threshold() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(StorageQuotaManager::load(Arc::clone(&store), MB, 0.0).is_err());
        assert!(StorageQuotaManager::load(store, MB, 1.5).is_err());
    }
}
