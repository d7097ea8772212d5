//! Caller-facing sync engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::conflict::{ConflictResolver, MergeFn};
use crate::db::{Database, KeyValueStore, SettingsRepository, StoreSettingsRepository};
use crate::error::{Error, Result};
use crate::models::{
    ActionId, ActionStatus, ConflictRecord, NetworkStatus, NewAction, OfflineAction,
    SettingsPatch, StorageItem, StorageItemId, SyncHistoryEntry, SyncSettings, MAX_INTERVAL_SECS,
};
use crate::network::{spawn_polling, ConnectivityProbe, NetworkMonitor, SubscriptionId};
use crate::queue::{ActionQueue, QueueEvent};
use crate::quota::{StorageQuotaManager, StorageUsage};
use crate::state::SyncState;
use crate::sync::{
    ConflictDecision, CoordinatorOptions, DrainOutcome, RemoteApply, SyncCoordinator,
};
use crate::task::ScheduledTask;

/// Handle for a queue change callback; dropping it unsubscribes.
pub type QueueSubscription = ScheduledTask;

#[derive(Default)]
struct Lifecycle {
    scheduler: Option<ScheduledTask>,
    probe: Option<ScheduledTask>,
    network_subscription: Option<SubscriptionId>,
    shutdown: Option<CancellationToken>,
}

struct EngineInner {
    store: Arc<dyn KeyValueStore>,
    queue: Arc<ActionQueue>,
    resolver: Arc<ConflictResolver>,
    quota: StorageQuotaManager,
    monitor: NetworkMonitor,
    coordinator: Arc<SyncCoordinator>,
    settings_write: Mutex<()>,
    settings_changed: Arc<Notify>,
    lifecycle: Mutex<Lifecycle>,
}

/// Offline action sync engine.
///
/// Cheap to clone; clones share one queue, coordinator and scheduler.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Open the engine on the configured database, or in memory when no path
    /// is set.
    pub fn open(
        config: &EngineConfig,
        remote: Arc<dyn RemoteApply>,
        initial_network: NetworkStatus,
    ) -> Result<Self> {
        let store: Arc<dyn KeyValueStore> = match &config.database_path {
            Some(path) => Arc::new(Database::open(path)?),
            None => {
                tracing::info!("Running with an in-memory store");
                Arc::new(Database::open_in_memory()?)
            }
        };
        Self::with_store(store, remote, config, initial_network)
    }

    /// Load queue, conflicts, storage items and settings from `store`.
    pub fn with_store(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteApply>,
        config: &EngineConfig,
        initial_network: NetworkStatus,
    ) -> Result<Self> {
        let settings = StoreSettingsRepository::new(store.as_ref()).load()?;
        let queue = Arc::new(ActionQueue::load(Arc::clone(&store), config.max_payload_bytes)?);
        let resolver = Arc::new(ConflictResolver::load(Arc::clone(&store))?);
        resolver.reconcile(&queue)?;
        let quota = StorageQuotaManager::load(
            Arc::clone(&store),
            config.storage_capacity_bytes,
            config.eviction_threshold,
        )?;
        let monitor = NetworkMonitor::with_debounce(initial_network, config.network_debounce);
        let coordinator = SyncCoordinator::new(
            Arc::clone(&queue),
            Arc::clone(&resolver),
            remote,
            monitor.clone(),
            settings,
            CoordinatorOptions {
                attempt_timeout: config.attempt_timeout,
                history_limit: config.history_limit,
            },
        );

        tracing::info!(
            actions = queue.len(),
            conflicts = resolver.list().len(),
            "Sync engine loaded"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                store,
                queue,
                resolver,
                quota,
                monitor,
                coordinator,
                settings_write: Mutex::new(()),
                settings_changed: Arc::new(Notify::new()),
                lifecycle: Mutex::new(Lifecycle::default()),
            }),
        })
    }

    /// Start background scheduling: network transitions, the periodic timer
    /// and restored retry timers. Drains once if already online with work.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.scheduler.is_some() {
            return Err(Error::InvalidState("sync engine already started".to_string()));
        }

        let (transitions_tx, transitions_rx) = mpsc::unbounded_channel();
        let subscription = self.inner.monitor.on_change(move |status| {
            // Receiver gone means the scheduler stopped
            let _ = transitions_tx.send(*status);
        });

        let shutdown = CancellationToken::new();
        let scheduler = Scheduler {
            queue: Arc::clone(&self.inner.queue),
            coordinator: Arc::clone(&self.inner.coordinator),
            monitor: self.inner.monitor.clone(),
            settings_changed: Arc::clone(&self.inner.settings_changed),
            shutdown: shutdown.clone(),
        };
        lifecycle.scheduler = Some(ScheduledTask::spawn(scheduler.run(transitions_rx)));
        lifecycle.network_subscription = Some(subscription);
        lifecycle.shutdown = Some(shutdown);
        drop(lifecycle);

        self.inner.coordinator.restore_retry_timers();
        tracing::info!("Sync engine started");
        Ok(())
    }

    /// Poll `probe` for connectivity until shutdown.
    pub fn start_probe<P>(&self, probe: P, interval: Duration)
    where
        P: ConnectivityProbe + 'static,
    {
        let task = spawn_polling(self.inner.monitor.clone(), probe, interval);
        self.lifecycle().probe = Some(task);
    }

    /// Stop scheduling, abort the running pass and every retry timer.
    ///
    /// An attempt in flight is interrupted and its action returns to `Pending`.
    pub fn shutdown(&self) {
        // Interrupt the running pass before its task is aborted.
        self.inner.coordinator.cancel_all();

        let mut lifecycle = self.lifecycle();
        if let Some(token) = lifecycle.shutdown.take() {
            token.cancel();
        }
        if let Some(id) = lifecycle.network_subscription.take() {
            self.inner.monitor.unsubscribe(id);
        }
        lifecycle.scheduler.take();
        lifecycle.probe.take();
        drop(lifecycle);

        tracing::info!("Sync engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle()
            .scheduler
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn enqueue(&self, action: NewAction) -> Result<ActionId> {
        let max_retries = self.inner.coordinator.settings().max_retries;
        self.inner.queue.enqueue(action, max_retries)
    }

    pub fn retry_action(&self, id: &ActionId) -> Result<OfflineAction> {
        self.inner.coordinator.retry_action(id)
    }

    pub fn remove_action(&self, id: &ActionId) -> Result<OfflineAction> {
        self.inner.coordinator.remove_action(id)
    }

    /// Resolve a parked conflict. Returns the requeued action, or `None` when
    /// the server state was kept.
    pub fn resolve_conflict(
        &self,
        id: &ActionId,
        decision: ConflictDecision,
        merged: Option<Value>,
    ) -> Result<Option<OfflineAction>> {
        self.inner.coordinator.resolve_conflict(id, decision, merged)
    }

    pub fn set_merge_fn(&self, merge_fn: MergeFn) {
        self.inner.resolver.set_merge_fn(merge_fn);
    }

    pub async fn run_drain_now(&self) -> DrainOutcome {
        self.inner.coordinator.drain().await
    }

    /// Abort the running pass and pending retry timers.
    pub fn cancel_all(&self) {
        self.inner.coordinator.cancel_all();
    }

    /// Validate, persist and apply a partial settings update.
    pub fn update_settings(&self, patch: &SettingsPatch) -> Result<SyncSettings> {
        let _write = self
            .inner
            .settings_write
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let next = self.inner.coordinator.settings().apply(patch)?;
        StoreSettingsRepository::new(self.inner.store.as_ref()).save(&next)?;
        self.inner.coordinator.set_settings(next.clone());
        self.inner.settings_changed.notify_one();

        tracing::info!(
            auto_sync = next.auto_sync,
            interval = next.sync_interval_seconds,
            wifi_only = next.wifi_only,
            policy = %next.conflict_resolution,
            "Sync settings updated"
        );
        Ok(next)
    }

    pub fn settings(&self) -> SyncSettings {
        self.inner.coordinator.settings()
    }

    /// Register a cached item; returns the items evicted to make room.
    pub fn register_storage_item(&self, item: StorageItem) -> Result<Vec<StorageItem>> {
        self.inner.quota.register(item)
    }

    pub fn clear_storage_item(&self, id: &StorageItemId) -> Result<StorageItem> {
        self.inner.quota.remove(id)
    }

    pub fn touch_storage_item(&self, id: &StorageItemId) -> Result<StorageItem> {
        self.inner.quota.touch(id)
    }

    pub fn set_storage_capacity(&self, capacity_bytes: u64) {
        self.inner.quota.set_capacity(capacity_bytes);
    }

    pub fn storage_items(&self) -> Vec<StorageItem> {
        self.inner.quota.list()
    }

    pub fn storage_usage(&self) -> StorageUsage {
        self.inner.quota.usage()
    }

    pub fn get_network_status(&self) -> NetworkStatus {
        self.inner.monitor.current()
    }

    /// Feed a platform connectivity observation.
    pub fn report_network(&self, status: NetworkStatus) {
        self.inner.monitor.report(status);
    }

    pub fn network_monitor(&self) -> &NetworkMonitor {
        &self.inner.monitor
    }

    /// Invoke `callback` for every queue change until the handle is dropped.
    pub fn subscribe_to_queue_changes<F>(&self, callback: F) -> QueueSubscription
    where
        F: Fn(QueueEvent) + Send + 'static,
    {
        let mut events = self.inner.queue.subscribe();
        ScheduledTask::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => callback(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Queue subscriber fell behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn get_action(&self, id: &ActionId) -> Option<OfflineAction> {
        self.inner.queue.get(id)
    }

    /// Active actions in scheduling order.
    pub fn list_actions(&self) -> Vec<OfflineAction> {
        self.inner.queue.list_all()
    }

    pub fn list_conflicts(&self) -> Vec<ConflictRecord> {
        self.inner.resolver.list()
    }

    pub fn history(&self) -> Vec<SyncHistoryEntry> {
        self.inner.coordinator.history()
    }

    pub fn sync_state(&self) -> SyncState {
        if !self.inner.monitor.current().is_online {
            return SyncState::Offline;
        }
        if self.inner.coordinator.is_draining() {
            return SyncState::Syncing;
        }

        let actions = self.inner.queue.list_all();
        if actions
            .iter()
            .any(|action| action.status == ActionStatus::Conflict || action.is_exhausted())
        {
            SyncState::NeedsAttention
        } else if actions.is_empty() {
            SyncState::Synced
        } else {
            SyncState::Pending
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Out-of-range intervals fall back to one day.
fn tick_after(interval_secs: u64) -> Instant {
    let now = Instant::now();
    now.checked_add(Duration::from_secs(interval_secs))
        .unwrap_or_else(|| now + Duration::from_secs(MAX_INTERVAL_SECS))
}

/// Background loop turning transitions and the periodic timer into drains
struct Scheduler {
    queue: Arc<ActionQueue>,
    coordinator: Arc<SyncCoordinator>,
    monitor: NetworkMonitor,
    settings_changed: Arc<Notify>,
    shutdown: CancellationToken,
}

impl Scheduler {
    async fn run(self, mut transitions: mpsc::UnboundedReceiver<NetworkStatus>) {
        let settings = self.coordinator.settings();
        if settings.auto_sync && self.monitor.current().is_online && self.queue.has_candidates() {
            self.coordinator.drain().await;
        }

        let mut next_tick = tick_after(settings.sync_interval_seconds);
        loop {
            let settings = self.coordinator.settings();
            let background = settings.background_sync;
            let deadline = next_tick;
            let periodic = async move {
                if background {
                    tokio::time::sleep_until(deadline).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.settings_changed.notified() => {
                    let settings = self.coordinator.settings();
                    next_tick = tick_after(settings.sync_interval_seconds);
                }
                Some(status) = transitions.recv() => {
                    if status.is_online && settings.auto_sync && self.queue.has_candidates() {
                        tracing::debug!(connection = ?status.connection_type, "Back online, draining");
                        self.coordinator.drain().await;
                    }
                }
                () = periodic => {
                    next_tick = tick_after(settings.sync_interval_seconds);
                    tracing::debug!("Periodic sync");
                    self.coordinator.drain().await;
                }
            }
        }
        tracing::debug!("Sync scheduler stopped");
    }
}
