//! Drain orchestration: candidate selection, attempts, retries, conflict hand-off

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::remote::{RemoteApply, SubmitOptions, SubmitOutcome};
use crate::conflict::{ConflictResolver, Resolution};
use crate::error::{Error, Result};
use crate::models::{
    ActionId, ActionStatus, ConnectionType, HistoryOutcome, NetworkStatus, OfflineAction,
    SyncHistoryEntry, SyncSettings,
};
use crate::network::NetworkMonitor;
use crate::queue::{ActionQueue, StatusUpdate};
use crate::task::ScheduledTask;
use crate::util::unix_millis_now;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HISTORY_LIMIT: usize = 200;

/// Tunables fixed for the coordinator's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Bounded wait for one remote submission
    pub attempt_timeout: Duration,
    /// Entries kept in the sync history
    pub history_limit: usize,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Caller decision for an action parked in `Conflict`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictDecision {
    /// Drop the local change
    ServerWins,
    /// Resubmit the local change with the force flag
    ClientWins,
    /// Requeue a merged payload
    Merge,
}

/// Counters for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub synced: usize,
    pub conflicts: usize,
    pub failed: usize,
    /// Returned to `Pending` (merged payload or interrupted attempt)
    pub requeued: usize,
    /// Dropped in favour of the server state
    pub dropped: usize,
    /// Stopped early by an offline transition or cancellation
    pub aborted: bool,
}

impl DrainReport {
    fn absorb(&mut self, other: Self) {
        self.attempted += other.attempted;
        self.synced += other.synced;
        self.conflicts += other.conflicts;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.dropped += other.dropped;
        self.aborted |= other.aborted;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    WifiOnly,
    NothingToSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another pass was running; this trigger was folded into it
    Coalesced,
    Skipped(SkipReason),
}

enum Flow {
    Continue,
    Abort,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Puts an action claimed for an attempt back to `Pending` when the attempt
/// future is dropped before it records an outcome.
struct InFlight<'a> {
    queue: &'a ActionQueue,
    id: ActionId,
    armed: bool,
}

impl InFlight<'_> {
    fn settle(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.queue.update_status(
            &self.id,
            ActionStatus::Syncing,
            StatusUpdate::to(ActionStatus::Pending),
        ) {
            Ok(_) => tracing::info!(action = %self.id, "Attempt dropped, action requeued"),
            Err(error) => {
                tracing::error!(action = %self.id, %error, "Failed to requeue dropped attempt");
            }
        }
    }
}

/// Drives queued actions to the remote.
///
/// At most one drain pass runs at a time. Triggers arriving mid-pass are
/// coalesced into one follow-up pass.
pub struct SyncCoordinator {
    queue: Arc<ActionQueue>,
    resolver: Arc<ConflictResolver>,
    remote: Arc<dyn RemoteApply>,
    monitor: NetworkMonitor,
    settings: RwLock<SyncSettings>,
    draining: AtomicBool,
    rerun: AtomicBool,
    cancel: Mutex<CancellationToken>,
    retry_timers: Mutex<HashMap<ActionId, ScheduledTask>>,
    history: Mutex<VecDeque<SyncHistoryEntry>>,
    options: CoordinatorOptions,
    this: Weak<Self>,
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<ActionQueue>,
        resolver: Arc<ConflictResolver>,
        remote: Arc<dyn RemoteApply>,
        monitor: NetworkMonitor,
        settings: SyncSettings,
        options: CoordinatorOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            queue,
            resolver,
            remote,
            monitor,
            settings: RwLock::new(settings),
            draining: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
            retry_timers: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            options,
            this: this.clone(),
        })
    }

    pub fn settings(&self) -> SyncSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the settings used from the next scheduling decision on.
    pub fn set_settings(&self, settings: SyncSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Run a drain pass, or fold into the one already running.
    pub async fn drain(&self) -> DrainOutcome {
        if !self.claim() {
            tracing::debug!("Drain already running, trigger coalesced");
            return DrainOutcome::Coalesced;
        }
        let mut outcome = self.drain_claimed().await;

        // A trigger can land after the last rerun check but before the claim
        // is released; pick it up here.
        while self.rerun.load(Ordering::SeqCst)
            && !matches!(&outcome, DrainOutcome::Completed(report) if report.aborted)
            && self.try_claim()
        {
            outcome = match (outcome, self.drain_claimed().await) {
                (DrainOutcome::Completed(mut report), DrainOutcome::Completed(next)) => {
                    report.absorb(next);
                    DrainOutcome::Completed(report)
                }
                (DrainOutcome::Completed(report), _) => DrainOutcome::Completed(report),
                (_, next) => next,
            };
        }
        outcome
    }

    /// Take the drain claim, or leave a rerun request that the holder is
    /// guaranteed to see after it releases. Returns whether the claim was taken.
    fn claim(&self) -> bool {
        loop {
            if self.try_claim() {
                return true;
            }
            self.rerun.store(true, Ordering::SeqCst);
            if self.draining.load(Ordering::SeqCst) {
                return false;
            }
        }
    }

    fn try_claim(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    // Caller holds the `draining` claim; it is released on return or drop.
    async fn drain_claimed(&self) -> DrainOutcome {
        let _guard = DrainGuard(&self.draining);
        self.rerun.store(false, Ordering::SeqCst);

        let mut report = match self.drain_pass().await {
            DrainOutcome::Completed(report) => report,
            other => return other,
        };
        while !report.aborted && self.rerun.swap(false, Ordering::SeqCst) {
            match self.drain_pass().await {
                DrainOutcome::Completed(next) => report.absorb(next),
                DrainOutcome::Coalesced | DrainOutcome::Skipped(_) => break,
            }
        }
        DrainOutcome::Completed(report)
    }

    async fn drain_pass(&self) -> DrainOutcome {
        let settings = self.settings();
        let network = self.monitor.current();

        if !network.is_online {
            tracing::debug!("Drain skipped: offline");
            return DrainOutcome::Skipped(SkipReason::Offline);
        }
        if settings.wifi_only && network.connection_type != ConnectionType::Wifi {
            tracing::debug!(connection = ?network.connection_type, "Drain skipped: wifi only");
            return DrainOutcome::Skipped(SkipReason::WifiOnly);
        }

        let candidates = self.collect_candidates();
        if candidates.is_empty() {
            return DrainOutcome::Skipped(SkipReason::NothingToSync);
        }

        let cancel = self.cancel_token();
        let mut network_rx = self.monitor.watch();
        let mut report = DrainReport::default();
        tracing::info!(candidates = candidates.len(), "Drain pass started");

        for id in candidates {
            if cancel.is_cancelled() || !network_rx.borrow_and_update().is_online {
                report.aborted = true;
                break;
            }
            if let Flow::Abort = self
                .attempt(&id, &settings, &cancel, &mut network_rx, &mut report)
                .await
            {
                report.aborted = true;
                break;
            }
        }

        tracing::info!(
            attempted = report.attempted,
            synced = report.synced,
            conflicts = report.conflicts,
            failed = report.failed,
            requeued = report.requeued,
            dropped = report.dropped,
            aborted = report.aborted,
            "Drain pass finished"
        );
        DrainOutcome::Completed(report)
    }

    /// Pending actions plus retryable failures that are due, promoted to
    /// `Pending`, in scheduling order.
    fn collect_candidates(&self) -> Vec<ActionId> {
        let now = unix_millis_now();
        let mut ids = Vec::new();

        for action in self.queue.list_pending(None) {
            match action.status {
                ActionStatus::Pending => ids.push(action.id),
                ActionStatus::Failed if action.next_attempt_at.is_none_or(|at| at <= now) => {
                    match self.queue.update_status(
                        &action.id,
                        ActionStatus::Failed,
                        StatusUpdate::to(ActionStatus::Pending).next_attempt_at(None),
                    ) {
                        Ok(_) => {
                            self.timers().remove(&action.id);
                            ids.push(action.id);
                        }
                        Err(error) => {
                            tracing::debug!(action = %action.id, %error, "Due retry changed concurrently");
                        }
                    }
                }
                _ => {}
            }
        }
        ids
    }

    async fn attempt(
        &self,
        id: &ActionId,
        settings: &SyncSettings,
        cancel: &CancellationToken,
        network_rx: &mut watch::Receiver<NetworkStatus>,
        report: &mut DrainReport,
    ) -> Flow {
        let action = match self.queue.update_status(
            id,
            ActionStatus::Pending,
            StatusUpdate::to(ActionStatus::Syncing),
        ) {
            Ok(action) => action,
            Err(error) => {
                tracing::debug!(action = %id, %error, "Candidate changed before its attempt");
                return Flow::Continue;
            }
        };
        report.attempted += 1;
        let mut in_flight = InFlight {
            queue: self.queue.as_ref(),
            id: action.id,
            armed: true,
        };

        let mut forced = action.force;
        loop {
            let options = SubmitOptions {
                force: forced,
                compression: settings.compression_enabled,
            };
            let submitted = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                went_offline = async { network_rx.wait_for(|status| !status.is_online).await.is_ok() } => {
                    if went_offline {
                        None
                    } else {
                        Some(Err(Error::Network("network monitor closed".to_string())))
                    }
                }
                result = tokio::time::timeout(self.options.attempt_timeout, self.remote.submit(&action, options)) => {
                    Some(result.unwrap_or_else(|_| Err(Error::Network(format!(
                        "timed out after {}s",
                        self.options.attempt_timeout.as_secs()
                    )))))
                }
            };

            let Some(result) = submitted else {
                in_flight.settle();
                self.requeue_interrupted(&action, report);
                return Flow::Abort;
            };

            let outcome = match result {
                Ok(SubmitOutcome::Rejected { reason }) => Err(format!("rejected: {reason}")),
                Ok(outcome) => Ok(outcome),
                Err(error) => Err(error.to_string()),
            };

            match outcome {
                Err(message) => {
                    report.failed += 1;
                    self.record_failure(&action, settings, message);
                }
                Ok(SubmitOutcome::Accepted { new_version }) => {
                    let outcome = if forced {
                        HistoryOutcome::ClientWinsForced
                    } else {
                        HistoryOutcome::Synced
                    };
                    let note = new_version.map(|version| format!("server version {version}"));
                    if self.complete(&action, ActionStatus::Syncing, outcome, note) {
                        report.synced += 1;
                    }
                }
                Ok(SubmitOutcome::Conflict {
                    server_version,
                    server_state,
                }) => {
                    let resolution = self.resolver.decide(
                        settings.conflict_resolution,
                        &action,
                        server_version,
                        &server_state,
                        forced,
                    );
                    if matches!(resolution, Resolution::ForceResubmit) {
                        tracing::info!(action = %action.id, "Conflict auto-resolved as client wins, forcing resubmission");
                        forced = true;
                        continue;
                    }
                    self.apply_resolution(&action, resolution, report);
                }
                Ok(SubmitOutcome::Rejected { .. }) => {}
            }
            in_flight.settle();
            return Flow::Continue;
        }
    }

    fn apply_resolution(&self, action: &OfflineAction, resolution: Resolution, report: &mut DrainReport) {
        match resolution {
            Resolution::ServerWins => {
                tracing::info!(action = %action.id, "Conflict auto-resolved as server wins, local change dropped");
                if self.complete(
                    action,
                    ActionStatus::Syncing,
                    HistoryOutcome::ServerWins,
                    Some("server state kept".to_string()),
                ) {
                    report.dropped += 1;
                }
            }
            Resolution::Merged(payload) => {
                match self.queue.update_status(
                    &action.id,
                    ActionStatus::Syncing,
                    StatusUpdate::to(ActionStatus::Pending)
                        .payload(payload)
                        .clear_error()
                        .force(false),
                ) {
                    Ok(_) => {
                        tracing::info!(action = %action.id, "Conflict merged, action requeued");
                        report.requeued += 1;
                    }
                    Err(error) => {
                        tracing::error!(action = %action.id, %error, "Failed to requeue merged action");
                    }
                }
            }
            Resolution::Park(record) => {
                let message = record.server_version.as_ref().map_or_else(
                    || "version conflict".to_string(),
                    |version| format!("version conflict with server {version}"),
                );
                let parked = self
                    .queue
                    .update_status(
                        &action.id,
                        ActionStatus::Syncing,
                        StatusUpdate::to(ActionStatus::Conflict)
                            .error(message)
                            .force(false),
                    )
                    .and_then(|_| self.resolver.park(record));
                match parked {
                    Ok(()) => {
                        tracing::warn!(action = %action.id, "Action needs conflict resolution");
                        report.conflicts += 1;
                    }
                    Err(error) => {
                        tracing::error!(action = %action.id, %error, "Failed to park conflicting action");
                    }
                }
            }
            Resolution::ForceResubmit => {}
        }
    }

    fn record_failure(&self, action: &OfflineAction, settings: &SyncSettings, message: String) {
        let retry_count = action.retry_count.saturating_add(1).min(action.max_retries);
        let exhausted = retry_count >= action.max_retries;
        let delay_secs = settings.retry_delay_secs(retry_count);
        let delay_ms = i64::try_from(delay_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let next_attempt_at = (!exhausted).then(|| unix_millis_now().saturating_add(delay_ms));

        let update = StatusUpdate::to(ActionStatus::Failed)
            .retry_count(retry_count)
            .error(message.clone())
            .next_attempt_at(next_attempt_at);
        if let Err(error) = self
            .queue
            .update_status(&action.id, ActionStatus::Syncing, update)
        {
            tracing::error!(action = %action.id, %error, "Failed to record attempt failure");
            return;
        }

        if exhausted {
            tracing::warn!(
                action = %action.id,
                retry_count,
                error = %message,
                "Action exhausted its retries"
            );
        } else {
            tracing::info!(
                action = %action.id,
                retry_count,
                delay_secs,
                error = %message,
                "Attempt failed, retry scheduled"
            );
            self.schedule_retry(action.id, Duration::from_secs(delay_secs));
        }
    }

    fn requeue_interrupted(&self, action: &OfflineAction, report: &mut DrainReport) {
        match self.queue.update_status(
            &action.id,
            ActionStatus::Syncing,
            StatusUpdate::to(ActionStatus::Pending),
        ) {
            Ok(_) => {
                tracing::info!(action = %action.id, "Attempt interrupted, action requeued");
                report.requeued += 1;
            }
            Err(error) => {
                tracing::error!(action = %action.id, %error, "Failed to requeue interrupted action");
            }
        }
    }

    /// Move an action to `Synced` and record it. Returns whether it happened.
    fn complete(
        &self,
        action: &OfflineAction,
        expected: ActionStatus,
        outcome: HistoryOutcome,
        note: Option<String>,
    ) -> bool {
        match self
            .queue
            .update_status(&action.id, expected, StatusUpdate::to(ActionStatus::Synced))
        {
            Ok(_) => {
                self.record_history(SyncHistoryEntry::from_action(action, outcome, note));
                true
            }
            Err(error) => {
                tracing::error!(action = %action.id, %error, "Failed to complete action");
                false
            }
        }
    }

    fn schedule_retry(&self, id: ActionId, delay: Duration) {
        let this = self.this.clone();
        let task = ScheduledTask::after(delay, async move {
            if let Some(coordinator) = this.upgrade() {
                coordinator.retry_due(id);
            }
        });
        self.timers().insert(id, task);
    }

    // Runs inside the timer task: must not await after dropping its handle.
    fn retry_due(&self, id: ActionId) {
        self.timers().remove(&id);
        let promoted = self.queue.update_status(
            &id,
            ActionStatus::Failed,
            StatusUpdate::to(ActionStatus::Pending).next_attempt_at(None),
        );
        match promoted {
            Ok(_) => {
                tracing::debug!(action = %id, "Retry due");
                if let Some(coordinator) = self.this.upgrade() {
                    tokio::spawn(async move {
                        coordinator.drain().await;
                    });
                }
            }
            Err(error) => {
                tracing::debug!(action = %id, %error, "Retry timer found action already handled");
            }
        }
    }

    /// Re-arm retry timers for retryable failures loaded from storage.
    pub fn restore_retry_timers(&self) {
        let now = unix_millis_now();
        let settings = self.settings();
        for action in self.queue.list_by_status(ActionStatus::Failed) {
            if !action.is_retryable() {
                continue;
            }
            let delay = action.next_attempt_at.map_or_else(
                || Duration::from_secs(settings.retry_delay_secs(action.retry_count)),
                |at| Duration::from_millis(u64::try_from(at - now).unwrap_or(0)),
            );
            self.schedule_retry(action.id, delay);
        }
    }

    pub fn pending_retry_count(&self) -> usize {
        self.timers().values().filter(|task| !task.is_finished()).count()
    }

    /// Manually re-attempt a failed action.
    ///
    /// Exhausted actions get one more attempt; their retry count is kept.
    pub fn retry_action(&self, id: &ActionId) -> Result<OfflineAction> {
        let action = self
            .queue
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        match action.status {
            ActionStatus::Pending => Ok(action),
            ActionStatus::Failed => {
                let updated = self.queue.update_status(
                    id,
                    ActionStatus::Failed,
                    StatusUpdate::to(ActionStatus::Pending).next_attempt_at(None),
                )?;
                self.timers().remove(id);
                tracing::info!(action = %id, retry_count = updated.retry_count, "Action retry requested");
                Ok(updated)
            }
            ActionStatus::Syncing => Err(Error::InvalidState(format!(
                "action {id} is syncing and cannot be retried"
            ))),
            ActionStatus::Conflict => Err(Error::InvalidState(format!(
                "action {id} is in conflict; resolve it instead"
            ))),
            ActionStatus::Synced => Err(Error::InvalidState(format!("action {id} already synced"))),
        }
    }

    /// Discard an action that is not syncing.
    pub fn remove_action(&self, id: &ActionId) -> Result<OfflineAction> {
        let removed = self.queue.remove(id)?;
        self.timers().remove(id);
        self.resolver.clear(id)?;
        self.record_history(SyncHistoryEntry::from_action(
            &removed,
            HistoryOutcome::Discarded,
            removed.last_error.clone(),
        ));
        Ok(removed)
    }

    /// Unblock an action parked in `Conflict`.
    ///
    /// `Merge` uses `merged` when given, otherwise the configured merge
    /// function over the recorded server state.
    pub fn resolve_conflict(
        &self,
        id: &ActionId,
        decision: ConflictDecision,
        merged: Option<Value>,
    ) -> Result<Option<OfflineAction>> {
        let action = self
            .queue
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if action.status != ActionStatus::Conflict {
            return Err(Error::InvalidState(format!(
                "action {id} is {}, not in conflict",
                action.status
            )));
        }

        let resolved = match decision {
            ConflictDecision::ServerWins => {
                self.queue.update_status(
                    id,
                    ActionStatus::Conflict,
                    StatusUpdate::to(ActionStatus::Synced),
                )?;
                tracing::info!(action = %id, "Conflict resolved as server wins");
                self.record_history(SyncHistoryEntry::from_action(
                    &action,
                    HistoryOutcome::ServerWins,
                    Some("resolved by caller".to_string()),
                ));
                None
            }
            ConflictDecision::ClientWins => {
                let updated = self.queue.update_status(
                    id,
                    ActionStatus::Conflict,
                    StatusUpdate::to(ActionStatus::Pending)
                        .clear_error()
                        .force(true),
                )?;
                tracing::info!(action = %id, "Conflict resolved as client wins");
                Some(updated)
            }
            ConflictDecision::Merge => {
                let payload = match merged {
                    Some(payload) => payload,
                    None => {
                        let record = self.resolver.get(id).ok_or_else(|| {
                            Error::NotFound(format!("conflict record for action {id}"))
                        })?;
                        self.resolver.merge(&record.server_state, &action.payload)?
                    }
                };
                if payload.is_null() {
                    return Err(Error::Validation(
                        "merged payload must not be empty".to_string(),
                    ));
                }
                let updated = self.queue.update_status(
                    id,
                    ActionStatus::Conflict,
                    StatusUpdate::to(ActionStatus::Pending)
                        .payload(payload)
                        .clear_error()
                        .force(false),
                )?;
                tracing::info!(action = %id, "Conflict resolved with merged payload");
                Some(updated)
            }
        };

        self.resolver.clear(id)?;
        Ok(resolved)
    }

    /// Abort the running pass and every retry timer.
    ///
    /// Interrupted attempts return to `Pending`; failed actions keep their
    /// `next_attempt_at` and are picked up by the next pass once due.
    pub fn cancel_all(&self) {
        let token = std::mem::replace(&mut *self.cancel_slot(), CancellationToken::new());
        token.cancel();
        let cancelled = {
            let mut timers = self.timers();
            let count = timers.len();
            timers.clear();
            count
        };
        tracing::info!(retry_timers = cancelled, "Cancelled sync work");
    }

    /// Actions that left the active log, oldest first.
    pub fn history(&self) -> Vec<SyncHistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    fn record_history(&self, entry: SyncHistoryEntry) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(entry);
        while history.len() > self.options.history_limit {
            history.pop_front();
        }
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel_slot().clone()
    }

    fn cancel_slot(&self) -> MutexGuard<'_, CancellationToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<ActionId, ScheduledTask>> {
        self.retry_timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
