//! Connectivity observation and debounced transition notifications

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::models::NetworkStatus;

/// Default minimum interval between two subscriber notifications
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

type Callback = Arc<dyn Fn(&NetworkStatus) + Send + Sync>;

/// Handle returned by [`NetworkMonitor::on_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Dispatch {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback)>,
    last_notified: Option<NetworkStatus>,
    last_notified_at: Option<Instant>,
    trailing: Option<JoinHandle<()>>,
}

struct MonitorInner {
    status_tx: watch::Sender<NetworkStatus>,
    dispatch: Mutex<Dispatch>,
    debounce: Duration,
}

/// Observes platform connectivity and notifies subscribers on transitions.
///
/// A transition is a change of `is_online` or `connection_type`. Quality-only
/// changes update [`current`](Self::current) without notifying.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    pub fn new(initial: NetworkStatus) -> Self {
        Self::with_debounce(initial, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(initial: NetworkStatus, debounce: Duration) -> Self {
        let initial = initial.normalized();
        let (status_tx, _) = watch::channel(initial);
        Self {
            inner: Arc::new(MonitorInner {
                status_tx,
                dispatch: Mutex::new(Dispatch {
                    last_notified: Some(initial),
                    ..Dispatch::default()
                }),
                debounce,
            }),
        }
    }

    /// Current connectivity snapshot.
    pub fn current(&self) -> NetworkStatus {
        *self.inner.status_tx.borrow()
    }

    /// Undebounced status stream; every report is visible.
    pub fn watch(&self) -> watch::Receiver<NetworkStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Register a transition callback.
    pub fn on_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        let mut dispatch = self.dispatch();
        dispatch.next_id += 1;
        let id = SubscriptionId(dispatch.next_id);
        dispatch.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut dispatch = self.dispatch();
        let before = dispatch.subscribers.len();
        dispatch.subscribers.retain(|(existing, _)| *existing != id);
        dispatch.subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.dispatch().subscribers.len()
    }

    /// Drop every callback and any pending trailing notification.
    pub fn shutdown(&self) {
        let mut dispatch = self.dispatch();
        dispatch.subscribers.clear();
        if let Some(trailing) = dispatch.trailing.take() {
            trailing.abort();
        }
    }

    /// Feed a platform observation.
    pub fn report(&self, status: NetworkStatus) {
        let status = status.normalized();
        let previous = self.inner.status_tx.send_replace(status);
        if !previous.is_transition_to(&status) {
            return;
        }

        tracing::info!(
            online = status.is_online,
            connection = ?status.connection_type,
            effective = ?status.effective_type,
            "Network transition"
        );
        self.schedule_notify();
    }

    fn schedule_notify(&self) {
        let now = Instant::now();
        let mut dispatch = self.dispatch();

        let ready = dispatch
            .last_notified_at
            .is_none_or(|at| now.duration_since(at) >= self.inner.debounce);

        if ready {
            drop(dispatch);
            self.notify_now();
            return;
        }

        if dispatch.trailing.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let wait = dispatch
            .last_notified_at
            .map_or(Duration::ZERO, |at| {
                self.inner.debounce.saturating_sub(now.duration_since(at))
            });
        let monitor = self.clone();
        dispatch.trailing = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            monitor.notify_now();
        }));
    }

    fn notify_now(&self) {
        let status = self.current();
        let callbacks = {
            let mut dispatch = self.dispatch();
            if let Some(last) = dispatch.last_notified {
                if !last.is_transition_to(&status) && dispatch.last_notified_at.is_some() {
                    return;
                }
            }
            dispatch.last_notified = Some(status);
            dispatch.last_notified_at = Some(Instant::now());
            dispatch
                .subscribers
                .iter()
                .map(|(_, callback)| Arc::clone(callback))
                .collect::<Vec<_>>()
        };

        for callback in callbacks {
            callback(&status);
        }
    }

    fn dispatch(&self) -> MutexGuard<'_, Dispatch> {
        self.inner
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(NetworkStatus::offline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionType, EffectiveType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_monitor() -> (NetworkMonitor, Arc<Mutex<Vec<NetworkStatus>>>) {
        let monitor = NetworkMonitor::new(NetworkStatus::offline());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        monitor.on_change(move |status| sink.lock().unwrap().push(*status));
        (monitor, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn notifies_on_transition() {
        let (monitor, seen) = counting_monitor();
        monitor.report(NetworkStatus::online(ConnectionType::Wifi));

        assert!(monitor.current().is_online);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].connection_type, ConnectionType::Wifi);
    }

    #[tokio::test(start_paused = true)]
    async fn quality_change_is_not_a_transition() {
        let (monitor, seen) = counting_monitor();
        let wifi = NetworkStatus::online(ConnectionType::Wifi);
        monitor.report(wifi);
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.report(wifi.with_quality(EffectiveType::Slow2G, Some(0.01), Some(3000)));

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(!monitor.current().is_reliable);
    }

    #[tokio::test(start_paused = true)]
    async fn flapping_is_debounced_to_trailing_state() {
        let (monitor, seen) = counting_monitor();
        monitor.report(NetworkStatus::online(ConnectionType::Wifi));
        monitor.report(NetworkStatus::offline());
        monitor.report(NetworkStatus::online(ConnectionType::Cellular));

        assert_eq!(seen.lock().unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].connection_type, ConnectionType::Cellular);
    }

    #[tokio::test(start_paused = true)]
    async fn flap_back_to_notified_state_is_suppressed() {
        let (monitor, seen) = counting_monitor();
        monitor.report(NetworkStatus::online(ConnectionType::Wifi));
        monitor.report(NetworkStatus::offline());
        monitor.report(NetworkStatus::online(ConnectionType::Wifi));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_and_shutdown_stop_callbacks() {
        let monitor = NetworkMonitor::new(NetworkStatus::offline());
        let hits = Arc::new(AtomicUsize::new(0));
        let first = {
            let hits = Arc::clone(&hits);
            monitor.on_change(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let hits_clone = Arc::clone(&hits);
        monitor.on_change(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert!(monitor.unsubscribe(first));
        assert!(!monitor.unsubscribe(first));
        monitor.report(NetworkStatus::online(ConnectionType::Ethernet));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        monitor.shutdown();
        assert_eq!(monitor.subscriber_count(), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.report(NetworkStatus::offline());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn watch_sees_every_report() {
        let monitor = NetworkMonitor::new(NetworkStatus::offline());
        let mut rx = monitor.watch();
        monitor.report(NetworkStatus::online(ConnectionType::Wifi));
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_online);
    }
}
