//! Network connectivity monitoring

mod monitor;
mod probe;

pub use monitor::{NetworkMonitor, SubscriptionId, DEFAULT_DEBOUNCE};
pub use probe::{classify_effective_type, spawn_polling, ConnectivityProbe, HttpProbe};
