//! sitesync-core - Offline action synchronization engine
//!
//! This crate contains the durable action queue, network monitoring, the sync
//! coordinator with retry and conflict handling, and local storage quota
//! management used by every sitesync client.

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod quota;
pub mod services;
pub mod state;
pub mod sync;
pub mod task;
pub mod util;

pub use config::EngineConfig;
pub use error::{Error, Result};
pub use models::{ActionId, ActionStatus, NewAction, OfflineAction};
pub use services::SyncEngine;
pub use state::SyncState;
