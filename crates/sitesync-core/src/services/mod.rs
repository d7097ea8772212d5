//! Service layer shared by clients.

mod engine;

pub use engine::{QueueSubscription, SyncEngine};
