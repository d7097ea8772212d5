//! Synchronization of queued actions with the remote

mod coordinator;
mod remote;


pub use coordinator::{
    ConflictDecision, CoordinatorOptions, DrainOutcome, DrainReport, SkipReason, SyncCoordinator,
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_HISTORY_LIMIT,
};
pub use remote::{HttpRemote, RemoteApply, SubmitOptions, SubmitOutcome};
