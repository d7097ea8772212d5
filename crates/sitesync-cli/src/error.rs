use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] sitesync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No payload provided; pass --payload or pipe JSON on stdin")]
    EmptyPayload,
    #[error("Payload is not valid JSON: {0}")]
    InvalidPayload(String),
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("No {0} found for id/prefix: {1}")]
    NotFound(&'static str, String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("No settings given; see `sitesync settings set --help`")]
    EmptySettingsPatch,
    #[error("Could not resolve a data directory; pass --db-path or set SITESYNC_DB_PATH")]
    NoDataDir,
    #[error("Sync is not configured. Set SITESYNC_REMOTE_URL to enable `sitesync drain`.")]
    SyncNotConfigured,
}
