//! Sync settings model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::conflict::ConflictPolicy;

/// Upper bound on the configurable retry budget
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Cap applied to exponential retry delays
pub const MAX_BACKOFF_SECS: u64 = 3600;

/// Longest accepted sync or retry interval, one day
pub const MAX_INTERVAL_SECS: u64 = 86_400;

/// Delay growth between consecutive retries of the same action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Always wait `retry_interval_seconds`
    #[default]
    Fixed,
    /// Double the wait per failed attempt, capped at one hour
    Exponential,
}

/// Process-wide sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Drain automatically when connectivity returns
    pub auto_sync: bool,
    /// Period of the background drain timer
    pub sync_interval_seconds: u64,
    /// Only drain over Wi-Fi
    pub wifi_only: bool,
    /// Enable the periodic background drain
    pub background_sync: bool,
    /// Automatic conflict policy
    pub conflict_resolution: ConflictPolicy,
    /// Default retry budget for newly queued actions
    pub max_retries: u32,
    /// Base delay before a failed action is retried
    pub retry_interval_seconds: u64,
    /// Ask the remote transport to compress submissions
    pub compression_enabled: bool,
    /// Retry delay growth
    pub backoff: BackoffStrategy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval_seconds: 300,
            wifi_only: false,
            background_sync: true,
            conflict_resolution: ConflictPolicy::Manual,
            max_retries: 3,
            retry_interval_seconds: 30,
            compression_enabled: true,
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl SyncSettings {
    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("sync_interval_seconds", self.sync_interval_seconds),
            ("retry_interval_seconds", self.retry_interval_seconds),
        ] {
            if value < 1 {
                return Err(Error::Validation(format!("{name} must be at least 1")));
            }
            if value > MAX_INTERVAL_SECS {
                return Err(Error::Validation(format!(
                    "{name} must be at most {MAX_INTERVAL_SECS}"
                )));
            }
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::Validation(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        Ok(())
    }

    /// Apply a partial update, returning the validated result.
    ///
    /// `self` is left untouched when validation fails.
    pub fn apply(&self, patch: &SettingsPatch) -> Result<Self> {
        let mut next = self.clone();
        if let Some(value) = patch.auto_sync {
            next.auto_sync = value;
        }
        if let Some(value) = patch.sync_interval_seconds {
            next.sync_interval_seconds = value;
        }
        if let Some(value) = patch.wifi_only {
            next.wifi_only = value;
        }
        if let Some(value) = patch.background_sync {
            next.background_sync = value;
        }
        if let Some(value) = patch.conflict_resolution {
            next.conflict_resolution = value;
        }
        if let Some(value) = patch.max_retries {
            next.max_retries = value;
        }
        if let Some(value) = patch.retry_interval_seconds {
            next.retry_interval_seconds = value;
        }
        if let Some(value) = patch.compression_enabled {
            next.compression_enabled = value;
        }
        if let Some(value) = patch.backoff {
            next.backoff = value;
        }
        next.validate()?;
        Ok(next)
    }

    /// Delay before the retry following the `retry_count`-th failure.
    pub fn retry_delay_secs(&self, retry_count: u32) -> u64 {
        match self.backoff {
            BackoffStrategy::Fixed => self.retry_interval_seconds,
            BackoffStrategy::Exponential => {
                let exponent = retry_count.saturating_sub(1).min(31);
                self.retry_interval_seconds
                    .saturating_mul(1_u64 << exponent)
                    .min(MAX_BACKOFF_SECS)
            }
        }
    }
}

/// Partial settings update; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub auto_sync: Option<bool>,
    pub sync_interval_seconds: Option<u64>,
    pub wifi_only: Option<bool>,
    pub background_sync: Option<bool>,
    pub conflict_resolution: Option<ConflictPolicy>,
    pub max_retries: Option<u32>,
    pub retry_interval_seconds: Option<u64>,
    pub compression_enabled: Option<bool>,
    pub backoff: Option<BackoffStrategy>,
}

impl SettingsPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}
