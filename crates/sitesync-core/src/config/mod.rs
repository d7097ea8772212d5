//! Engine configuration.
//!
//! Process-level knobs fixed at startup. User-facing sync preferences live in
//! [`SyncSettings`](crate::models::SyncSettings) and are persisted instead.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::quota::DEFAULT_EVICTION_THRESHOLD;
use crate::sync::{DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_HISTORY_LIMIT};
use crate::util::{normalize_text_option, require_http_url};

const ENV_DB_PATH: &str = "SITESYNC_DB_PATH";
const ENV_REMOTE_URL: &str = "SITESYNC_REMOTE_URL";
const ENV_PROBE_URL: &str = "SITESYNC_PROBE_URL";
const ENV_STORAGE_CAPACITY: &str = "SITESYNC_STORAGE_CAPACITY_BYTES";
const ENV_EVICTION_THRESHOLD: &str = "SITESYNC_EVICTION_THRESHOLD";
const ENV_MAX_PAYLOAD: &str = "SITESYNC_MAX_PAYLOAD_BYTES";
const ENV_ATTEMPT_TIMEOUT: &str = "SITESYNC_ATTEMPT_TIMEOUT_SECS";
const ENV_DEBOUNCE: &str = "SITESYNC_DEBOUNCE_MS";
const ENV_PROBE_INTERVAL: &str = "SITESYNC_PROBE_INTERVAL_SECS";
const ENV_HISTORY_LIMIT: &str = "SITESYNC_HISTORY_LIMIT";

pub const DEFAULT_STORAGE_CAPACITY_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// SQLite file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    /// Base URL of the remote apply endpoint
    pub remote_url: Option<String>,
    /// Health URL polled for connectivity
    pub probe_url: Option<String>,
    pub storage_capacity_bytes: u64,
    pub eviction_threshold: f64,
    pub max_payload_bytes: u64,
    pub attempt_timeout: Duration,
    pub network_debounce: Duration,
    pub probe_interval: Duration,
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            remote_url: None,
            probe_url: None,
            storage_capacity_bytes: DEFAULT_STORAGE_CAPACITY_BYTES,
            eviction_threshold: DEFAULT_EVICTION_THRESHOLD,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            network_debounce: crate::network::DEFAULT_DEBOUNCE,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Load overrides from `SITESYNC_*` environment variables.
    ///
    /// Unset variables keep their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self> {
        parse_config(|key| env::var(key).ok())
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<EngineConfig> {
    let defaults = EngineConfig::default();
    let text = |key: &str| normalize_text_option(lookup(key));

    let remote_url = text(ENV_REMOTE_URL)
        .map(|url| require_http_url(url, ENV_REMOTE_URL))
        .transpose()?;
    let probe_url = text(ENV_PROBE_URL)
        .map(|url| require_http_url(url, ENV_PROBE_URL))
        .transpose()?;

    let eviction_threshold =
        parse_number(text(ENV_EVICTION_THRESHOLD), ENV_EVICTION_THRESHOLD)?
            .unwrap_or(defaults.eviction_threshold);
    if !(eviction_threshold > 0.0 && eviction_threshold <= 1.0) {
        return Err(Error::Validation(format!(
            "{ENV_EVICTION_THRESHOLD} must be within (0, 1]"
        )));
    }

    Ok(EngineConfig {
        database_path: text(ENV_DB_PATH).map(PathBuf::from),
        remote_url,
        probe_url,
        storage_capacity_bytes: parse_number(text(ENV_STORAGE_CAPACITY), ENV_STORAGE_CAPACITY)?
            .unwrap_or(defaults.storage_capacity_bytes),
        eviction_threshold,
        max_payload_bytes: parse_number(text(ENV_MAX_PAYLOAD), ENV_MAX_PAYLOAD)?
            .unwrap_or(defaults.max_payload_bytes),
        attempt_timeout: parse_number(text(ENV_ATTEMPT_TIMEOUT), ENV_ATTEMPT_TIMEOUT)?
            .map_or(defaults.attempt_timeout, Duration::from_secs),
        network_debounce: parse_number(text(ENV_DEBOUNCE), ENV_DEBOUNCE)?
            .map_or(defaults.network_debounce, Duration::from_millis),
        probe_interval: parse_number(text(ENV_PROBE_INTERVAL), ENV_PROBE_INTERVAL)?
            .map_or(defaults.probe_interval, Duration::from_secs),
        history_limit: parse_number(text(ENV_HISTORY_LIMIT), ENV_HISTORY_LIMIT)?
            .unwrap_or(defaults.history_limit),
    })
}

fn parse_number<T: FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| Error::Validation(format!("{key} is not a valid number: {raw}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse_from_map(map: &HashMap<&str, &str>) -> Result<EngineConfig> {
        parse_config(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = parse_from_map(&HashMap::new()).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let mut map = HashMap::new();
        map.insert(ENV_DB_PATH, "/tmp/sitesync.db");
        map.insert(ENV_REMOTE_URL, "https://sync.example.com/");
        map.insert(ENV_STORAGE_CAPACITY, "52428800");
        map.insert(ENV_EVICTION_THRESHOLD, "0.75");
        map.insert(ENV_ATTEMPT_TIMEOUT, "12");
        map.insert(ENV_DEBOUNCE, "250");
        map.insert(ENV_HISTORY_LIMIT, "10");

        let config = parse_from_map(&map).unwrap();
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/sitesync.db")));
        assert_eq!(config.remote_url.as_deref(), Some("https://sync.example.com"));
        assert_eq!(config.storage_capacity_bytes, 50 * 1024 * 1024);
        assert!((config.eviction_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.attempt_timeout, Duration::from_secs(12));
        assert_eq!(config.network_debounce, Duration::from_millis(250));
        assert_eq!(config.history_limit, 10);
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut map = HashMap::new();
        map.insert(ENV_REMOTE_URL, "   ");
        map.insert(ENV_HISTORY_LIMIT, "");
        let config = parse_from_map(&map).unwrap();
        assert_eq!(config.remote_url, None);
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let mut map = HashMap::new();
        map.insert(ENV_MAX_PAYLOAD, "lots");
        let err = parse_from_map(&map).unwrap_err();
        assert!(err.to_string().contains(ENV_MAX_PAYLOAD));

        let mut map = HashMap::new();
        map.insert(ENV_PROBE_URL, "example.com/health");
        assert!(parse_from_map(&map).is_err());

        let mut map = HashMap::new();
        map.insert(ENV_EVICTION_THRESHOLD, "1.5");
        assert!(parse_from_map(&map).is_err());
    }
}
