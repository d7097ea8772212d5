use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sitesync_core::models::{OfflineAction, StorageItem, StorageItemId};
use sitesync_core::network::{ConnectivityProbe, HttpProbe};
use sitesync_core::sync::{HttpRemote, RemoteApply, SubmitOptions, SubmitOutcome};
use sitesync_core::{ActionId, EngineConfig, SyncEngine};

use crate::cli::LinkArg;
use crate::error::CliError;

/// Settings shared by every command.
pub struct Context {
    pub config: EngineConfig,
    pub link: LinkArg,
}

impl Context {
    pub fn new(
        mut config: EngineConfig,
        cli_db_path: Option<PathBuf>,
        link: LinkArg,
    ) -> Result<Self, CliError> {
        config.database_path = Some(resolve_db_path(cli_db_path, config.database_path.take())?);
        Ok(Self { config, link })
    }

    pub const fn sync_enabled(&self) -> bool {
        self.config.remote_url.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct ActionListItem {
    pub id: String,
    pub kind: String,
    pub entity_type: String,
    pub entity_id: String,
    pub label: String,
    pub priority: String,
    pub status: String,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub enqueued_at: i64,
    pub relative_time: String,
}

pub fn resolve_db_path(
    cli_db_path: Option<PathBuf>,
    env_db_path: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    match cli_db_path.or(env_db_path) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("sitesync").join("sitesync.db"))
        .ok_or(CliError::NoDataDir)
}

/// Stand-in remote for commands that never submit.
struct DetachedRemote;

#[async_trait]
impl RemoteApply for DetachedRemote {
    async fn submit(
        &self,
        action: &OfflineAction,
        _options: SubmitOptions,
    ) -> sitesync_core::Result<SubmitOutcome> {
        Err(sitesync_core::Error::Network(format!(
            "no remote configured for action {}",
            action.id
        )))
    }
}

fn build_remote(config: &EngineConfig) -> Result<Arc<dyn RemoteApply>, CliError> {
    match &config.remote_url {
        Some(url) => Ok(Arc::new(HttpRemote::new(url.clone(), config.attempt_timeout)?)),
        None => Ok(Arc::new(DetachedRemote)),
    }
}

pub fn open_engine(ctx: &Context) -> Result<SyncEngine, CliError> {
    let remote = build_remote(&ctx.config)?;
    Ok(SyncEngine::open(&ctx.config, remote, ctx.link.status())?)
}

/// Open the engine for a command that talks to the remote.
///
/// Probes connectivity once when a probe URL is configured, otherwise trusts
/// `--link`.
pub async fn open_sync_engine(ctx: &Context) -> Result<SyncEngine, CliError> {
    if !ctx.sync_enabled() {
        return Err(CliError::SyncNotConfigured);
    }
    let engine = open_engine(ctx)?;
    if let Some(url) = &ctx.config.probe_url {
        let probe = HttpProbe::new(url.clone(), ctx.link.connection_type())?;
        let status = probe.probe().await;
        tracing::debug!(online = status.is_online, rtt_ms = ?status.rtt_ms, "Probed connectivity");
        engine.report_network(status);
    }
    Ok(engine)
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Match a full ID or a unique prefix against `candidates`.
pub fn resolve_by_prefix<T>(
    what: &'static str,
    query: &str,
    candidates: impl IntoIterator<Item = T>,
) -> Result<T, CliError>
where
    T: Copy + ToString + FromStr + PartialEq,
{
    let query = normalize_identifier(query)?;
    let candidates = candidates.into_iter().collect::<Vec<_>>();
    if let Ok(exact) = query.parse::<T>() {
        if candidates.contains(&exact) {
            return Ok(exact);
        }
    }

    let matching = candidates
        .into_iter()
        .filter(|candidate| candidate.to_string().starts_with(&query))
        .collect::<Vec<_>>();

    match matching.as_slice() {
        [] => Err(CliError::NotFound(what, query)),
        [only] => Ok(*only),
        many => {
            let options = many
                .iter()
                .take(3)
                .map(|id| id.to_string().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn resolve_action_id(engine: &SyncEngine, query: &str) -> Result<ActionId, CliError> {
    resolve_by_prefix(
        "action",
        query,
        engine.list_actions().into_iter().map(|action| action.id),
    )
}

pub fn resolve_item_id(engine: &SyncEngine, query: &str) -> Result<StorageItemId, CliError> {
    resolve_by_prefix(
        "storage item",
        query,
        engine.storage_items().into_iter().map(|item| item.id),
    )
}

/// JSON payload from the flag, or from stdin when piped.
pub fn read_payload(arg: Option<&str>) -> Result<Value, CliError> {
    let raw = match arg {
        Some(text) => Some(text.to_string()),
        None => read_piped_stdin()?,
    };
    let raw = raw
        .filter(|text| !text.trim().is_empty())
        .ok_or(CliError::EmptyPayload)?;
    parse_payload(&raw)
}

pub fn parse_payload(raw: &str) -> Result<Value, CliError> {
    serde_json::from_str(raw.trim()).map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(Some(buffer))
}

pub fn action_to_list_item(action: &OfflineAction) -> ActionListItem {
    let now_ms = Utc::now().timestamp_millis();
    ActionListItem {
        id: action.id.to_string(),
        kind: action.kind.to_string(),
        entity_type: action.entity_type.clone(),
        entity_id: action.entity_id.clone(),
        label: action.entity_label.clone(),
        priority: action.priority.to_string(),
        status: action.status.to_string(),
        retry_count: action.retry_count,
        max_retries: action.max_retries,
        last_error: action.last_error.clone(),
        enqueued_at: action.enqueued_at,
        relative_time: format_relative_time(action.enqueued_at, now_ms),
    }
}

pub fn format_action_lines(actions: &[OfflineAction]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    actions
        .iter()
        .map(|action| {
            let id = action.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let target = truncate(
                &format!("{} {}", action.kind, action.entity_label),
                32,
            );
            let relative_time = format_relative_time(action.enqueued_at, now_ms);
            let retries = format!("{}/{}", action.retry_count, action.max_retries);

            match &action.last_error {
                Some(error) => format!(
                    "{short_id:<13}  {:<6}  {:<8}  {target:<32}  {retries:<5}  {relative_time:<10}  {}",
                    action.priority,
                    action.status,
                    truncate(error, 60)
                ),
                None => format!(
                    "{short_id:<13}  {:<6}  {:<8}  {target:<32}  {retries:<5}  {relative_time}",
                    action.priority, action.status
                ),
            }
        })
        .collect()
}

pub fn format_item_lines(items: &[StorageItem]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    items
        .iter()
        .map(|item| {
            let id = item.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let flag = if item.essential { "essential" } else { "" };
            format!(
                "{short_id:<13}  {:<8}  {:<32}  {:>10}  {:<10}  {flag}",
                format!("{:?}", item.kind).to_lowercase(),
                truncate(&item.name, 32),
                format_bytes(item.size_bytes),
                format_relative_time(item.last_accessed_at, now_ms),
            )
        })
        .collect()
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}
