use serde::Serialize;
use serde_json::Value;
use sitesync_core::models::ConflictRecord;

use crate::cli::DecisionArg;
use crate::commands::common::{
    format_timestamp, open_engine, read_payload, resolve_by_prefix, truncate, Context,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ConflictItem {
    pub action_id: String,
    pub entity: Option<String>,
    pub server_version: Option<String>,
    pub server_state: Value,
    pub client_state: Value,
    pub suggestions: Vec<String>,
    pub detected_at: i64,
    pub detected_at_iso: String,
}

pub fn conflict_to_item(record: &ConflictRecord, entity: Option<String>) -> ConflictItem {
    ConflictItem {
        action_id: record.action_id.to_string(),
        entity,
        server_version: record.server_version.clone(),
        server_state: record.server_state.clone(),
        client_state: record.client_state.clone(),
        suggestions: record.suggestions.clone(),
        detected_at: record.detected_at,
        detected_at_iso: format_timestamp(record.detected_at),
    }
}

pub fn run_conflicts(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let records = engine.list_conflicts();
    let entity_of = |record: &ConflictRecord| {
        engine
            .get_action(&record.action_id)
            .map(|action| format!("{} {}", action.entity_type, action.entity_label))
    };

    if as_json {
        let json_items = records
            .iter()
            .map(|record| conflict_to_item(record, entity_of(record)))
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No unresolved conflicts.");
        return Ok(());
    }

    for record in &records {
        let id = record.action_id.to_string();
        let short_id = id.chars().take(13).collect::<String>();
        let entity = entity_of(record).unwrap_or_default();
        let version = record.server_version.as_deref().unwrap_or("-");
        println!(
            "{short_id:<13}  {}  {:<32}  server={version}",
            format_timestamp(record.detected_at),
            truncate(&entity, 32)
        );
        for suggestion in &record.suggestions {
            println!("    - {suggestion}");
        }
    }
    Ok(())
}

pub fn run_resolve(
    id: &str,
    decision: DecisionArg,
    payload: Option<&str>,
    ctx: &Context,
) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_by_prefix(
        "conflict",
        id,
        engine.list_conflicts().into_iter().map(|record| record.action_id),
    )?;
    let merged = match decision {
        DecisionArg::Merge => Some(read_payload(payload)?),
        DecisionArg::ServerWins | DecisionArg::ClientWins => None,
    };

    match engine.resolve_conflict(&id, decision.into(), merged)? {
        Some(action) => println!("{} {}", action.id, action.status),
        None => println!("{id} dropped"),
    }
    Ok(())
}
