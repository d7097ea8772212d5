use std::collections::BTreeMap;

use serde_json::json;
use sitesync_core::models::{HistoryOutcome, SyncHistoryEntry};
use sitesync_core::network::HttpProbe;
use sitesync_core::queue::QueueEvent;
use sitesync_core::sync::{DrainOutcome, SkipReason};

use crate::commands::common::{format_bytes, open_engine, open_sync_engine, Context};
use crate::error::CliError;

pub fn describe_drain(outcome: &DrainOutcome) -> String {
    match outcome {
        DrainOutcome::Completed(report) => {
            let mut line = format!(
                "Sync completed: {} attempted, {} synced, {} failed, {} conflicts",
                report.attempted, report.synced, report.failed, report.conflicts
            );
            if report.requeued > 0 {
                line.push_str(&format!(", {} requeued", report.requeued));
            }
            if report.dropped > 0 {
                line.push_str(&format!(", {} dropped for server state", report.dropped));
            }
            if report.aborted {
                line.push_str(" (stopped early)");
            }
            line
        }
        DrainOutcome::Coalesced => "Sync already running; folded into the current pass".to_string(),
        DrainOutcome::Skipped(SkipReason::Offline) => "Sync skipped: offline".to_string(),
        DrainOutcome::Skipped(SkipReason::WifiOnly) => {
            "Sync skipped: wifi_only is set and the link is not Wi-Fi".to_string()
        }
        DrainOutcome::Skipped(SkipReason::NothingToSync) => "Nothing to sync".to_string(),
    }
}

fn drain_to_json(outcome: &DrainOutcome) -> serde_json::Value {
    match outcome {
        DrainOutcome::Completed(report) => json!({ "outcome": "completed", "report": report }),
        DrainOutcome::Coalesced => json!({ "outcome": "coalesced" }),
        DrainOutcome::Skipped(reason) => json!({ "outcome": "skipped", "reason": reason }),
    }
}

pub async fn run_drain(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_sync_engine(ctx).await?;
    let outcome = engine.run_drain_now().await;

    if as_json {
        let body = json!({
            "result": drain_to_json(&outcome),
            "history": engine.history(),
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("{}", describe_drain(&outcome));
    for entry in engine.history() {
        println!("  {}", describe_history(&entry));
    }
    Ok(())
}

pub fn describe_history(entry: &SyncHistoryEntry) -> String {
    let outcome = match entry.outcome {
        HistoryOutcome::Synced => "synced",
        HistoryOutcome::ServerWins => "kept server",
        HistoryOutcome::ClientWinsForced => "forced",
        HistoryOutcome::Discarded => "discarded",
    };
    let mut line = format!(
        "{outcome:<11}  {} {} {}",
        entry.kind, entry.entity_type, entry.entity_label
    );
    if let Some(note) = &entry.note {
        line.push_str(&format!("  ({note})"));
    }
    line
}

pub fn describe_event(event: &QueueEvent) -> String {
    match event {
        QueueEvent::Enqueued { id, priority } => format!("{id}  queued ({priority})"),
        QueueEvent::StatusChanged {
            id,
            from,
            to,
            retry_count,
        } => format!("{id}  {from} -> {to} (retries {retry_count})"),
        QueueEvent::PayloadReplaced { id } => format!("{id}  payload replaced"),
        QueueEvent::Removed { id } => format!("{id}  removed"),
    }
}

pub fn run_status(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let state = engine.sync_state();
    let network = engine.get_network_status();
    let usage = engine.storage_usage();
    let mut counts = BTreeMap::new();
    for action in engine.list_actions() {
        *counts.entry(action.status.to_string()).or_insert(0_usize) += 1;
    }

    if as_json {
        let body = json!({
            "state": state,
            "network": network,
            "queue": counts,
            "conflicts": engine.list_conflicts().len(),
            "storage": usage,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("state:    {state}");
    if network.is_online {
        println!("network:  online ({:?})", network.connection_type);
    } else {
        println!("network:  offline");
    }
    if counts.is_empty() {
        println!("queue:    empty");
    } else {
        let summary = counts
            .iter()
            .map(|(status, count)| format!("{count} {status}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!("queue:    {summary}");
    }
    println!(
        "storage:  {} of {}",
        format_bytes(usage.used_bytes),
        format_bytes(usage.capacity_bytes)
    );
    Ok(())
}

pub async fn run_watch(ctx: &Context) -> Result<(), CliError> {
    let engine = open_sync_engine(ctx).await?;
    let _subscription = engine.subscribe_to_queue_changes(|event| {
        println!("{}", describe_event(&event));
    });
    if let Some(url) = &ctx.config.probe_url {
        let probe = HttpProbe::new(url.clone(), ctx.link.connection_type())?;
        engine.start_probe(probe, ctx.config.probe_interval);
    }
    engine.start()?;
    println!("Watching queue ({}); press Ctrl-C to stop", engine.sync_state());

    tokio::signal::ctrl_c().await?;
    engine.shutdown();

    for entry in engine.history() {
        println!("{}", describe_history(&entry));
    }
    Ok(())
}
