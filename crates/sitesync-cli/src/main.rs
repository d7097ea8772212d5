//! sitesync CLI - queue and sync offline field changes from the terminal
//!
//! Drives the sitesync engine against a local database and an HTTP remote.

mod cli;
mod commands;
mod error;


use clap::Parser;
use sitesync_core::EngineConfig;

use crate::cli::{Cli, Commands, SettingsCommands, StorageCommands};
use crate::commands::actions::{run_remove, run_retry};
use crate::commands::common::Context;
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{run_conflicts, run_resolve};
use crate::commands::enqueue::run_enqueue;
use crate::commands::list::{run_list, run_show};
use crate::commands::settings::{run_settings_set, run_settings_show};
use crate::commands::storage::{
    run_storage_add, run_storage_list, run_storage_remove, run_storage_touch, run_storage_usage,
};
use crate::commands::sync::{run_drain, run_status, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitesync=info,sitesync_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Completions need no database.
    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let ctx = Context::new(EngineConfig::from_env()?, cli.db_path, cli.link)?;

    match cli.command {
        Commands::Enqueue(args) => run_enqueue(args, &ctx)?,
        Commands::List {
            status,
            limit,
            json,
        } => run_list(status, limit, json, &ctx)?,
        Commands::Show { id } => run_show(&id, &ctx)?,
        Commands::Drain { json } => run_drain(json, &ctx).await?,
        Commands::Retry { id } => run_retry(&id, &ctx)?,
        Commands::Remove { id } => run_remove(&id, &ctx)?,
        Commands::Conflicts { json } => run_conflicts(json, &ctx)?,
        Commands::Resolve {
            id,
            decision,
            payload,
        } => run_resolve(&id, decision, payload.as_deref(), &ctx)?,
        Commands::Settings { command } => match command {
            SettingsCommands::Show { json } => run_settings_show(json, &ctx)?,
            SettingsCommands::Set(args) => run_settings_set(args, &ctx)?,
        },
        Commands::Storage { command } => match command {
            StorageCommands::Add {
                kind,
                name,
                size,
                essential,
            } => run_storage_add(kind, &name, size, essential, &ctx)?,
            StorageCommands::List { json } => run_storage_list(json, &ctx)?,
            StorageCommands::Remove { id } => run_storage_remove(&id, &ctx)?,
            StorageCommands::Touch { id } => run_storage_touch(&id, &ctx)?,
            StorageCommands::Usage { json } => run_storage_usage(json, &ctx)?,
        },
        Commands::Status { json } => run_status(json, &ctx)?,
        Commands::Watch => run_watch(&ctx).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}
