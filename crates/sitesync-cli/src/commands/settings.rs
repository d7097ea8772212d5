use sitesync_core::models::{SettingsPatch, SyncSettings};

use crate::cli::SettingsSetArgs;
use crate::commands::common::{open_engine, Context};
use crate::error::CliError;

pub fn settings_patch(args: SettingsSetArgs) -> SettingsPatch {
    SettingsPatch {
        auto_sync: args.auto_sync,
        sync_interval_seconds: args.sync_interval,
        wifi_only: args.wifi_only,
        background_sync: args.background_sync,
        conflict_resolution: args.conflict_resolution.map(Into::into),
        max_retries: args.max_retries,
        retry_interval_seconds: args.retry_interval,
        compression_enabled: args.compression,
        backoff: args.backoff.map(Into::into),
    }
}

pub fn format_settings_lines(settings: &SyncSettings) -> Vec<String> {
    vec![
        format!("auto_sync               {}", settings.auto_sync),
        format!("sync_interval_seconds   {}", settings.sync_interval_seconds),
        format!("wifi_only               {}", settings.wifi_only),
        format!("background_sync         {}", settings.background_sync),
        format!("conflict_resolution     {}", settings.conflict_resolution),
        format!("max_retries             {}", settings.max_retries),
        format!("retry_interval_seconds  {}", settings.retry_interval_seconds),
        format!("compression_enabled     {}", settings.compression_enabled),
        format!("backoff                 {:?}", settings.backoff).to_lowercase(),
    ]
}

fn print_settings(settings: &SyncSettings, as_json: bool) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(settings)?);
    } else {
        for line in format_settings_lines(settings) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_settings_show(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    print_settings(&engine.settings(), as_json)
}

pub fn run_settings_set(args: SettingsSetArgs, ctx: &Context) -> Result<(), CliError> {
    let patch = settings_patch(args);
    if patch.is_empty() {
        return Err(CliError::EmptySettingsPatch);
    }
    let engine = open_engine(ctx)?;
    let settings = engine.update_settings(&patch)?;
    print_settings(&settings, false)
}
