use sitesync_core::NewAction;

use crate::cli::EnqueueArgs;
use crate::commands::common::{open_engine, read_payload, Context};
use crate::error::CliError;

pub fn build_new_action(args: EnqueueArgs) -> Result<NewAction, CliError> {
    let payload = read_payload(args.payload.as_deref())?;
    let mut action = NewAction::new(args.kind.into(), args.entity_type, args.entity_id, payload)
        .with_priority(args.priority.into());
    if let Some(label) = args.label {
        action = action.with_label(label);
    }
    if let Some(max_retries) = args.max_retries {
        action = action.with_max_retries(max_retries);
    }
    Ok(action)
}

pub fn run_enqueue(args: EnqueueArgs, ctx: &Context) -> Result<(), CliError> {
    let action = build_new_action(args)?;
    let engine = open_engine(ctx)?;
    let id = engine.enqueue(action)?;
    println!("{id}");
    Ok(())
}
