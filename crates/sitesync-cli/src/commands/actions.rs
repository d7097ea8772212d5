use crate::commands::common::{open_engine, resolve_action_id, Context};
use crate::error::CliError;

pub fn run_retry(id: &str, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_action_id(&engine, id)?;
    let action = engine.retry_action(&id)?;
    println!("{} {}", action.id, action.status);
    Ok(())
}

pub fn run_remove(id: &str, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_action_id(&engine, id)?;
    let action = engine.remove_action(&id)?;
    println!("{}", action.id);
    Ok(())
}
