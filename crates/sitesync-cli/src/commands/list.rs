use sitesync_core::ActionStatus;

use crate::cli::StatusArg;
use crate::commands::common::{
    action_to_list_item, format_action_lines, format_timestamp, open_engine, resolve_action_id,
    ActionListItem, Context,
};
use crate::error::CliError;

pub const fn status_filter(status: StatusArg) -> ActionStatus {
    match status {
        StatusArg::Pending => ActionStatus::Pending,
        StatusArg::Syncing => ActionStatus::Syncing,
        StatusArg::Failed => ActionStatus::Failed,
        StatusArg::Conflict => ActionStatus::Conflict,
    }
}

pub fn run_list(
    status: Option<StatusArg>,
    limit: usize,
    as_json: bool,
    ctx: &Context,
) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let wanted = status.map(status_filter);
    let actions = engine
        .list_actions()
        .into_iter()
        .filter(|action| wanted.is_none_or(|status| action.status == status))
        .take(limit)
        .collect::<Vec<_>>();

    if as_json {
        let json_items = actions
            .iter()
            .map(action_to_list_item)
            .collect::<Vec<ActionListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if actions.is_empty() {
        println!("Queue is empty.");
    } else {
        for line in format_action_lines(&actions) {
            println!("{line}");
        }
    }

    Ok(())
}

pub fn run_show(id: &str, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_action_id(&engine, id)?;
    let action = engine
        .get_action(&id)
        .ok_or_else(|| CliError::NotFound("action", id.to_string()))?;

    println!("id:          {}", action.id);
    println!("action:      {} {} {}", action.kind, action.entity_type, action.entity_id);
    println!("label:       {}", action.entity_label);
    println!("priority:    {}", action.priority);
    println!("status:      {}", action.status);
    println!("retries:     {}/{}", action.retry_count, action.max_retries);
    println!("enqueued:    {}", format_timestamp(action.enqueued_at));
    if let Some(next) = action.next_attempt_at {
        println!("next retry:  {}", format_timestamp(next));
    }
    if let Some(error) = &action.last_error {
        println!("last error:  {error}");
    }
    if action.force {
        println!("force:       next submission overrides the server");
    }
    println!("payload:\n{}", serde_json::to_string_pretty(&action.payload)?);
    Ok(())
}
