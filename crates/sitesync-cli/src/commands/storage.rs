use sitesync_core::models::StorageItem;

use crate::cli::ItemKindArg;
use crate::commands::common::{
    format_bytes, format_item_lines, open_engine, resolve_item_id, Context,
};
use crate::error::CliError;

pub fn run_storage_add(
    kind: ItemKindArg,
    name: &str,
    size: u64,
    essential: bool,
    ctx: &Context,
) -> Result<(), CliError> {
    let mut item = StorageItem::new(kind.into(), name, size)?;
    if essential {
        item = item.essential();
    }
    let id = item.id;

    let engine = open_engine(ctx)?;
    let evicted = engine.register_storage_item(item)?;
    println!("{id}");
    for item in &evicted {
        eprintln!("evicted {} ({})", item.name, format_bytes(item.size_bytes));
    }
    Ok(())
}

pub fn run_storage_list(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let items = engine.storage_items();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if items.is_empty() {
        println!("No cached items.");
    } else {
        for line in format_item_lines(&items) {
            println!("{line}");
        }
    }
    Ok(())
}

pub fn run_storage_remove(id: &str, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_item_id(&engine, id)?;
    let item = engine.clear_storage_item(&id)?;
    println!("{}", item.id);
    Ok(())
}

pub fn run_storage_touch(id: &str, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let id = resolve_item_id(&engine, id)?;
    let item = engine.touch_storage_item(&id)?;
    println!("{}", item.id);
    Ok(())
}

pub fn run_storage_usage(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let engine = open_engine(ctx)?;
    let usage = engine.storage_usage();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&usage)?);
        return Ok(());
    }

    println!(
        "{} of {} used ({:.0}%, evicts above {:.0}%)",
        format_bytes(usage.used_bytes),
        format_bytes(usage.capacity_bytes),
        usage.ratio() * 100.0,
        usage.eviction_threshold * 100.0
    );
    println!(
        "{} items, {} evictable",
        usage.item_count,
        format_bytes(usage.evictable_bytes)
    );
    for (kind, bytes) in &usage.by_kind {
        println!("  {:<10} {}", format!("{kind:?}").to_lowercase(), format_bytes(*bytes));
    }
    Ok(())
}
