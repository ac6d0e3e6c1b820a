//! Memory tool handlers
//!
//! Each handler parses the model's JSON arguments, runs one locked memory
//! operation, and renders a human-readable reply the model can repeat out
//! loud.

use serde::Deserialize;

use crate::memory::{self, EntityType, MemoryHandle};
use crate::prompt::CONTEXT_ENTITY_LIMIT;
use crate::{Error, Result};

fn parse_args<'a, T: Deserialize<'a>>(arguments: &'a str) -> Result<T> {
    let raw = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(raw).map_err(|e| Error::Model(format!("bad tool arguments: {e}")))
}

const fn default_limit() -> usize {
    10
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

pub(super) async fn search_memory(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: SearchArgs = parse_args(arguments)?;
    let entities = handle.search_entities(user_id, &args.query, args.limit).await?;

    if entities.is_empty() {
        return Ok(format!("Nothing in memory matches \"{}\".", args.query));
    }
    Ok(memory::render_entity_listing(&entities))
}

#[derive(Deserialize)]
struct RememberArgs {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    observations: Vec<String>,
    #[serde(default)]
    is_user_edit: bool,
}

pub(super) async fn remember(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: RememberArgs = parse_args(arguments)?;
    let outcome = handle
        .upsert_entity(
            user_id,
            &args.name,
            EntityType::from_name(&args.entity_type),
            &args.observations,
            args.is_user_edit,
        )
        .await?;

    let verb = if outcome.created { "Remembered" } else { "Updated" };
    Ok(format!(
        "{verb} {} ({}) with {} new observation(s).",
        outcome.entity.name,
        outcome.entity.entity_type.as_str(),
        outcome.observations_added
    ))
}

#[derive(Deserialize)]
struct AddObservationArgs {
    entity_name: String,
    facts: Vec<String>,
    #[serde(default)]
    is_user_edit: bool,
}

pub(super) async fn add_observation(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: AddObservationArgs = parse_args(arguments)?;
    match handle
        .add_observations(user_id, &args.entity_name, &args.facts, args.is_user_edit)
        .await?
    {
        Some(added) => Ok(format!(
            "Added {added} observation(s) to {}.",
            args.entity_name
        )),
        // Silent failure per the tool contract; the model hears a plain notice
        None => Ok(format!("I have no entity named {}.", args.entity_name)),
    }
}

#[derive(Deserialize)]
struct RelationArgs {
    from: String,
    to: String,
    #[serde(rename = "type")]
    relation_type: String,
}

pub(super) async fn create_relation(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: RelationArgs = parse_args(arguments)?;
    let created = handle
        .create_relation(user_id, &args.from, &args.to, &args.relation_type)
        .await?;

    if created {
        Ok(format!(
            "Recorded: {} {} {}.",
            args.from, args.relation_type, args.to
        ))
    } else {
        Ok("That relation already exists or one of the entities is unknown.".to_string())
    }
}

#[derive(Deserialize)]
struct DeleteArgs {
    name: String,
}

pub(super) async fn delete_entity(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: DeleteArgs = parse_args(arguments)?;
    if handle.delete_entity(user_id, &args.name).await? {
        Ok(format!("Forgot {} and everything attached to it.", args.name))
    } else {
        Ok(format!("I have no entity named {}.", args.name))
    }
}

#[derive(Deserialize)]
struct OpenNodesArgs {
    names: Vec<String>,
}

pub(super) async fn open_nodes(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: OpenNodesArgs = parse_args(arguments)?;
    let (entities, relations) = handle.open_nodes(user_id, &args.names).await?;

    if entities.is_empty() {
        return Ok("None of those entities are in memory.".to_string());
    }

    let mut out = memory::render_entity_listing(&entities);
    if !relations.is_empty() {
        out.push_str("Relations:\n");
        for r in relations {
            out.push_str(&format!("- {} {} {}\n", r.from_entity, r.relation_type, r.to_entity));
        }
    }
    Ok(out)
}

pub(super) async fn clear_conversation(handle: &MemoryHandle, user_id: &str) -> Result<String> {
    let removed = handle.clear_conversation(user_id).await?;
    Ok(format!("Cleared {removed} conversation turn(s)."))
}

pub(super) async fn get_memory_summary(handle: &MemoryHandle, user_id: &str) -> Result<String> {
    handle
        .summary_or_regenerate(user_id, CONTEXT_ENTITY_LIMIT)
        .await
}

#[derive(Deserialize)]
struct RecentArgs {
    #[serde(default = "default_limit")]
    limit: usize,
}

pub(super) async fn get_recent_conversation(
    handle: &MemoryHandle,
    user_id: &str,
    arguments: &str,
) -> Result<String> {
    let args: RecentArgs = parse_args(arguments)?;
    let turns = handle.recent_turns(user_id, args.limit).await?;

    if turns.is_empty() {
        return Ok("No recent conversation on record.".to_string());
    }

    let lines: Vec<String> = turns
        .iter()
        .map(|t| format!("{}: {}", t.role.as_str(), t.content))
        .collect();
    Ok(lines.join("\n"))
}
