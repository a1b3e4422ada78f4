// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Change log inspection

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault::{AuditFilter, EntityType, Operation};

use crate::embedded::EmbeddedVault;

#[derive(Args)]
pub struct AuditCommand {
    /// pattern, symbol, user-preference, learned-context, document or
    /// pattern-relationship
    #[arg(long)]
    entity_type: Option<EntityType>,

    /// Only entries for this entity (requires --entity-type)
    #[arg(long, requires = "entity_type")]
    entity_id: Option<String>,

    /// Inclusive lower bound (RFC 3339)
    #[arg(long)]
    since: Option<DateTime<Utc>>,

    /// Inclusive upper bound (RFC 3339)
    #[arg(long)]
    until: Option<DateTime<Utc>>,

    /// Stop after this many entries
    #[arg(short, long)]
    limit: Option<usize>,

    /// Print entries as JSON lines
    #[arg(long)]
    json: bool,
}

pub async fn execute(command: AuditCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;
    let result = show(&vault, command);
    vault.close()?;
    result
}

fn show(vault: &EmbeddedVault, command: AuditCommand) -> Result<()> {
    let mut filter = match (command.entity_type, command.entity_id) {
        (Some(entity_type), Some(id)) => AuditFilter::entity(entity_type, id),
        (Some(entity_type), None) => AuditFilter::all().of_type(entity_type),
        _ => AuditFilter::all(),
    };
    if let Some(since) = command.since {
        filter = filter.since(since);
    }
    if let Some(until) = command.until {
        filter = filter.until(until);
    }

    let limit = command.limit.unwrap_or(usize::MAX);
    let mut shown = 0;
    for entry in vault.audit().query(filter).take(limit) {
        let entry = entry.context("Failed to read change log")?;
        shown += 1;

        if command.json {
            println!("{}", serde_json::to_string(&entry)?);
            continue;
        }

        let operation = match entry.operation {
            Operation::Create => "create".green(),
            Operation::Update => "update".yellow(),
            Operation::Delete => "delete".red(),
        };
        println!(
            "{:>8}  {}  {:<6}  {}:{}  {}",
            entry.id.to_string().dimmed(),
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            operation,
            entry.entity_type,
            entry.entity_id,
            format!("by {}", entry.actor).dimmed()
        );
    }

    if shown == 0 && !command.json {
        println!("{}", "No matching change log entries".yellow());
    }
    Ok(())
}
