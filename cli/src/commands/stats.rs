// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Vault statistics

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault::PatternRepository;

use crate::embedded::EmbeddedVault;

#[derive(Args)]
pub struct StatsCommand {
    /// Print statistics as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(command: StatsCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;
    let stats = vault
        .patterns()
        .get_statistics()
        .await
        .context("Failed to compute statistics");
    vault.close()?;
    let stats = stats?;

    if command.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "Patterns:".bold());
    println!("  Total: {}", stats.total_patterns);
    println!("  Mean frequency: {:.2}", stats.mean_frequency);
    println!();

    println!("{}", "By discipline:".bold());
    for (discipline, count) in &stats.by_discipline {
        let line = format!("  {:<18} {}", discipline.to_string(), count);
        if *count == 0 {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }
    println!();

    if !stats.by_pattern_type.is_empty() {
        println!("{}", "By pattern type:".bold());
        for (pattern_type, count) in &stats.by_pattern_type {
            println!("  {:<28} {}", pattern_type, count);
        }
        println!();
    }

    println!("{}", "Corpus:".bold());
    println!("  Documents analyzed: {}", stats.documents_analyzed);
    println!("  Learned contexts: {}", stats.learned_contexts);
    println!("  Pattern relationships: {}", stats.pattern_relationships);
    println!();

    println!("{}", "Dictionary:".bold());
    println!("  Symbols: {}", stats.total_symbols);
    println!("  Preferences: {}", stats.total_preferences);
    println!();

    println!("{}", "Durability:".bold());
    println!("  Change log entries: {}", stats.change_log_entries);
    println!("  Valid backups: {}", stats.valid_backups);

    Ok(())
}
