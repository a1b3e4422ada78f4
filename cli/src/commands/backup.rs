// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Backup management commands
//!
//! Commands: create, restore, list, prune

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault::{BackupId, BackupKind, BackupManager, BackupRecord};

use crate::embedded::EmbeddedVault;

#[derive(Subcommand)]
pub enum BackupCommand {
    /// Take a backup now
    Create {
        /// full or incremental
        #[arg(default_value = "full")]
        kind: BackupKind,
    },

    /// Restore the store to a backup (replays its incremental chain)
    Restore { id: BackupId },

    /// List backup records, pruned ones included
    List {
        /// Only show valid backups
        #[arg(long)]
        valid: bool,
    },

    /// Prune backups past retention that no live chain depends on
    Prune,
}

pub async fn handle_command(command: BackupCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;
    let manager = vault.backups()?;

    let result = match command {
        BackupCommand::Create { kind } => create(&manager, kind).await,
        BackupCommand::Restore { id } => restore(&manager, id).await,
        BackupCommand::List { valid } => list(&manager, valid),
        BackupCommand::Prune => prune(&manager).await,
    };

    drop(manager);
    vault.close()?;
    result
}

async fn create(manager: &BackupManager, kind: BackupKind) -> Result<()> {
    let record = manager
        .create_backup(kind)
        .await
        .with_context(|| format!("Failed to create {} backup", kind))?;

    println!("{}", format!("✓ Backup {} created", record.id).green());
    print_record(&record);
    Ok(())
}

async fn restore(manager: &BackupManager, id: BackupId) -> Result<()> {
    let report = manager
        .restore_backup(id)
        .await
        .with_context(|| format!("Failed to restore backup {}", id))?;

    let chain: Vec<String> = report.chain.iter().map(ToString::to_string).collect();
    println!("{}", format!("✓ Restored backup {}", report.backup_id).green());
    println!("  Chain: {}", chain.join(" → "));
    println!(
        "  Patterns: {}  Symbols: {}  Preferences: {}  Log entries: {}",
        report.patterns, report.symbols, report.preferences, report.change_log
    );
    println!(
        "  Contexts: {}  Documents: {}  Relationships: {}",
        report.learned_contexts, report.documents, report.relationships
    );
    Ok(())
}

fn list(manager: &BackupManager, only_valid: bool) -> Result<()> {
    let records: Vec<BackupRecord> = manager
        .list_backups()?
        .into_iter()
        .filter(|r| !only_valid || r.is_valid())
        .collect();

    if records.is_empty() {
        println!("{}", "No backups".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!(
            "  {:>8}  {:<11} {:<7} {:<25} {:>10}  {}",
            "ID", "KIND", "STATUS", "CREATED", "SIZE", "BASE"
        )
        .bold()
    );
    for record in &records {
        let status = if record.is_valid() {
            "valid".green()
        } else {
            "pruned".dimmed()
        };
        println!(
            "  {:>8}  {:<11} {:<7} {:<25} {:>10}  {}",
            record.id,
            record.kind,
            status,
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.size,
            record
                .base_backup_id
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

async fn prune(manager: &BackupManager) -> Result<()> {
    let report = manager
        .prune_expired()
        .await
        .context("Failed to prune backups")?;

    if report.pruned.is_empty() {
        println!("{}", "Nothing to prune".yellow());
    } else {
        println!("{}", format!("✓ Pruned {} backup(s)", report.pruned.len()).green());
        for id in &report.pruned {
            println!("  - {}", id);
        }
    }
    if !report.protected.is_empty() {
        let ids: Vec<String> = report.protected.iter().map(ToString::to_string).collect();
        println!(
            "  {}",
            format!("Kept {} expired backup(s) needed by live chains: {}", ids.len(), ids.join(", "))
                .dimmed()
        );
    }
    Ok(())
}

fn print_record(record: &BackupRecord) {
    println!("  Kind: {}", record.kind);
    if let Some(base) = record.base_backup_id {
        println!("  Base: {} (chain depth {})", base, record.chain_depth);
    }
    println!("  Path: {}", record.storage_path.display());
    println!("  Size: {} bytes", record.size);
    println!("  SHA-256: {}", record.checksum);
    println!(
        "  Contents: {} pattern(s), {} symbol(s), {} preference(s), {} log entries, {} deletion(s)",
        record.counts.patterns,
        record.counts.symbols,
        record.counts.preferences,
        record.counts.change_log,
        record.counts.tombstones
    );
    println!("  Retained until: {}", record.retained_until.to_rfc3339());
}
