// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Foreground backup daemon
//!
//! Runs the backup scheduler against the configured store until Ctrl-C, then
//! stops the scheduler and flushes the store.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use corpus_vault::BackupScheduler;

use crate::embedded::EmbeddedVault;

pub async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;
    let manager = Arc::new(vault.backups()?);

    let backup = manager.config().clone();
    if !backup.enabled {
        println!(
            "{}",
            "Backups are disabled in configuration (backup.enabled = false)".yellow()
        );
        vault.close()?;
        return Ok(());
    }

    let scheduler = Arc::new(BackupScheduler::new(manager.clone()));
    let shutdown = scheduler.shutdown_token();
    let handle = scheduler.start();

    println!(
        "{}",
        format!(
            "✓ Backup daemon running (every {}s, retention {} days). Press Ctrl-C to stop.",
            backup.interval_seconds, backup.retention_days
        )
        .green()
    );
    info!(
        data_dir = ?vault.config().storage.data_dir,
        backup_dir = ?vault.config().storage.backup_dir,
        "Backup daemon started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = handle.await {
        warn!("Backup scheduler task ended abnormally: {}", e);
    }

    drop(manager);
    vault.close()?;
    println!("{}", "✓ Backup daemon stopped".green());
    Ok(())
}
