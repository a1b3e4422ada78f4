// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Backup Scheduler - background task driving periodic backups and retention
//!
//! Wakes up every `interval_seconds`, asks the [`BackupManager`] for one
//! scheduled cycle and logs the outcome. Failures are logged and the schedule
//! continues; shutdown is cooperative through a `CancellationToken`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Keeps the backup chain fresh without operator involvement

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::BackupManager;
use crate::domain::BackupConfig;

/// Background backup task
pub struct BackupScheduler {
    manager: Arc<BackupManager>,
    config: BackupConfig,
    shutdown_token: CancellationToken,
}

impl BackupScheduler {
    pub fn new(manager: Arc<BackupManager>) -> Self {
        let config = manager.config().clone();
        Self {
            manager,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the scheduler background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the scheduler loop until the shutdown token fires
    pub async fn run(&self) {
        if !self.config.enabled {
            info!("Backup scheduler is disabled");
            return;
        }

        info!(
            interval_seconds = self.config.interval_seconds,
            retention_days = self.config.retention_days,
            max_chain_depth = self.config.max_chain_depth,
            "Starting backup scheduler"
        );

        let period = Duration::from_secs(self.config.interval_seconds.max(1));
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first backup is due one interval in.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running scheduled backup cycle");
                    match self.manager.run_scheduled_cycle().await {
                        Ok(report) => {
                            info!(
                                created = ?report.created.as_ref().map(|r| r.id),
                                kind = ?report.created.as_ref().map(|r| r.kind),
                                skipped = ?report.skipped,
                                pruned = report.pruned.len(),
                                "Scheduled backup cycle completed"
                            );
                        }
                        Err(e) => {
                            warn!("Scheduled backup cycle failed: {}", e);
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping backup scheduler");
                    break;
                }
            }
        }

        info!("Backup scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{BackupStorage, Store};

    fn manager(config: BackupConfig) -> (tempfile::TempDir, Arc<BackupManager>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::temporary().unwrap());
        let storage = BackupStorage::new(dir.path()).unwrap();
        (dir, Arc::new(BackupManager::new(store, storage, config)))
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns_immediately() {
        let (_dir, manager) = manager(BackupConfig {
            enabled: false,
            ..Default::default()
        });
        let scheduler = BackupScheduler::new(manager);
        tokio::time::timeout(Duration::from_secs(1), scheduler.run())
            .await
            .expect("disabled scheduler should not loop");
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_loop() {
        let (_dir, manager) = manager(BackupConfig::default());
        let scheduler = Arc::new(BackupScheduler::new(manager.clone()));
        let token = scheduler.shutdown_token();

        let handle = scheduler.start();
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backup_taken_after_first_interval() {
        let (_dir, manager) = manager(BackupConfig {
            interval_seconds: 1,
            ..Default::default()
        });
        let scheduler = Arc::new(BackupScheduler::new(manager.clone()));
        let token = scheduler.shutdown_token();
        let handle = scheduler.start();

        let mut waited = Duration::ZERO;
        while manager.list_backups().unwrap().is_empty() && waited < Duration::from_secs(5) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += Duration::from_millis(50);
        }
        token.cancel();
        handle.await.unwrap();

        let backups = manager.list_backups().unwrap();
        assert!(!backups.is_empty());
        assert_eq!(backups[0].kind, crate::domain::BackupKind::Full);
    }
}
