// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Backup Manager
//!
//! Creates, verifies, restores and prunes backups of the vault.
//!
//! ## Create
//!
//! 1. Pick the base: the newest valid backup taken after the last restore,
//!    provided its chain still resolves.
//! 2. Take the store gate exclusively, copy every collection into memory and
//!    reserve the backup id (which doubles as the audit watermark). Release.
//! 3. Build and serialize the payload, write it durably with its checksum.
//! 4. Persist the `BackupRecord`. Only now is the backup observable.
//!
//! ## Restore
//!
//! The whole chain is resolved, read and checksum-verified before anything is
//! touched. The resolved state is then swapped in with a single transaction
//! under the exclusive gate. Cancellation is observed up to the swap.
//!
//! Create, restore and prune are serialized against each other. A scheduled
//! cycle that finds one of them running is skipped; one that cannot get the
//! store gate within the contention policy skips only its backup.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::{
    plan_retention, resolve_chain, BackupConfig, BackupId, BackupKind, BackupPayload,
    BackupRecord, PendingBackup, StoreSnapshot, VaultConfig, VaultError, VaultResult,
};
use crate::infrastructure::{scan_tree, BackupStorage, ExclusiveAccess, Store, RESTORE_MARKER};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: BackupId,
    /// Links applied, root first.
    pub chain: Vec<BackupId>,
    pub patterns: usize,
    pub symbols: usize,
    pub preferences: usize,
    pub learned_contexts: usize,
    pub documents: usize,
    pub relationships: usize,
    pub change_log: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub pruned: Vec<BackupId>,
    pub protected: Vec<BackupId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub created: Option<BackupRecord>,
    pub skipped: Option<&'static str>,
    pub pruned: Vec<BackupId>,
}

pub struct BackupManager {
    store: Arc<Store>,
    storage: BackupStorage,
    config: BackupConfig,
    operation: Mutex<()>,
}

impl BackupManager {
    pub fn new(store: Arc<Store>, storage: BackupStorage, config: BackupConfig) -> Self {
        Self {
            store,
            storage,
            config,
            operation: Mutex::new(()),
        }
    }

    pub fn from_config(store: Arc<Store>, config: &VaultConfig) -> VaultResult<Self> {
        let storage = BackupStorage::new(&config.storage.backup_dir)?;
        Ok(Self::new(store, storage, config.backup.clone()))
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Take a backup now. An incremental requires a valid chain to extend.
    pub async fn create_backup(&self, kind: BackupKind) -> VaultResult<BackupRecord> {
        let _operation = self.operation.lock().await;

        let records = self.record_map()?;
        let base = match kind {
            BackupKind::Full => None,
            BackupKind::Incremental => Some(self.chain_head(&records)?.ok_or_else(|| {
                VaultError::Integrity(
                    "no valid backup chain to extend; take a full backup first".to_string(),
                )
            })?),
        };

        let access = self.store.exclusive().await?;
        self.create_from(access, base.as_ref()).await
    }

    pub async fn restore_backup(&self, id: BackupId) -> VaultResult<RestoreReport> {
        self.restore_backup_with_cancellation(id, &CancellationToken::new())
            .await
    }

    /// Restore `id`, giving up with [`VaultError::Cancelled`] if `cancel`
    /// fires before the swap.
    pub async fn restore_backup_with_cancellation(
        &self,
        id: BackupId,
        cancel: &CancellationToken,
    ) -> VaultResult<RestoreReport> {
        let _operation = self.operation.lock().await;

        let records = self.record_map()?;
        let chain = resolve_chain(&records, id)?;

        let mut payloads = Vec::with_capacity(chain.len());
        for record in &chain {
            ensure_not_cancelled(cancel, id)?;
            let bytes = self.storage.read_verified(record).await?;
            let payload: BackupPayload = serde_json::from_slice(&bytes).map_err(|e| {
                VaultError::Integrity(format!("backup {} payload is unreadable: {}", record.id, e))
            })?;
            payload.verify_header(record)?;
            payloads.push(payload);
        }
        debug!(backup_id = %id, links = payloads.len(), "Backup chain verified");

        let mut state = StoreSnapshot::default();
        for payload in &payloads {
            state.apply(payload);
        }
        ensure_not_cancelled(cancel, id)?;

        {
            let access = self.store.exclusive().await?;
            ensure_not_cancelled(cancel, id)?;
            let marker = access.replace(&state)?;
            debug!(backup_id = %id, marker, "Swapped in restored state");
        }

        let report = RestoreReport {
            backup_id: id,
            chain: chain.iter().map(|r| r.id).collect(),
            patterns: state.patterns.len(),
            symbols: state.symbols.len(),
            preferences: state.preferences.len(),
            learned_contexts: state.learned_contexts.len(),
            documents: state.documents.len(),
            relationships: state.relationships.len(),
            change_log: state.change_log.len(),
        };
        info!(
            backup_id = %id,
            chain_length = report.chain.len(),
            patterns = report.patterns,
            "Restored backup"
        );
        Ok(report)
    }

    /// All backup records, oldest first, including pruned ones.
    pub fn list_backups(&self) -> VaultResult<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = scan_tree(&self.store.trees().backups)?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    pub fn get_backup(&self, id: BackupId) -> VaultResult<BackupRecord> {
        let raw = self
            .store
            .trees()
            .backups
            .get(id.to_key())?
            .ok_or_else(|| VaultError::NotFound(format!("backup {}", id)))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub async fn prune_expired(&self) -> VaultResult<PruneReport> {
        self.prune_expired_at(Utc::now()).await
    }

    pub async fn prune_expired_at(&self, now: DateTime<Utc>) -> VaultResult<PruneReport> {
        let _operation = self.operation.lock().await;
        self.prune_locked(now).await
    }

    pub async fn run_scheduled_cycle(&self) -> VaultResult<CycleReport> {
        self.run_scheduled_cycle_at(Utc::now()).await
    }

    /// One scheduler tick: back up if due, then apply retention.
    pub async fn run_scheduled_cycle_at(&self, now: DateTime<Utc>) -> VaultResult<CycleReport> {
        let Ok(_operation) = self.operation.try_lock() else {
            info!("Backup or restore already in progress, skipping scheduled cycle");
            return Ok(CycleReport {
                skipped: Some("backup or restore in progress"),
                ..Default::default()
            });
        };

        let mut report = CycleReport::default();
        let records = self.record_map()?;

        if self.backup_due(&records, now) {
            let base = self
                .chain_head(&records)?
                .filter(|head| head.chain_depth < self.config.max_chain_depth);

            match self.store.exclusive().await {
                Ok(access) => {
                    report.created = Some(self.create_from(access, base.as_ref()).await?);
                }
                Err(VaultError::Concurrency(reason)) => {
                    info!("Store busy, skipping scheduled backup: {}", reason);
                    report.skipped = Some("store busy");
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!("Recent backup satisfies schedule");
            report.skipped = Some("recent backup");
        }

        report.pruned = self.prune_locked(now).await?.pruned;
        Ok(report)
    }

    /// Second half of create: `access` is released as soon as the snapshot
    /// is in memory.
    async fn create_from(
        &self,
        access: ExclusiveAccess<'_>,
        base: Option<&BackupRecord>,
    ) -> VaultResult<BackupRecord> {
        let (snapshot, watermark) = {
            let snapshot = access.snapshot()?;
            let watermark = access.reserve_id()?;
            drop(access);
            (snapshot, watermark)
        };

        let pending = PendingBackup {
            id: BackupId(watermark),
            kind: if base.is_some() {
                BackupKind::Incremental
            } else {
                BackupKind::Full
            },
            base_backup_id: base.map(|b| b.id),
            chain_depth: base.map_or(0, |b| b.chain_depth + 1),
            created_at: Utc::now(),
            watermark,
        };

        let payload = match base {
            Some(base) => BackupPayload::incremental(&pending, &snapshot, base.watermark),
            None => BackupPayload::full(&pending, &snapshot),
        };
        let counts = payload.counts();
        let bytes = serde_json::to_vec(&payload)?;
        drop(snapshot);

        let stored = self.storage.write(pending.id, pending.kind, &bytes).await?;
        let retained_until = pending.created_at + self.config.retention();
        let record = pending.into_valid(
            stored.path,
            stored.checksum,
            stored.size,
            retained_until,
            counts,
        );

        if let Err(e) = self.save_record(&record).await {
            error!(backup_id = %record.id, "Failed to persist backup record: {}", e);
            if let Err(cleanup) = self.storage.remove(&record).await {
                warn!(backup_id = %record.id, "Failed to remove orphaned payload: {}", cleanup);
            }
            return Err(e);
        }

        info!(
            backup_id = %record.id,
            kind = %record.kind,
            base = ?record.base_backup_id,
            size = record.size,
            patterns = counts.patterns,
            "Created backup"
        );
        Ok(record)
    }

    async fn prune_locked(&self, now: DateTime<Utc>) -> VaultResult<PruneReport> {
        let records = self.list_backups()?;
        let plan = plan_retention(&records, now);
        let by_id: HashMap<BackupId, BackupRecord> = records.into_iter().map(|r| (r.id, r)).collect();

        let mut report = PruneReport {
            protected: plan.protected.clone(),
            ..Default::default()
        };
        for id in plan.prune {
            let Some(mut record) = by_id.get(&id).cloned() else {
                continue;
            };
            self.storage.remove(&record).await?;
            if record.mark_pruned(now) {
                self.save_record(&record).await?;
                report.pruned.push(id);
            }
        }

        if !report.pruned.is_empty() || !report.protected.is_empty() {
            info!(
                pruned = report.pruned.len(),
                protected = report.protected.len(),
                "Applied backup retention"
            );
        }
        Ok(report)
    }

    fn backup_due(&self, records: &HashMap<BackupId, BackupRecord>, now: DateTime<Utc>) -> bool {
        let interval = self.config.interval();
        let jitter = (interval / 10).min(Duration::from_secs(60));
        let window = chrono::Duration::from_std(interval.saturating_sub(jitter))
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        records
            .values()
            .filter(|r| r.is_valid())
            .map(|r| r.created_at)
            .max()
            .map_or(true, |latest| now - latest >= window)
    }

    /// Newest valid backup taken after the last restore whose chain resolves.
    fn chain_head(&self, records: &HashMap<BackupId, BackupRecord>) -> VaultResult<Option<BackupRecord>> {
        let restored_at = self.restore_marker()?;
        let mut candidates: Vec<&BackupRecord> = records
            .values()
            .filter(|r| r.is_valid() && restored_at.map_or(true, |m| r.id.0 > m))
            .collect();
        candidates.sort_by_key(|r| Reverse(r.id));

        let Some(head) = candidates.first() else {
            return Ok(None);
        };
        match resolve_chain(records, head.id) {
            Ok(_) => Ok(Some((*head).clone())),
            Err(VaultError::Integrity(reason)) => {
                warn!(backup_id = %head.id, "Backup chain unusable: {}", reason);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn restore_marker(&self) -> VaultResult<Option<u64>> {
        Ok(self
            .store
            .trees()
            .backup_meta
            .get(RESTORE_MARKER)?
            .and_then(|raw| <[u8; 8]>::try_from(&raw[..]).ok())
            .map(u64::from_be_bytes))
    }

    fn record_map(&self) -> VaultResult<HashMap<BackupId, BackupRecord>> {
        Ok(self.list_backups()?.into_iter().map(|r| (r.id, r)).collect())
    }

    async fn save_record(&self, record: &BackupRecord) -> VaultResult<()> {
        let backups = &self.store.trees().backups;
        backups.insert(record.id.to_key(), serde_json::to_vec(record)?)?;
        backups.flush_async().await?;
        Ok(())
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, id: BackupId) -> VaultResult<()> {
    if cancel.is_cancelled() {
        warn!(backup_id = %id, "Restore cancelled before swap");
        return Err(VaultError::Cancelled(format!("restore of backup {}", id)));
    }
    Ok(())
}
