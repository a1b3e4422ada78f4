// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Backup Domain Model
//!
//! Backups are self-describing JSON snapshots of the content collections.
//! A full backup holds everything; an incremental holds what changed after its
//! base (entities touched by change-log entries past the base watermark, plus
//! tombstones for the ones deleted since). Incrementals link to their
//! predecessor through `base_backup_id`, forming a chain rooted at a full
//! backup.
//!
//! ## Lifecycle
//!
//! ```text
//! PendingBackup ──(payload + checksum written)──▶ BackupRecord{Valid} ──(retention)──▶ Pruned
//! ```
//!
//! A [`PendingBackup`] only ever lives in memory. It becomes a persisted
//! [`BackupRecord`] through [`PendingBackup::into_valid`], which requires the
//! checksum of the payload that is already on disk.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::audit::{ChangeLogEntry, EntityType};
use super::corpus::{
    AnalyzedDocument, ContextId, DocumentId, LearnedContext, PatternRelationship, RelationshipId,
};
use super::error::{VaultError, VaultResult};
use super::pattern::{Pattern, PatternId};
use super::symbol::{Symbol, UserPreference};

pub const PAYLOAD_FORMAT: &str = "corpus-vault/backup";
pub const PAYLOAD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(pub u64);

impl BackupId {
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(BackupId)
            .map_err(|_| VaultError::Validation(format!("invalid backup id '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => f.write_str("full"),
            BackupKind::Incremental => f.write_str("incremental"),
        }
    }
}

impl FromStr for BackupKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            other => Err(VaultError::Validation(format!(
                "backup kind must be 'full' or 'incremental', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Valid,
    Pruned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub kind: BackupKind,
    pub storage_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Hex SHA-256 of the payload bytes.
    pub checksum: String,
    pub size: u64,
    pub base_backup_id: Option<BackupId>,
    pub retained_until: DateTime<Utc>,
    pub status: BackupStatus,
    #[serde(default)]
    pub pruned_at: Option<DateTime<Utc>>,
    /// Audit sequence position captured with the snapshot.
    pub watermark: u64,
    /// Number of incrementals between this backup and its root full backup.
    pub chain_depth: u32,
    pub counts: PayloadCounts,
}

impl BackupRecord {
    pub fn is_valid(&self) -> bool {
        self.status == BackupStatus::Valid
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retained_until <= now
    }

    /// Terminal transition. Returns false if the record was already pruned.
    pub fn mark_pruned(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == BackupStatus::Pruned {
            return false;
        }
        self.status = BackupStatus::Pruned;
        self.pruned_at = Some(now);
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadCounts {
    pub patterns: usize,
    pub symbols: usize,
    pub preferences: usize,
    pub change_log: usize,
    pub tombstones: usize,
    #[serde(default)]
    pub learned_contexts: usize,
    #[serde(default)]
    pub documents: usize,
    #[serde(default)]
    pub relationships: usize,
}

/// A backup whose payload is not yet durable.
#[derive(Debug, Clone)]
pub struct PendingBackup {
    pub id: BackupId,
    pub kind: BackupKind,
    pub base_backup_id: Option<BackupId>,
    pub chain_depth: u32,
    pub created_at: DateTime<Utc>,
    pub watermark: u64,
}

impl PendingBackup {
    pub fn into_valid(
        self,
        storage_path: PathBuf,
        checksum: String,
        size: u64,
        retained_until: DateTime<Utc>,
        counts: PayloadCounts,
    ) -> BackupRecord {
        BackupRecord {
            id: self.id,
            kind: self.kind,
            storage_path,
            created_at: self.created_at,
            checksum,
            size,
            base_backup_id: self.base_backup_id,
            retained_until,
            status: BackupStatus::Valid,
            pruned_at: None,
            watermark: self.watermark,
            chain_depth: self.chain_depth,
            counts,
        }
    }
}

/// In-memory copy of every content collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub patterns: BTreeMap<PatternId, Pattern>,
    pub symbols: BTreeMap<String, Symbol>,
    pub preferences: BTreeMap<String, UserPreference>,
    pub learned_contexts: BTreeMap<ContextId, LearnedContext>,
    pub documents: BTreeMap<DocumentId, AnalyzedDocument>,
    pub relationships: BTreeMap<RelationshipId, PatternRelationship>,
    /// Ascending `(timestamp, id)` order.
    pub change_log: Vec<ChangeLogEntry>,
}

impl StoreSnapshot {
    /// Apply one link of a backup chain.
    pub fn apply(&mut self, payload: &BackupPayload) {
        if payload.kind == BackupKind::Full {
            *self = StoreSnapshot::default();
        }

        for pattern in &payload.patterns {
            self.patterns.insert(pattern.id, pattern.clone());
        }
        for symbol in &payload.symbols {
            self.symbols.insert(symbol.key(), symbol.clone());
        }
        for pref in &payload.preferences {
            self.preferences.insert(pref.key(), pref.clone());
        }
        for context in &payload.learned_contexts {
            self.learned_contexts.insert(context.id, context.clone());
        }
        for document in &payload.documents {
            self.documents.insert(document.id, document.clone());
        }
        for link in &payload.relationships {
            self.relationships.insert(link.id, link.clone());
        }

        for id in &payload.tombstones.patterns {
            self.patterns.remove(id);
        }
        for key in &payload.tombstones.symbols {
            self.symbols.remove(key);
        }
        for key in &payload.tombstones.preferences {
            self.preferences.remove(key);
        }
        for id in &payload.tombstones.learned_contexts {
            self.learned_contexts.remove(id);
        }
        for id in &payload.tombstones.documents {
            self.documents.remove(id);
        }
        for id in &payload.tombstones.relationships {
            self.relationships.remove(id);
        }

        let known: BTreeSet<_> = self.change_log.iter().map(|e| e.id).collect();
        self.change_log.extend(
            payload
                .change_log
                .iter()
                .filter(|e| !known.contains(&e.id))
                .cloned(),
        );
        self.change_log.sort_by_key(|e| e.storage_key());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstones {
    #[serde(default)]
    pub patterns: Vec<PatternId>,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub preferences: Vec<String>,
    #[serde(default)]
    pub learned_contexts: Vec<ContextId>,
    #[serde(default)]
    pub documents: Vec<DocumentId>,
    #[serde(default)]
    pub relationships: Vec<RelationshipId>,
}

impl Tombstones {
    pub fn len(&self) -> usize {
        self.patterns.len()
            + self.symbols.len()
            + self.preferences.len()
            + self.learned_contexts.len()
            + self.documents.len()
            + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Serialized backup document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupPayload {
    pub format: String,
    pub version: u32,
    pub backup_id: BackupId,
    pub kind: BackupKind,
    pub base_backup_id: Option<BackupId>,
    pub created_at: DateTime<Utc>,
    pub watermark: u64,
    pub patterns: Vec<Pattern>,
    pub symbols: Vec<Symbol>,
    pub preferences: Vec<UserPreference>,
    #[serde(default)]
    pub learned_contexts: Vec<LearnedContext>,
    #[serde(default)]
    pub documents: Vec<AnalyzedDocument>,
    #[serde(default)]
    pub relationships: Vec<PatternRelationship>,
    pub change_log: Vec<ChangeLogEntry>,
    #[serde(default)]
    pub tombstones: Tombstones,
}

impl BackupPayload {
    pub fn full(pending: &PendingBackup, snapshot: &StoreSnapshot) -> Self {
        Self {
            format: PAYLOAD_FORMAT.to_string(),
            version: PAYLOAD_VERSION,
            backup_id: pending.id,
            kind: BackupKind::Full,
            base_backup_id: None,
            created_at: pending.created_at,
            watermark: pending.watermark,
            patterns: snapshot.patterns.values().cloned().collect(),
            symbols: snapshot.symbols.values().cloned().collect(),
            preferences: snapshot.preferences.values().cloned().collect(),
            learned_contexts: snapshot.learned_contexts.values().cloned().collect(),
            documents: snapshot.documents.values().cloned().collect(),
            relationships: snapshot.relationships.values().cloned().collect(),
            change_log: snapshot.change_log.clone(),
            tombstones: Tombstones::default(),
        }
    }

    /// Everything recorded after `base_watermark`, resolved against the
    /// current snapshot: live entities are copied, vanished ones tombstoned.
    pub fn incremental(pending: &PendingBackup, snapshot: &StoreSnapshot, base_watermark: u64) -> Self {
        let change_log: Vec<ChangeLogEntry> = snapshot
            .change_log
            .iter()
            .filter(|e| e.id.0 > base_watermark)
            .cloned()
            .collect();

        let mut pattern_ids: BTreeSet<PatternId> = BTreeSet::new();
        let mut symbol_keys: BTreeSet<String> = BTreeSet::new();
        let mut preference_keys: BTreeSet<String> = BTreeSet::new();
        let mut context_ids: BTreeSet<ContextId> = BTreeSet::new();
        let mut document_ids: BTreeSet<DocumentId> = BTreeSet::new();
        let mut relationship_ids: BTreeSet<RelationshipId> = BTreeSet::new();
        for entry in &change_log {
            match entry.entity_type {
                EntityType::Pattern => {
                    if let Ok(id) = entry.entity_id.parse() {
                        pattern_ids.insert(id);
                    }
                }
                EntityType::LearnedContext => {
                    if let Ok(id) = entry.entity_id.parse() {
                        context_ids.insert(id);
                    }
                }
                EntityType::Document => {
                    if let Ok(id) = entry.entity_id.parse() {
                        document_ids.insert(id);
                    }
                }
                EntityType::PatternRelationship => {
                    if let Ok(id) = entry.entity_id.parse() {
                        relationship_ids.insert(id);
                    }
                }
                EntityType::Symbol => {
                    symbol_keys.insert(entry.entity_id.clone());
                }
                EntityType::UserPreference => {
                    preference_keys.insert(entry.entity_id.clone());
                }
            }
        }

        let mut tombstones = Tombstones::default();
        let patterns = live_or_tombstoned(pattern_ids, &snapshot.patterns, &mut tombstones.patterns);
        let symbols = live_or_tombstoned(symbol_keys, &snapshot.symbols, &mut tombstones.symbols);
        let preferences =
            live_or_tombstoned(preference_keys, &snapshot.preferences, &mut tombstones.preferences);
        let learned_contexts =
            live_or_tombstoned(context_ids, &snapshot.learned_contexts, &mut tombstones.learned_contexts);
        let documents = live_or_tombstoned(document_ids, &snapshot.documents, &mut tombstones.documents);
        let relationships =
            live_or_tombstoned(relationship_ids, &snapshot.relationships, &mut tombstones.relationships);

        Self {
            format: PAYLOAD_FORMAT.to_string(),
            version: PAYLOAD_VERSION,
            backup_id: pending.id,
            kind: BackupKind::Incremental,
            base_backup_id: pending.base_backup_id,
            created_at: pending.created_at,
            watermark: pending.watermark,
            patterns,
            symbols,
            preferences,
            learned_contexts,
            documents,
            relationships,
            change_log,
            tombstones,
        }
    }

    pub fn counts(&self) -> PayloadCounts {
        PayloadCounts {
            patterns: self.patterns.len(),
            symbols: self.symbols.len(),
            preferences: self.preferences.len(),
            change_log: self.change_log.len(),
            tombstones: self.tombstones.len(),
            learned_contexts: self.learned_contexts.len(),
            documents: self.documents.len(),
            relationships: self.relationships.len(),
        }
    }

    /// Check that the document is a backup and belongs to `record`.
    pub fn verify_header(&self, record: &BackupRecord) -> VaultResult<()> {
        if self.format != PAYLOAD_FORMAT || self.version != PAYLOAD_VERSION {
            return Err(VaultError::Integrity(format!(
                "backup {} has unsupported format {} v{}",
                record.id, self.format, self.version
            )));
        }
        if self.backup_id != record.id
            || self.kind != record.kind
            || self.base_backup_id != record.base_backup_id
        {
            return Err(VaultError::Integrity(format!(
                "backup {} payload does not match its record",
                record.id
            )));
        }
        Ok(())
    }
}

/// Copy the entities that still exist, tombstone the ones that vanished.
fn live_or_tombstoned<K: Ord, V: Clone>(
    ids: BTreeSet<K>,
    live: &BTreeMap<K, V>,
    tombstones: &mut Vec<K>,
) -> Vec<V> {
    let mut copied = Vec::new();
    for id in ids {
        match live.get(&id) {
            Some(value) => copied.push(value.clone()),
            None => tombstones.push(id),
        }
    }
    copied
}

/// Walk `base_backup_id` links from `target` back to the root full backup.
/// Returns the chain root-first. Every link must exist and still be valid.
pub fn resolve_chain(
    records: &HashMap<BackupId, BackupRecord>,
    target: BackupId,
) -> VaultResult<Vec<BackupRecord>> {
    let mut chain = Vec::new();
    let mut cursor = Some(target);

    while let Some(id) = cursor {
        if chain.len() > records.len() {
            return Err(VaultError::Integrity(format!(
                "backup chain of {} contains a cycle",
                target
            )));
        }

        let record = match records.get(&id) {
            Some(record) => record,
            None if id == target => {
                return Err(VaultError::NotFound(format!("backup {}", id)));
            }
            None => {
                return Err(VaultError::Integrity(format!(
                    "backup chain of {} is broken: base {} is missing",
                    target, id
                )));
            }
        };

        if !record.is_valid() {
            return Err(VaultError::Integrity(format!(
                "backup chain of {} is broken: {} has been pruned",
                target, id
            )));
        }

        cursor = match (record.kind, record.base_backup_id) {
            (BackupKind::Full, None) => None,
            (BackupKind::Incremental, Some(base)) => Some(base),
            (BackupKind::Full, Some(_)) | (BackupKind::Incremental, None) => {
                return Err(VaultError::Integrity(format!(
                    "backup {} has an inconsistent base link",
                    id
                )));
            }
        };
        chain.push(record.clone());
    }

    chain.reverse();
    Ok(chain)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub prune: Vec<BackupId>,
    /// Expired backups kept because a live incremental still depends on them.
    pub protected: Vec<BackupId>,
}

/// Decide which valid backups may be pruned at `now`.
pub fn plan_retention(records: &[BackupRecord], now: DateTime<Utc>) -> RetentionPlan {
    let by_id: HashMap<BackupId, &BackupRecord> = records
        .iter()
        .filter(|r| r.is_valid())
        .map(|r| (r.id, r))
        .collect();

    let mut needed = BTreeSet::new();
    for record in by_id.values() {
        if record.kind != BackupKind::Incremental || record.is_expired(now) {
            continue;
        }
        let mut cursor = record.base_backup_id;
        while let Some(id) = cursor {
            if !needed.insert(id) {
                break;
            }
            cursor = by_id.get(&id).and_then(|r| r.base_backup_id);
        }
    }

    let mut plan = RetentionPlan::default();
    let mut expired: Vec<_> = by_id.values().filter(|r| r.is_expired(now)).collect();
    expired.sort_by_key(|r| r.id);
    for record in expired {
        if needed.contains(&record.id) {
            plan.protected.push(record.id);
        } else {
            plan.prune.push(record.id);
        }
    }
    plan
}
