// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Embedded Store
//!
//! Durable storage for every vault collection, backed by a single `sled`
//! database with one tree per logical collection:
//!
//! | Tree | Key | Value |
//! |------|-----|-------|
//! | `patterns` | pattern id (u64 BE) | `Pattern` JSON |
//! | `symbols` | `discipline/symbol` | `Symbol` JSON |
//! | `preferences` | `["student","symbol","context"]` | `UserPreference` JSON |
//! | `learned_contexts` | context id (u64 BE) | `LearnedContext` JSON |
//! | `documents` | file hash (hex) | `AnalyzedDocument` JSON |
//! | `relationships` | relationship id (u64 BE) | `PatternRelationship` JSON |
//! | `change_log` | timestamp µs BE ++ log id BE | `ChangeLogEntry` JSON |
//! | `audit_index` | `entity-type:entity-id` | last recorded operation |
//! | `backups` | backup id (u64 BE) | `BackupRecord` JSON |
//! | `backup_meta` | name | scheduler bookkeeping |
//!
//! ## Locking
//!
//! A store-wide gate (`tokio::sync::RwLock`) separates ordinary traffic from
//! snapshot/restore. Reads and writes share the gate; writes additionally take
//! a per-entity mutex so increments on one pattern are serialized while
//! distinct patterns proceed independently. An entity's mutex is evicted as
//! soon as nobody holds or awaits it. Snapshot and swap take the gate
//! exclusively. Every acquisition is bounded by the configured lock timeout
//! and retried with exponential backoff before surfacing as
//! [`VaultError::Concurrency`].
//!
//! The handle is opened once at startup and shared as `Arc<Store>`.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::domain::{
    entity_index_key, AnalyzedDocument, ChangeLogEntry, ConcurrencyConfig, LearnedContext, Pattern,
    PatternRelationship, StoreSnapshot, Symbol, UserPreference, VaultError, VaultResult,
};
use super::audit_log::{encode_operation, AuditLog};

/// Content collections that are mutated together with the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Patterns,
    Symbols,
    Preferences,
    LearnedContexts,
    Documents,
    Relationships,
}

/// `backup_meta` key holding the id reserved by the last restore.
pub(crate) const RESTORE_MARKER: &[u8] = b"restore_marker";

#[derive(Clone)]
pub(crate) struct Trees {
    pub patterns: sled::Tree,
    pub symbols: sled::Tree,
    pub preferences: sled::Tree,
    pub learned_contexts: sled::Tree,
    pub documents: sled::Tree,
    pub relationships: sled::Tree,
    pub change_log: sled::Tree,
    pub audit_index: sled::Tree,
    pub backups: sled::Tree,
    pub backup_meta: sled::Tree,
}

impl Trees {
    fn open(db: &sled::Db) -> VaultResult<Self> {
        Ok(Self {
            patterns: db.open_tree("patterns")?,
            symbols: db.open_tree("symbols")?,
            preferences: db.open_tree("preferences")?,
            learned_contexts: db.open_tree("learned_contexts")?,
            documents: db.open_tree("documents")?,
            relationships: db.open_tree("relationships")?,
            change_log: db.open_tree("change_log")?,
            audit_index: db.open_tree("audit_index")?,
            backups: db.open_tree("backups")?,
            backup_meta: db.open_tree("backup_meta")?,
        })
    }

    pub fn collection(&self, collection: Collection) -> &sled::Tree {
        match collection {
            Collection::Patterns => &self.patterns,
            Collection::Symbols => &self.symbols,
            Collection::Preferences => &self.preferences,
            Collection::LearnedContexts => &self.learned_contexts,
            Collection::Documents => &self.documents,
            Collection::Relationships => &self.relationships,
        }
    }
}

/// Bounded lock acquisition with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct ContentionPolicy {
    pub lock_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        ConcurrencyConfig::default().into()
    }
}

impl From<ConcurrencyConfig> for ContentionPolicy {
    fn from(config: ConcurrencyConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout,
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff,
        }
    }
}

impl ContentionPolicy {
    pub async fn acquire<F, Fut, G>(&self, what: &str, mut attempt: F) -> VaultResult<G>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = G>,
    {
        let mut backoff = self.retry_backoff;
        for round in 0..=self.max_retries {
            match tokio::time::timeout(self.lock_timeout, attempt()).await {
                Ok(guard) => return Ok(guard),
                Err(_) if round < self.max_retries => {
                    debug!(lock = what, round, "Lock acquisition timed out, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(_) => break,
            }
        }
        warn!(lock = what, retries = self.max_retries, "Giving up on lock acquisition");
        Err(VaultError::Concurrency(format!(
            "timed out acquiring {} lock after {} attempts",
            what,
            self.max_retries + 1
        )))
    }
}

pub struct Store {
    db: sled::Db,
    trees: Trees,
    path: Option<PathBuf>,
    gate: RwLock<()>,
    entity_locks: DashMap<String, Arc<Mutex<()>>>,
    contention: ContentionPolicy,
}

/// Shared access for reads.
pub struct ReadAccess<'a> {
    _gate: RwLockReadGuard<'a, ()>,
}

/// Shared gate plus, for existing entities, the entity's own mutex.
pub struct WriteAccess<'a> {
    store: &'a Store,
    entity: Option<(String, OwnedMutexGuard<()>)>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl Drop for WriteAccess<'_> {
    fn drop(&mut self) {
        if let Some((key, guard)) = self.entity.take() {
            drop(guard);
            self.store.release_entity(&key);
        }
    }
}

/// Store-wide exclusive access for snapshot and swap.
pub struct ExclusiveAccess<'a> {
    store: &'a Store,
    _gate: RwLockWriteGuard<'a, ()>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>, contention: ContentionPolicy) -> VaultResult<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| {
            VaultError::Storage(format!("Failed to create data directory {}: {}", path.display(), e))
        })?;
        let db = sled::open(&path)?;
        info!(path = %path.display(), "Opened vault store");
        Self::from_db(db, Some(path), contention)
    }

    /// Throwaway store, removed when dropped.
    pub fn temporary() -> VaultResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, None, ContentionPolicy::default())
    }

    fn from_db(db: sled::Db, path: Option<PathBuf>, contention: ContentionPolicy) -> VaultResult<Self> {
        let trees = Trees::open(&db)?;
        Ok(Self {
            db,
            trees,
            path,
            gate: RwLock::new(()),
            entity_locks: DashMap::new(),
            contention,
        })
    }

    pub fn with_contention(mut self, contention: ContentionPolicy) -> Self {
        self.contention = contention;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contention(&self) -> ContentionPolicy {
        self.contention
    }

    /// Flush everything to disk. Call once at shutdown.
    pub fn close(&self) -> VaultResult<()> {
        let bytes = self.db.flush()?;
        debug!(bytes, "Flushed vault store");
        Ok(())
    }

    pub(crate) fn trees(&self) -> &Trees {
        &self.trees
    }

    /// Monotonic id shared by patterns, log entries and backups. Never reused.
    pub(crate) fn generate_id(&self) -> VaultResult<u64> {
        Ok(self.db.generate_id()?)
    }

    pub async fn read(&self) -> VaultResult<ReadAccess<'_>> {
        let gate = self.contention.acquire("store (shared)", || self.gate.read()).await?;
        Ok(ReadAccess { _gate: gate })
    }

    /// Shared gate only; for writes that create a brand-new entity.
    pub async fn write(&self) -> VaultResult<WriteAccess<'_>> {
        let gate = self.contention.acquire("store (shared)", || self.gate.read()).await?;
        Ok(WriteAccess {
            store: self,
            entity: None,
            _gate: gate,
        })
    }

    /// Shared gate plus the exclusive per-entity lock.
    pub async fn write_entity(&self, entity_key: &str) -> VaultResult<WriteAccess<'_>> {
        let gate = self.contention.acquire("store (shared)", || self.gate.read()).await?;
        let lock = self
            .entity_locks
            .entry(entity_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let entity = self
            .contention
            .acquire(entity_key, || lock.clone().lock_owned())
            .await;
        drop(lock);
        match entity {
            Ok(entity) => Ok(WriteAccess {
                store: self,
                entity: Some((entity_key.to_string(), entity)),
                _gate: gate,
            }),
            Err(e) => {
                self.release_entity(entity_key);
                Err(e)
            }
        }
    }

    /// Evict an entity's mutex once the table holds the only reference.
    fn release_entity(&self, entity_key: &str) {
        self.entity_locks
            .remove_if(entity_key, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn entity_lock_count(&self) -> usize {
        self.entity_locks.len()
    }

    pub async fn exclusive(&self) -> VaultResult<ExclusiveAccess<'_>> {
        let gate = self.contention.acquire("store (exclusive)", || self.gate.write()).await?;
        Ok(ExclusiveAccess {
            store: self,
            _gate: gate,
        })
    }

    /// Apply a mutation to `collection` and append `entry` to the change log
    /// in one transaction. Either both land or neither does.
    pub(crate) fn commit<T, F>(&self, collection: Collection, entry: &ChangeLogEntry, apply: F) -> VaultResult<T>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, VaultError>,
    {
        let encoded = serde_json::to_vec(entry)?;
        let data = self.trees.collection(collection);
        let value = (data, &self.trees.change_log, &self.trees.audit_index).transaction(
            |(data, log, index)| {
                let value = apply(data)?;
                AuditLog::record(log, index, entry, &encoded)?;
                Ok(value)
            },
        )?;
        Ok(value)
    }

    pub(crate) fn get<T: DeserializeOwned>(&self, collection: Collection, key: &[u8]) -> VaultResult<Option<T>> {
        match self.trees.collection(collection).get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn scan<T: DeserializeOwned>(&self, collection: Collection) -> VaultResult<Vec<T>> {
        scan_tree(self.trees.collection(collection))
    }

    pub(crate) fn count(&self, collection: Collection) -> usize {
        self.trees.collection(collection).len()
    }

    fn load_snapshot(&self) -> VaultResult<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::default();
        for pattern in scan_tree::<Pattern>(&self.trees.patterns)? {
            snapshot.patterns.insert(pattern.id, pattern);
        }
        for symbol in scan_tree::<Symbol>(&self.trees.symbols)? {
            snapshot.symbols.insert(symbol.key(), symbol);
        }
        for pref in scan_tree::<UserPreference>(&self.trees.preferences)? {
            snapshot.preferences.insert(pref.key(), pref);
        }
        for context in scan_tree::<LearnedContext>(&self.trees.learned_contexts)? {
            snapshot.learned_contexts.insert(context.id, context);
        }
        for document in scan_tree::<AnalyzedDocument>(&self.trees.documents)? {
            snapshot.documents.insert(document.id, document);
        }
        for link in scan_tree::<PatternRelationship>(&self.trees.relationships)? {
            snapshot.relationships.insert(link.id, link);
        }
        snapshot.change_log = scan_tree(&self.trees.change_log)?;
        Ok(snapshot)
    }
}

impl ExclusiveAccess<'_> {
    /// Consistent in-memory copy of every content collection.
    pub fn snapshot(&self) -> VaultResult<StoreSnapshot> {
        self.store.load_snapshot()
    }

    pub fn reserve_id(&self) -> VaultResult<u64> {
        self.store.generate_id()
    }

    /// Atomically replace every content collection and the change log with
    /// `snapshot`, recording a freshly reserved restore marker in the same
    /// transaction. Nothing is touched if any step fails. Returns the marker.
    pub fn replace(&self, snapshot: &StoreSnapshot) -> VaultResult<u64> {
        let trees = &self.store.trees;
        let marker = self.reserve_id()?;

        let fresh = [
            encode_all(snapshot.patterns.values().map(|p| (p.id.to_key().to_vec(), p)))?,
            encode_all(snapshot.symbols.iter().map(|(k, s)| (k.as_bytes().to_vec(), s)))?,
            encode_all(snapshot.preferences.iter().map(|(k, p)| (k.as_bytes().to_vec(), p)))?,
            encode_all(snapshot.learned_contexts.values().map(|c| (c.id.to_key().to_vec(), c)))?,
            encode_all(snapshot.documents.values().map(|d| (d.file_hash.as_bytes().to_vec(), d)))?,
            encode_all(snapshot.relationships.values().map(|r| (r.id.to_key().to_vec(), r)))?,
            encode_all(snapshot.change_log.iter().map(|e| (e.storage_key().to_vec(), e)))?,
            snapshot
                .change_log
                .iter()
                .map(|e| {
                    (
                        entity_index_key(e.entity_type, &e.entity_id).into_bytes(),
                        encode_operation(e.operation),
                    )
                })
                .collect(),
        ];
        let targets = [
            &trees.patterns,
            &trees.symbols,
            &trees.preferences,
            &trees.learned_contexts,
            &trees.documents,
            &trees.relationships,
            &trees.change_log,
            &trees.audit_index,
        ];
        let stale = targets
            .iter()
            .map(|tree| existing_keys(tree))
            .collect::<VaultResult<Vec<_>>>()?;

        // backup_meta rides along last; only the marker is written there.
        let mut participants = targets.to_vec();
        participants.push(&trees.backup_meta);

        participants[..].transaction(|views| {
            let (meta, swapped) = views.split_last().ok_or_else(|| {
                ConflictableTransactionError::Abort(VaultError::Storage(
                    "restore transaction has no trees".to_string(),
                ))
            })?;
            for ((tree, stale), fresh) in swapped.iter().zip(&stale).zip(&fresh) {
                let keep: HashSet<&[u8]> = fresh.iter().map(|(k, _)| k.as_slice()).collect();
                for key in stale.iter().filter(|k| !keep.contains(k.as_slice())) {
                    tree.remove(key.as_slice())?;
                }
                for (key, value) in fresh.iter() {
                    tree.insert(key.as_slice(), value.as_slice())?;
                }
            }
            meta.insert(RESTORE_MARKER, marker.to_be_bytes().to_vec())?;
            Ok::<_, ConflictableTransactionError<VaultError>>(())
        })?;

        self.store.db.flush()?;
        self.store.entity_locks.clear();
        Ok(marker)
    }
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> VaultResult<T> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn scan_tree<T: DeserializeOwned>(tree: &sled::Tree) -> VaultResult<Vec<T>> {
    tree.iter()
        .values()
        .map(|value| -> VaultResult<T> { decode(&value?) })
        .collect()
}

fn existing_keys(tree: &sled::Tree) -> VaultResult<Vec<Vec<u8>>> {
    tree.iter()
        .keys()
        .map(|key| -> VaultResult<Vec<u8>> { Ok(key?.to_vec()) })
        .collect()
}

fn encode_all<'a, T, I>(items: I) -> VaultResult<Vec<(Vec<u8>, Vec<u8>)>>
where
    T: Serialize + 'a,
    I: Iterator<Item = (Vec<u8>, &'a T)>,
{
    items
        .map(|(key, item)| -> VaultResult<(Vec<u8>, Vec<u8>)> { Ok((key, serde_json::to_vec(item)?)) })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Discipline, EntityType, LogId, NewPattern, Operation, Pattern, PatternId};
    use chrono::Utc;

    fn entry(store: &Store, pattern: PatternId, operation: Operation) -> ChangeLogEntry {
        ChangeLogEntry {
            id: LogId(store.generate_id().unwrap()),
            entity_type: EntityType::Pattern,
            entity_id: pattern.to_string(),
            operation,
            timestamp: Utc::now(),
            actor: "test".into(),
            diff: serde_json::Value::Null,
        }
    }

    fn insert_pattern(store: &Store) -> Pattern {
        let id = PatternId(store.generate_id().unwrap());
        let pattern = NewPattern::new(Discipline::Mathematics, "formula")
            .with_latex("x^2")
            .into_pattern(id, Utc::now())
            .unwrap();
        let bytes = serde_json::to_vec(&pattern).unwrap();
        store
            .commit(Collection::Patterns, &entry(store, id, Operation::Create), |tree| {
                tree.insert(id.to_key().to_vec(), bytes.as_slice())?;
                Ok(())
            })
            .unwrap();
        pattern
    }

    #[tokio::test]
    async fn test_commit_writes_entity_and_log_together() {
        let store = Store::temporary().unwrap();
        let pattern = insert_pattern(&store);

        let loaded: Pattern = store
            .get(Collection::Patterns, &pattern.id.to_key())
            .unwrap()
            .unwrap();
        assert_eq!(loaded, pattern);
        assert_eq!(store.trees().change_log.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_audit_check_rolls_back_mutation() {
        let store = Store::temporary().unwrap();
        let ghost = PatternId(999);
        let result = store.commit(
            Collection::Patterns,
            &entry(&store, ghost, Operation::Update),
            |tree| {
                tree.insert(ghost.to_key().to_vec(), b"{}".as_slice())?;
                Ok(())
            },
        );
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, VaultError::Integrity(_)));
        assert!(store.trees().patterns.is_empty());
        assert!(store.trees().change_log.is_empty());
    }

    #[tokio::test]
    async fn test_replace_swaps_in_snapshot() {
        let store = Store::temporary().unwrap();
        let first = insert_pattern(&store);

        let before = store.exclusive().await.unwrap().snapshot().unwrap();
        let second = insert_pattern(&store);
        assert_eq!(store.count(Collection::Patterns), 2);

        let marker = store.exclusive().await.unwrap().replace(&before).unwrap();

        let after = store.exclusive().await.unwrap().snapshot().unwrap();
        assert_eq!(after, before);
        assert!(after.patterns.contains_key(&first.id));
        assert!(!after.patterns.contains_key(&second.id));

        // The marker lands with the swap and postdates every earlier id.
        let recorded = store.trees().backup_meta.get(RESTORE_MARKER).unwrap().unwrap();
        assert_eq!(recorded.as_ref(), marker.to_be_bytes().as_slice());
        assert!(marker > second.id.0);
    }

    #[tokio::test]
    async fn test_entity_locks_are_evicted_after_release() {
        let store = Arc::new(Store::temporary().unwrap());
        for key in ["pattern:1", "pattern:2", "symbol:mathematics/∫"] {
            let _access = store.write_entity(key).await.unwrap();
            assert_eq!(store.entity_lock_count(), 1);
        }
        assert_eq!(store.entity_lock_count(), 0);

        let held = store.write_entity("pattern:7").await.unwrap();
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let _access = store.write_entity("pattern:7").await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        // The waiter still references the slot, so it survives the first release.
        waiter.await.unwrap();
        assert_eq!(store.entity_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_exclusive_times_out_as_concurrency_error() {
        let store = Store::temporary().unwrap().with_contention(ContentionPolicy {
            lock_timeout: Duration::from_millis(10),
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
        });
        let _held = store.write().await.unwrap();
        let err = store.exclusive().await.err().unwrap();
        assert!(matches!(err, VaultError::Concurrency(_)));
    }
}
