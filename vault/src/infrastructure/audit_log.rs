// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Append-only change log.
//!
//! Entries live in the `change_log` tree keyed by `(timestamp, id)`; the
//! `audit_index` tree remembers the last operation per entity so that every
//! append can be checked against the entity's history inside the same
//! transaction that writes it.

use std::sync::Arc;

use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionalTree};
use sled::Transactional;
use tracing::debug;

use crate::domain::{
    abort, log_key, AuditFilter, ChangeLogEntry, EntityType, LogId, Operation, VaultError,
    VaultResult,
};
use super::store::{decode, Store};

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<Store>,
}

impl AuditLog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Append a standalone entry. Mutations made through the repositories
    /// record their entries themselves, atomically with the change.
    pub async fn append(
        &self,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        actor: &str,
        diff: serde_json::Value,
    ) -> VaultResult<LogId> {
        let _access = self.store.write().await?;
        let entry = Self::entry(&self.store, entity_type, entity_id, operation, actor, diff)?;
        let encoded = serde_json::to_vec(&entry)?;
        let trees = self.store.trees();
        (&trees.change_log, &trees.audit_index)
            .transaction(|(log, index)| Self::record(log, index, &entry, &encoded))?;
        Ok(entry.id)
    }

    /// Build the next entry. The caller must hold the store gate so the id is
    /// ordered consistently with backup watermarks.
    pub(crate) fn entry(
        store: &Store,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: Operation,
        actor: &str,
        diff: serde_json::Value,
    ) -> VaultResult<ChangeLogEntry> {
        Ok(ChangeLogEntry {
            id: LogId(store.generate_id()?),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            diff,
        })
    }

    /// Transactional half of an append: check the entity's history, write the
    /// entry and advance the index.
    pub(crate) fn record(
        log: &TransactionalTree,
        index: &TransactionalTree,
        entry: &ChangeLogEntry,
        encoded: &[u8],
    ) -> ConflictableTransactionResult<(), VaultError> {
        let entity_key = entry.entity_key();
        let last = match index.get(entity_key.as_bytes())? {
            Some(raw) => Some(match decode_operation(&raw) {
                Some(op) => op,
                None => return abort(VaultError::Integrity(format!("corrupt audit index for {}", entity_key))),
            }),
            None => None,
        };

        if let Err(reason) = check_transition(last, entry.operation) {
            return abort(VaultError::Integrity(format!(
                "{} {}: {}",
                entry.operation, entity_key, reason
            )));
        }

        log.insert(entry.storage_key().to_vec(), encoded)?;
        index.insert(entity_key.as_bytes(), encode_operation(entry.operation))?;
        Ok(())
    }

    /// Lazily scan entries matching `filter` in ascending timestamp order.
    /// Each call starts a fresh scan over the current contents.
    pub fn query(&self, filter: AuditFilter) -> impl Iterator<Item = VaultResult<ChangeLogEntry>> {
        let start = filter.since.map(|t| log_key(t, LogId(0))).unwrap_or([0u8; 16]);
        let end = filter
            .until
            .map(|t| log_key(t, LogId(u64::MAX)))
            .unwrap_or([0xff; 16]);

        let tree = &self.store.trees().change_log;
        let scan = if start <= end {
            tree.range(start..=end)
        } else {
            tree.range(end..end)
        };

        scan.values().filter_map(move |item| {
            let entry = item
                .map_err(VaultError::from)
                .and_then(|raw| decode::<ChangeLogEntry>(&raw));
            match entry {
                Ok(entry) if filter.matches(&entry) => Some(Ok(entry)),
                Ok(_) => None,
                Err(e) => Some(Err(e)),
            }
        })
    }

    pub fn history(&self, entity_type: EntityType, entity_id: &str) -> VaultResult<Vec<ChangeLogEntry>> {
        let entries: Vec<_> = self
            .query(AuditFilter::entity(entity_type, entity_id))
            .collect::<VaultResult<_>>()?;
        debug!(%entity_type, entity_id, count = entries.len(), "Loaded entity history");
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.store.trees().change_log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn encode_operation(operation: Operation) -> Vec<u8> {
    operation.to_string().into_bytes()
}

fn decode_operation(raw: &[u8]) -> Option<Operation> {
    match raw {
        b"create" => Some(Operation::Create),
        b"update" => Some(Operation::Update),
        b"delete" => Some(Operation::Delete),
        _ => None,
    }
}

/// Natural-keyed entities (symbols, preferences) may be created again after a
/// delete; pattern ids are never reused so the case does not arise for them.
fn check_transition(last: Option<Operation>, next: Operation) -> Result<(), &'static str> {
    match (last, next) {
        (None, Operation::Create) | (Some(Operation::Delete), Operation::Create) => Ok(()),
        (Some(_), Operation::Create) => Err("entity already exists"),
        (None, _) => Err("no prior create recorded"),
        (Some(Operation::Delete), _) => Err("entity was deleted"),
        (Some(_), _) => Ok(()),
    }
}
