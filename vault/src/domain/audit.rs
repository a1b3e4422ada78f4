// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Change-log domain types.
//!
//! Entries are keyed by `(timestamp, id)` so a plain range scan yields them in
//! ascending timestamp order.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::VaultError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(pub u64);

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    Pattern,
    Symbol,
    UserPreference,
    LearnedContext,
    Document,
    PatternRelationship,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Pattern => "pattern",
            EntityType::Symbol => "symbol",
            EntityType::UserPreference => "user-preference",
            EntityType::LearnedContext => "learned-context",
            EntityType::Document => "document",
            EntityType::PatternRelationship => "pattern-relationship",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "pattern" => Ok(EntityType::Pattern),
            "symbol" => Ok(EntityType::Symbol),
            "user-preference" | "preference" => Ok(EntityType::UserPreference),
            "learned-context" | "context" => Ok(EntityType::LearnedContext),
            "document" => Ok(EntityType::Document),
            "pattern-relationship" | "relationship" => Ok(EntityType::PatternRelationship),
            other => Err(VaultError::Validation(format!("unknown entity type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: LogId,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: Operation,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub diff: serde_json::Value,
}

impl ChangeLogEntry {
    pub fn storage_key(&self) -> [u8; 16] {
        log_key(self.timestamp, self.id)
    }

    /// Key of the per-entity index that tracks the last recorded operation.
    pub fn entity_key(&self) -> String {
        entity_index_key(self.entity_type, &self.entity_id)
    }
}

pub(crate) fn log_key(timestamp: DateTime<Utc>, id: LogId) -> [u8; 16] {
    let micros = timestamp.timestamp_micros().max(0) as u64;
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&micros.to_be_bytes());
    key[8..].copy_from_slice(&id.0.to_be_bytes());
    key
}

pub(crate) fn entity_index_key(entity_type: EntityType, entity_id: &str) -> String {
    format!("{}:{}", entity_type, entity_id)
}

/// Filter for [`crate::infrastructure::AuditLog::query`]. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<EntityType>,
    pub entity_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity(entity_type: EntityType, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type),
            entity_id: Some(entity_id.into()),
            ..Default::default()
        }
    }

    pub fn of_type(mut self, entity_type: EntityType) -> Self {
        self.entity_type = Some(entity_type);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, entry: &ChangeLogEntry) -> bool {
        self.entity_type.map_or(true, |t| t == entry.entity_type)
            && self
                .entity_id
                .as_deref()
                .map_or(true, |id| id == entry.entity_id)
            && self.since.map_or(true, |s| entry.timestamp >= s)
            && self.until.map_or(true, |u| entry.timestamp <= u)
    }
}
