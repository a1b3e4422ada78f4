// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod audit_log;
pub mod backup_storage;
pub mod repository;
pub mod store;

pub use audit_log::AuditLog;
pub use backup_storage::{checksum, BackupStorage, StoredPayload};
pub use repository::{
    PatternRepository, ScoredPattern, SimilarityQuery, SledPatternRepository, VaultStatistics,
    DEFAULT_ACTOR,
};
pub use store::{Collection, ContentionPolicy, ExclusiveAccess, ReadAccess, Store, WriteAccess};

pub(crate) use store::{scan_tree, RESTORE_MARKER};
