// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Vault Errors
//!
//! Single error taxonomy shared by every layer of the vault. Each variant maps
//! to one failure category of the automation surface (see [`VaultError::exit_code`]).
//!
//! | Variant | Retried | Typical source |
//! |---------|---------|----------------|
//! | `Validation` | never | missing discipline / pattern type, bad config |
//! | `NotFound` | never | unknown pattern, symbol or backup id |
//! | `Integrity` | never | checksum mismatch, broken chain, audit inconsistency |
//! | `Concurrency` | bounded, with backoff | lock acquisition timeout |
//! | `Storage` | never inside a call | sled / filesystem / serialization failure |
//! | `Cancelled` | never | restore cancelled before the swap |

use sled::transaction::{ConflictableTransactionError, TransactionError};

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Concurrency error: {0}")]
    Concurrency(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl VaultError {
    /// Process exit code used by the `cvault` binary for this failure category.
    pub fn exit_code(&self) -> i32 {
        match self {
            VaultError::Validation(_) => 2,
            VaultError::NotFound(_) => 3,
            VaultError::Integrity(_) => 4,
            VaultError::Storage(_) => 5,
            VaultError::Concurrency(_) => 6,
            VaultError::Cancelled(_) => 1,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::Concurrency(_))
    }
}

impl From<sled::Error> for VaultError {
    fn from(err: sled::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Storage(format!("serialization failed: {}", err))
    }
}

impl From<TransactionError<VaultError>> for VaultError {
    fn from(err: TransactionError<VaultError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(e) => VaultError::Storage(e.to_string()),
        }
    }
}

/// Abort a sled transaction with a vault error.
pub(crate) fn abort<T>(err: VaultError) -> Result<T, ConflictableTransactionError<VaultError>> {
    Err(ConflictableTransactionError::Abort(err))
}
