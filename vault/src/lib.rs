// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Corpus Vault
//!
//! Persistent, auditable catalogue of multidisciplinary content patterns
//! (formulas, reactions, units, notations) with similarity recognition and a
//! checksummed backup chain.
//!
//! # Architecture
//!
//! - **Layer:** Knowledge Base Layer
//! - **Purpose:** One embedded `sled` store shared in-process as `Arc<Store>`;
//!   repositories and services are thin handles over it
//!
//! ```text
//! Store ─┬─ AuditLog
//!        ├─ SledPatternRepository (MatchScorer)
//!        ├─ SymbolDictionary
//!        ├─ DocumentRegistry
//!        └─ BackupManager ── BackupStorage ── BackupScheduler
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;
