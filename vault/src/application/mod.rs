// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backup_manager;
pub mod backup_scheduler;
pub mod document_registry;
pub mod symbol_dictionary;

pub use backup_manager::{BackupManager, CycleReport, PruneReport, RestoreReport};
pub use backup_scheduler::BackupScheduler;
pub use document_registry::DocumentRegistry;
pub use symbol_dictionary::SymbolDictionary;
