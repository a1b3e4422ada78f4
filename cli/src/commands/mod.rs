// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the cvault CLI

pub mod audit;
pub mod backup;
pub mod config;
pub mod daemon;
pub mod document;
pub mod pattern;
pub mod stats;
pub mod symbol;

pub use self::audit::AuditCommand;
pub use self::backup::BackupCommand;
pub use self::config::ConfigCommand;
pub use self::document::DocumentCommand;
pub use self::pattern::PatternCommand;
pub use self::stats::StatsCommand;
pub use self::symbol::SymbolCommand;
