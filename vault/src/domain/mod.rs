// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: entities, value objects and pure policies of the vault.

pub mod audit;
pub mod backup;
pub mod corpus;
pub mod error;
pub mod pattern;
pub mod scoring;
pub mod symbol;
pub mod vault_config;

pub use audit::*;
pub use backup::*;
pub use corpus::*;
pub use error::*;
pub use pattern::*;
pub use scoring::*;
pub use symbol::*;
pub use vault_config::*;
