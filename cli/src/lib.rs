// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Corpus Vault CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Maps `cvault` subcommands onto the vault services and
//!   failure categories onto process exit codes

pub mod commands;
pub mod embedded;

use corpus_vault::VaultError;

/// Exit code for a failed command.
///
/// The first [`VaultError`] found in the error chain decides; anything else
/// exits with 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<VaultError>())
        .map(VaultError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_follows_vault_error_through_context() {
        let err = Err::<(), _>(VaultError::Integrity("checksum mismatch".into()))
            .context("Failed to restore backup 7")
            .unwrap_err();
        assert_eq!(exit_code(&err), 4);

        let err = Err::<(), _>(VaultError::NotFound("pattern 9".into()))
            .context("inner")
            .context("outer")
            .unwrap_err();
        assert_eq!(exit_code(&err), 3);
    }

    #[test]
    fn test_exit_code_defaults_to_one() {
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }
}
