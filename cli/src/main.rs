// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Corpus Vault CLI
//!
//! The `cvault` binary operates the pattern store in-process: every command
//! opens the configured store, runs, and flushes it on the way out.
//!
//! ## Commands
//!
//! - `cvault backup create|restore|list|prune` - Backup chain management
//! - `cvault pattern add|search|show|reinforce|list|delete|learn|contexts|relate|related` - Pattern catalogue
//! - `cvault document register|count|show|list` - Analyzed documents
//! - `cvault symbol add|rule|prefer|unprefer|pronounce|list|preferences|delete` - Symbol dictionary
//! - `cvault audit` - Change log inspection
//! - `cvault stats` - Aggregate statistics
//! - `cvault daemon` - Run the backup scheduler in the foreground
//! - `cvault config show|validate|generate` - Configuration management
//!
//! ## Exit codes
//!
//! 0 success, 2 validation, 3 not found, 4 integrity, 5 storage,
//! 6 concurrency, 1 anything else.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault_cli::commands::{
    self, AuditCommand, BackupCommand, ConfigCommand, DocumentCommand, PatternCommand, StatsCommand,
    SymbolCommand,
};

/// Corpus Vault - auditable multidisciplinary pattern store
#[derive(Parser)]
#[command(name = "cvault")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CVAULT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "CVAULT_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, restore, list and prune backups
    #[command(name = "backup")]
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Manage the pattern catalogue
    #[command(name = "pattern")]
    Pattern {
        #[command(subcommand)]
        command: PatternCommand,
    },

    /// Manage symbols and pronunciations
    #[command(name = "symbol")]
    Symbol {
        #[command(subcommand)]
        command: SymbolCommand,
    },

    /// Register analyzed documents
    #[command(name = "document")]
    Document {
        #[command(subcommand)]
        command: DocumentCommand,
    },

    /// Query the change log
    #[command(name = "audit")]
    Audit {
        #[command(flatten)]
        command: AuditCommand,
    },

    /// Show vault statistics
    #[command(name = "stats")]
    Stats {
        #[command(flatten)]
        command: StatsCommand,
    },

    /// Run scheduled backups until Ctrl-C
    #[command(name = "daemon")]
    Daemon,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.log_level) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(corpus_vault_cli::exit_code(&e));
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Backup { command }) => {
            commands::backup::handle_command(command, cli.config).await
        }
        Some(Commands::Pattern { command }) => {
            commands::pattern::handle_command(command, cli.config).await
        }
        Some(Commands::Symbol { command }) => {
            commands::symbol::handle_command(command, cli.config).await
        }
        Some(Commands::Document { command }) => {
            commands::document::handle_command(command, cli.config).await
        }
        Some(Commands::Audit { command }) => commands::audit::execute(command, cli.config).await,
        Some(Commands::Stats { command }) => commands::stats::execute(command, cli.config).await,
        Some(Commands::Daemon) => commands::daemon::run(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_search_arguments_parse() {
        let cli = Cli::try_parse_from([
            "cvault",
            "pattern",
            "search",
            "--latex",
            "\\int_0^1 g(x) dx",
            "--discipline",
            "computer_science",
            "--limit",
            "3",
            "--context",
            "area,curva",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Pattern { .. })));
    }

    #[test]
    fn test_relate_requires_known_relationship_type() {
        let cli = Cli::try_parse_from([
            "cvault", "pattern", "relate", "4", "9", "--type", "simplification", "--score", "0.8",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Pattern { .. })));
        assert!(Cli::try_parse_from([
            "cvault", "pattern", "relate", "4", "9", "--type", "synonym", "--score", "0.8",
        ])
        .is_err());
    }

    #[test]
    fn test_unknown_backup_kind_is_rejected() {
        assert!(Cli::try_parse_from(["cvault", "backup", "create", "differential"]).is_err());
    }
}
