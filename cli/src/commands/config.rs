// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault::VaultConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Write the default configuration as YAML
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./cvault.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, force } => generate(output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. CVAULT_CONFIG_PATH: {}",
            std::env::var("CVAULT_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./cvault.yaml");
        println!("  4. ~/.cvault/config.yaml");
        println!("  5. /etc/cvault/config.yaml");
        match VaultConfig::discover_config() {
            Some(path) if config_override.is_none() => {
                println!("  {} {}", "Using:".bold(), path.display())
            }
            None if config_override.is_none() => {
                println!("  {} {}", "Using:".bold(), "built-in defaults".dimmed())
            }
            _ => {}
        }
        println!();
    }

    let config = VaultConfig::load_or_default(config_override)
        .context("Failed to load configuration")?;

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Storage:".bold());
    println!("  Data dir: {}", config.storage.data_dir.display());
    println!("  Backup dir: {}", config.storage.backup_dir.display());
    println!();

    println!("{}", "Backups:".bold());
    println!("  Scheduler: {}", if config.backup.enabled { "enabled" } else { "disabled" });
    println!("  Interval: {}s", config.backup.interval_seconds);
    println!("  Retention: {} days", config.backup.retention_days);
    println!("  Max chain depth: {}", config.backup.max_chain_depth);
    println!();

    let weights = config.scoring.weights;
    println!("{}", "Scoring weights:".bold());
    println!(
        "  latex {}  visual {}  context {}  frequency {}",
        weights.latex, weights.visual, weights.context, weights.frequency
    );
    println!();

    println!("{}", "Concurrency:".bold());
    println!("  Lock timeout: {:?}", config.concurrency.lock_timeout);
    println!("  Max retries: {}", config.concurrency.max_retries);
    println!("  Retry backoff: {:?}", config.concurrency.retry_backoff);

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = VaultConfig::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", output);
    }

    let yaml = VaultConfig::default().to_yaml_string()?;
    std::fs::write(&output, yaml)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
