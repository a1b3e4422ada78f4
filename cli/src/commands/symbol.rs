// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Symbol dictionary commands
//!
//! Commands: add, rule, prefer, unprefer, pronounce, list, preferences, delete

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use corpus_vault::{ContextRule, Discipline, NewSymbol, PronunciationSource};

use crate::embedded::EmbeddedVault;

#[derive(Subcommand)]
pub enum SymbolCommand {
    /// Define a symbol and its default reading
    Add {
        symbol: String,

        #[arg(short, long)]
        discipline: Discipline,

        /// Default pronunciation
        #[arg(short, long)]
        pronunciation: String,

        #[arg(long)]
        category: Option<String>,

        /// LaTeX command producing the symbol
        #[arg(long)]
        latex: Option<String>,
    },

    /// Append a context rule to a symbol
    Rule {
        symbol: String,

        #[arg(short, long)]
        discipline: Discipline,

        /// Substring of the surrounding context that triggers the rule
        #[arg(long)]
        pattern: String,

        #[arg(short, long)]
        pronunciation: String,
    },

    /// Set a student's preferred reading
    Prefer {
        student: String,
        symbol: String,
        pronunciation: String,

        /// Restrict the preference to one context
        #[arg(long)]
        context: Option<String>,
    },

    /// Remove a student's preferred reading
    Unprefer {
        student: String,
        symbol: String,

        #[arg(long)]
        context: Option<String>,
    },

    /// Resolve how a symbol is read aloud
    Pronounce {
        symbol: String,

        #[arg(short, long)]
        discipline: Discipline,

        #[arg(long)]
        student: Option<String>,

        #[arg(long)]
        context: Option<String>,

        /// Count this reading as one use of the symbol
        #[arg(long)]
        record: bool,
    },

    /// List symbols
    List {
        #[arg(short, long)]
        discipline: Option<Discipline>,
    },

    /// List a student's preferences
    Preferences { student: String },

    /// Delete a symbol
    Delete {
        symbol: String,

        #[arg(short, long)]
        discipline: Discipline,
    },
}

pub async fn handle_command(command: SymbolCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;
    let result = run(&vault, command).await;
    vault.close()?;
    result
}

async fn run(vault: &EmbeddedVault, command: SymbolCommand) -> Result<()> {
    let symbols = vault.symbols();

    match command {
        SymbolCommand::Add {
            symbol,
            discipline,
            pronunciation,
            category,
            latex,
        } => {
            let mut candidate = NewSymbol::new(symbol, discipline, pronunciation);
            candidate.category = category;
            candidate.latex_code = latex;
            let added = symbols
                .add_symbol(candidate)
                .await
                .context("Failed to add symbol")?;
            println!("{}", format!("✓ Symbol {} added", added.key()).green());
        }
        SymbolCommand::Rule {
            symbol,
            discipline,
            pattern,
            pronunciation,
        } => {
            let updated = symbols
                .add_context_rule(discipline, &symbol, ContextRule::new(pattern, pronunciation))
                .await
                .with_context(|| format!("Failed to add rule to {}", symbol))?;
            println!(
                "{}",
                format!(
                    "✓ Symbol {} now has {} context rule(s)",
                    updated.key(),
                    updated.context_rules.len()
                )
                .green()
            );
        }
        SymbolCommand::Prefer {
            student,
            symbol,
            pronunciation,
            context,
        } => {
            symbols
                .set_user_preference(&student, &symbol, &pronunciation, context.as_deref())
                .await
                .context("Failed to store preference")?;
            println!(
                "{}",
                format!("✓ {} reads {} as \"{}\"", student, symbol, pronunciation).green()
            );
        }
        SymbolCommand::Unprefer {
            student,
            symbol,
            context,
        } => {
            symbols
                .remove_user_preference(&student, &symbol, context.as_deref())
                .await
                .context("Failed to remove preference")?;
            println!("{}", format!("✓ Preference of {} for {} removed", student, symbol).green());
        }
        SymbolCommand::Pronounce {
            symbol,
            discipline,
            student,
            context,
            record,
        } => {
            let reading = symbols
                .pronounce(discipline, &symbol, student.as_deref(), context.as_deref())
                .await?;
            if record {
                symbols.record_usage(discipline, &symbol).await?;
            }
            let source = match reading.source {
                PronunciationSource::StudentPreference => "student preference",
                PronunciationSource::ContextRule => "context rule",
                PronunciationSource::Default => "default",
            };
            println!("{} {}", reading.text.bold(), format!("({})", source).dimmed());
        }
        SymbolCommand::List { discipline } => {
            let list = symbols.list_symbols(discipline).await?;
            if list.is_empty() {
                println!("{}", "No symbols defined".yellow());
                return Ok(());
            }
            for symbol in &list {
                println!(
                    "  {:<8} {:<18} {:<30} rules: {}  uses: {}",
                    symbol.symbol.cyan(),
                    symbol.discipline.to_string(),
                    symbol.default_pronunciation,
                    symbol.context_rules.len(),
                    symbol.usage_count
                );
            }
        }
        SymbolCommand::Preferences { student } => {
            let preferences = symbols.preferences_for(&student).await?;
            if preferences.is_empty() {
                println!("{}", format!("No preferences for {}", student).yellow());
                return Ok(());
            }
            for pref in &preferences {
                let context = if pref.context.is_empty() {
                    "(any context)".dimmed().to_string()
                } else {
                    pref.context.clone()
                };
                println!("  {:<8} {:<30} {}", pref.symbol.cyan(), pref.pronunciation, context);
            }
        }
        SymbolCommand::Delete { symbol, discipline } => {
            let removed = symbols
                .delete_symbol(discipline, &symbol)
                .await
                .with_context(|| format!("Failed to delete symbol {}", symbol))?;
            println!("{}", format!("✓ Symbol {} deleted", removed.key()).green());
        }
    }

    Ok(())
}
