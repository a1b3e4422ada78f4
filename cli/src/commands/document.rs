// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Analyzed document registry
//!
//! Commands: register, count, show, list

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use corpus_vault::{Discipline, DocumentId, VaultError};

use crate::embedded::EmbeddedVault;

#[derive(Subcommand)]
pub enum DocumentCommand {
    /// Register a document before analysis (skipped if its content is known)
    Register {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// e.g. textbook, exam, lecture-notes
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        document_type: Option<String>,

        #[arg(short, long)]
        discipline: Option<Discipline>,
    },

    /// Record how many patterns were extracted from a document
    Count { id: DocumentId, patterns: u64 },

    /// Show one document
    Show {
        id: DocumentId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered documents
    List,
}

pub async fn handle_command(command: DocumentCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;

    let result = match command {
        DocumentCommand::Register {
            file,
            document_type,
            discipline,
        } => register(&vault, &file, document_type.as_deref(), discipline).await,
        DocumentCommand::Count { id, patterns } => count(&vault, id, patterns).await,
        DocumentCommand::Show { id, json } => show(&vault, id, json).await,
        DocumentCommand::List => list(&vault).await,
    };

    vault.close()?;
    result
}

async fn register(
    vault: &EmbeddedVault,
    file: &Path,
    document_type: Option<&str>,
    discipline: Option<Discipline>,
) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read document {:?}", file))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let registered = vault
        .documents()
        .register_document(&filename, &content, document_type, discipline)
        .await
        .with_context(|| format!("Failed to register document {:?}", file))?;

    match registered {
        Some(document) => println!(
            "{}",
            format!("✓ Document {} registered ({})", document.id, document.file_hash).green()
        ),
        None => println!("{}", format!("{} was already analyzed", filename).yellow()),
    }
    Ok(())
}

async fn count(vault: &EmbeddedVault, id: DocumentId, patterns: u64) -> Result<()> {
    vault
        .documents()
        .update_document_patterns_count(id, patterns)
        .await
        .with_context(|| format!("Failed to update document {}", id))?;

    println!(
        "{}",
        format!("✓ Document {} now lists {} pattern(s)", id, patterns).green()
    );
    Ok(())
}

async fn show(vault: &EmbeddedVault, id: DocumentId, json: bool) -> Result<()> {
    let document = vault
        .documents()
        .get_document(id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("document {}", id)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("{}", format!("Document {}", document.id).bold());
    println!("  File: {}", document.filename);
    println!("  SHA-256: {}", document.file_hash);
    if let Some(document_type) = &document.document_type {
        println!("  Type: {}", document_type);
    }
    if let Some(discipline) = document.discipline {
        println!("  Discipline: {}", discipline);
    }
    println!("  Patterns extracted: {}", document.patterns_extracted);
    println!("  Analyzed: {}", document.analyzed_at.to_rfc3339());
    Ok(())
}

async fn list(vault: &EmbeddedVault) -> Result<()> {
    let documents = vault.documents().list_documents().await?;

    if documents.is_empty() {
        println!("{}", "No documents registered".yellow());
        return Ok(());
    }

    for document in &documents {
        println!(
            "  {:>6}  {:<32} {:>4} pattern(s)  {}",
            document.id.to_string().cyan(),
            document.filename,
            document.patterns_extracted,
            document.analyzed_at.format("%Y-%m-%d").to_string().dimmed()
        );
    }
    println!("{}", format!("{} document(s)", documents.len()).dimmed());
    Ok(())
}
