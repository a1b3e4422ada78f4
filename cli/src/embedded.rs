// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedded vault services
//!
//! Opens the store in-process and wires every service over one shared handle.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use corpus_vault::{
    AuditLog, BackupManager, ContentionPolicy, DocumentRegistry, MatchScorer, SledPatternRepository,
    Store, SymbolDictionary, VaultConfig,
};

pub struct EmbeddedVault {
    config: VaultConfig,
    store: Arc<Store>,
    patterns: SledPatternRepository,
    symbols: SymbolDictionary,
    documents: DocumentRegistry,
    audit: AuditLog,
}

impl EmbeddedVault {
    pub fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config =
            VaultConfig::load_or_default(config_path).context("Failed to load configuration")?;
        Self::from_config(config)
    }

    pub fn from_config(config: VaultConfig) -> Result<Self> {
        config
            .validate()
            .context("Configuration validation failed")?;

        let store = Arc::new(
            Store::open(
                &config.storage.data_dir,
                ContentionPolicy::from(config.concurrency.clone()),
            )
            .with_context(|| format!("Failed to open store at {:?}", config.storage.data_dir))?,
        );
        debug!(data_dir = ?config.storage.data_dir, "Store opened");

        let scorer = MatchScorer::new(config.scoring.weights)?;
        let actor = actor();

        Ok(Self {
            patterns: SledPatternRepository::new(store.clone(), scorer).with_actor(actor.clone()),
            symbols: SymbolDictionary::new(store.clone()).with_actor(actor.clone()),
            documents: DocumentRegistry::new(store.clone()).with_actor(actor),
            audit: AuditLog::new(store.clone()),
            store,
            config,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn patterns(&self) -> &SledPatternRepository {
        &self.patterns
    }

    pub fn symbols(&self) -> &SymbolDictionary {
        &self.symbols
    }

    pub fn documents(&self) -> &DocumentRegistry {
        &self.documents
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn backups(&self) -> Result<BackupManager> {
        BackupManager::from_config(self.store.clone(), &self.config).with_context(|| {
            format!(
                "Failed to open backup directory {:?}",
                self.config.storage.backup_dir
            )
        })
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<()> {
        self.store.close().context("Failed to flush store")
    }
}

/// Audit actor for mutations issued from the command line.
fn actor() -> String {
    std::env::var("CVAULT_ACTOR")
        .ok()
        .filter(|a| !a.trim().is_empty())
        .unwrap_or_else(|| "cli".to_string())
}
