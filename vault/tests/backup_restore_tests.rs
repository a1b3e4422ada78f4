// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the backup lifecycle.
//!
//! Exercises full/incremental chains against a live store: exact restore of
//! pre-mutation contents, incremental replay, retention that respects chain
//! dependencies and rejection of tampered payloads.

use std::sync::Arc;

use chrono::{Duration, Utc};
use corpus_vault::{
    AuditFilter, AuditLog, BackupConfig, BackupKind, BackupManager, BackupStorage,
    ChangeLogEntry, ContextRule, Discipline, DocumentRegistry, MatchScorer, NewLearnedContext,
    NewPattern, NewSymbol, Pattern, PatternRepository, RelationshipType, SledPatternRepository,
    Store, Symbol, SymbolDictionary, VaultError, VaultResult,
};
use tempfile::TempDir;

struct Vault {
    backup_dir: TempDir,
    store: Arc<Store>,
    patterns: SledPatternRepository,
    symbols: SymbolDictionary,
    backups: BackupManager,
}

impl Vault {
    fn new() -> Self {
        Self::with_config(BackupConfig::default())
    }

    fn with_config(config: BackupConfig) -> Self {
        let backup_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::temporary().unwrap());
        let storage = BackupStorage::new(backup_dir.path()).unwrap();
        Self {
            patterns: SledPatternRepository::new(store.clone(), MatchScorer::default()),
            symbols: SymbolDictionary::new(store.clone()),
            backups: BackupManager::new(store.clone(), storage, config),
            store,
            backup_dir,
        }
    }

    /// Second manager over the same store and backup directory.
    fn manager(&self, config: BackupConfig) -> BackupManager {
        let storage = BackupStorage::new(self.backup_dir.path()).unwrap();
        BackupManager::new(self.store.clone(), storage, config)
    }

    async fn contents(&self) -> (Vec<Pattern>, Vec<Symbol>, Vec<ChangeLogEntry>) {
        let patterns = self.patterns.list_patterns(None).await.unwrap();
        let symbols = self.symbols.list_symbols(None).await.unwrap();
        let log = AuditLog::new(self.store.clone())
            .query(AuditFilter::all())
            .collect::<VaultResult<Vec<_>>>()
            .unwrap();
        (patterns, symbols, log)
    }
}

fn integral() -> NewPattern {
    NewPattern::new(Discipline::Mathematics, "definite_integral").with_latex("\\int_{a}^{b} f(x) dx")
}

#[tokio::test]
async fn test_full_backup_restores_exact_contents() {
    let vault = Vault::new();
    let a = vault.patterns.add_pattern(integral()).await.unwrap();
    let b = vault
        .patterns
        .add_pattern(NewPattern::new(Discipline::Physics, "law").with_latex("F = ma"))
        .await
        .unwrap();
    vault
        .symbols
        .add_symbol(
            NewSymbol::new("∫", Discipline::Mathematics, "integrale")
                .with_rule(ContextRule::new("_0^", "integrale da zero a")),
        )
        .await
        .unwrap();
    vault
        .symbols
        .set_user_preference("s-1", "∫", "integral", None)
        .await
        .unwrap();

    let before = vault.contents().await;
    let record = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    assert_eq!(record.counts.patterns, 2);
    assert_eq!(record.counts.symbols, 1);
    assert_eq!(record.counts.preferences, 1);

    vault.patterns.update_pattern_frequency(a, 5).await.unwrap();
    vault.patterns.delete_pattern(b).await.unwrap();
    vault
        .symbols
        .add_symbol(NewSymbol::new("π", Discipline::Mathematics, "pi greco"))
        .await
        .unwrap();
    assert_ne!(vault.contents().await, before);

    let report = vault.backups.restore_backup(record.id).await.unwrap();
    assert_eq!(report.chain, vec![record.id]);
    assert_eq!(vault.contents().await, before);

    let pronounced = vault
        .symbols
        .pronounce(Discipline::Mathematics, "∫", Some("s-1"), None)
        .await
        .unwrap();
    assert_eq!(pronounced.text, "integral");

    // audit index follows the restored log: b exists again and can be reinforced
    vault.patterns.update_pattern_frequency(b, 1).await.unwrap();
}

#[tokio::test]
async fn test_incremental_chain_replays_in_order() {
    let vault = Vault::new();
    let id = vault.patterns.add_pattern(integral()).await.unwrap();
    vault.patterns.update_pattern_frequency(id, 2).await.unwrap();
    assert_eq!(vault.patterns.get_pattern(id).await.unwrap().unwrap().frequency, 3);

    let full = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    for _ in 0..3 {
        vault.patterns.update_pattern_frequency(id, 1).await.unwrap();
    }
    let incremental = vault
        .backups
        .create_backup(BackupKind::Incremental)
        .await
        .unwrap();
    assert_eq!(incremental.base_backup_id, Some(full.id));
    assert_eq!(incremental.counts.change_log, 3);

    vault.backups.restore_backup(full.id).await.unwrap();
    assert_eq!(vault.patterns.get_pattern(id).await.unwrap().unwrap().frequency, 3);

    let report = vault.backups.restore_backup(incremental.id).await.unwrap();
    assert_eq!(report.chain, vec![full.id, incremental.id]);
    assert_eq!(vault.patterns.get_pattern(id).await.unwrap().unwrap().frequency, 6);
    assert_eq!(AuditLog::new(vault.store.clone()).len(), 5);
}

#[tokio::test]
async fn test_incremental_carries_deletions() {
    let vault = Vault::new();
    let kept = vault.patterns.add_pattern(integral()).await.unwrap();
    let dropped = vault.patterns.add_pattern(integral()).await.unwrap();
    let full = vault.backups.create_backup(BackupKind::Full).await.unwrap();

    vault.patterns.delete_pattern(dropped).await.unwrap();
    let added = vault.patterns.add_pattern(integral()).await.unwrap();
    let incremental = vault
        .backups
        .create_backup(BackupKind::Incremental)
        .await
        .unwrap();
    assert_eq!(incremental.counts.tombstones, 1);

    vault.backups.restore_backup(full.id).await.unwrap();
    assert!(vault.patterns.get_pattern(dropped).await.unwrap().is_some());
    assert!(vault.patterns.get_pattern(added).await.unwrap().is_none());

    vault.backups.restore_backup(incremental.id).await.unwrap();
    assert!(vault.patterns.get_pattern(kept).await.unwrap().is_some());
    assert!(vault.patterns.get_pattern(dropped).await.unwrap().is_none());
    assert!(vault.patterns.get_pattern(added).await.unwrap().is_some());
}

#[tokio::test]
async fn test_corpus_knowledge_survives_incremental_restore() {
    let vault = Vault::new();
    let documents = DocumentRegistry::new(vault.store.clone());
    let general = vault.patterns.add_pattern(integral()).await.unwrap();
    let special = vault.patterns.add_pattern(integral()).await.unwrap();
    let before = vault
        .patterns
        .add_context(general, NewLearnedContext::new("area sotto la curva").with_chapter_section("3.1"))
        .await
        .unwrap();
    let first = documents
        .register_document("analisi.pdf", b"%PDF analisi", Some("textbook"), Some(Discipline::Mathematics))
        .await
        .unwrap()
        .unwrap();
    let full = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    assert_eq!((full.counts.learned_contexts, full.counts.documents), (1, 1));

    let after = vault
        .patterns
        .add_context(general, NewLearnedContext::new("integrale improprio").with_confidence(0.8))
        .await
        .unwrap();
    let link = vault
        .patterns
        .add_relationship(general, special, RelationshipType::Variant, 0.9)
        .await
        .unwrap();
    documents.update_document_patterns_count(first.id, 2).await.unwrap();
    let incremental = vault
        .backups
        .create_backup(BackupKind::Incremental)
        .await
        .unwrap();
    assert_eq!(incremental.counts.learned_contexts, 1);
    assert_eq!(incremental.counts.relationships, 1);
    assert_eq!(incremental.counts.documents, 1);

    vault.backups.restore_backup(full.id).await.unwrap();
    assert_eq!(vault.patterns.get_contexts(general).await.unwrap(), vec![before.clone()]);
    assert!(vault.patterns.get_relationships(general).await.unwrap().is_empty());
    assert_eq!(documents.get_document(first.id).await.unwrap().unwrap().patterns_extracted, 0);

    let report = vault.backups.restore_backup(incremental.id).await.unwrap();
    assert_eq!((report.learned_contexts, report.documents, report.relationships), (2, 1, 1));
    assert_eq!(vault.patterns.get_contexts(general).await.unwrap(), vec![before, after]);
    assert_eq!(vault.patterns.get_relationships(special).await.unwrap(), vec![link]);
    assert_eq!(documents.get_document(first.id).await.unwrap().unwrap().patterns_extracted, 2);

    // The restored hash index still deduplicates.
    assert!(documents
        .register_document("copia.pdf", b"%PDF analisi", None, None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_tampered_payload_is_rejected_and_store_untouched() {
    let vault = Vault::new();
    vault.patterns.add_pattern(integral()).await.unwrap();
    let record = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    let later = vault.patterns.add_pattern(integral()).await.unwrap();
    let before = vault.contents().await;

    let mut bytes = std::fs::read(&record.storage_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0x20;
    std::fs::write(&record.storage_path, bytes).unwrap();

    let err = vault.backups.restore_backup(record.id).await.unwrap_err();
    assert!(matches!(err, VaultError::Integrity(_)), "got {:?}", err);
    assert_eq!(err.exit_code(), 4);
    assert_eq!(vault.contents().await, before);
    assert!(vault.patterns.get_pattern(later).await.unwrap().is_some());
}

#[tokio::test]
async fn test_corrupt_link_blocks_whole_chain() {
    let vault = Vault::new();
    let id = vault.patterns.add_pattern(integral()).await.unwrap();
    let full = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    vault.patterns.update_pattern_frequency(id, 1).await.unwrap();
    let incremental = vault
        .backups
        .create_backup(BackupKind::Incremental)
        .await
        .unwrap();
    vault.patterns.update_pattern_frequency(id, 10).await.unwrap();

    std::fs::write(&full.storage_path, b"{}").unwrap();
    let err = vault.backups.restore_backup(incremental.id).await.unwrap_err();
    assert!(matches!(err, VaultError::Integrity(_)));
    assert_eq!(vault.patterns.get_pattern(id).await.unwrap().unwrap().frequency, 12);
}

#[tokio::test]
async fn test_retention_never_breaks_a_live_chain() {
    let vault = Vault::with_config(BackupConfig {
        retention_days: 30,
        ..Default::default()
    });
    let long_lived = vault.manager(BackupConfig {
        retention_days: 90,
        ..Default::default()
    });

    let id = vault.patterns.add_pattern(integral()).await.unwrap();
    let full = vault.backups.create_backup(BackupKind::Full).await.unwrap();
    vault.patterns.update_pattern_frequency(id, 1).await.unwrap();
    let first = vault
        .backups
        .create_backup(BackupKind::Incremental)
        .await
        .unwrap();
    vault.patterns.update_pattern_frequency(id, 1).await.unwrap();
    let second = long_lived.create_backup(BackupKind::Incremental).await.unwrap();
    assert_eq!(second.base_backup_id, Some(first.id));

    let report = vault
        .backups
        .prune_expired_at(Utc::now() + Duration::days(45))
        .await
        .unwrap();
    assert!(report.pruned.is_empty());
    assert_eq!(report.protected, vec![full.id, first.id]);

    vault.backups.restore_backup(second.id).await.unwrap();
    assert_eq!(vault.patterns.get_pattern(id).await.unwrap().unwrap().frequency, 3);

    let report = vault
        .backups
        .prune_expired_at(Utc::now() + Duration::days(120))
        .await
        .unwrap();
    assert_eq!(report.pruned, vec![full.id, first.id, second.id]);
    assert!(vault.backups.list_backups().unwrap().iter().all(|r| !r.is_valid()));
}

#[tokio::test]
async fn test_scheduled_cycles_extend_the_chain() {
    let vault = Vault::with_config(BackupConfig {
        interval_seconds: 60,
        ..Default::default()
    });
    vault.patterns.add_pattern(integral()).await.unwrap();

    let now = Utc::now();
    let first = vault.backups.run_scheduled_cycle_at(now).await.unwrap();
    let full = first.created.unwrap();
    assert_eq!(full.kind, BackupKind::Full);

    let second = vault
        .backups
        .run_scheduled_cycle_at(now + Duration::minutes(2))
        .await
        .unwrap();
    let incremental = second.created.unwrap();
    assert_eq!(incremental.kind, BackupKind::Incremental);
    assert_eq!(incremental.base_backup_id, Some(full.id));

    let third = vault
        .backups
        .run_scheduled_cycle_at(now + Duration::minutes(4))
        .await
        .unwrap();
    let latest = third.created.unwrap();
    assert_eq!(latest.base_backup_id, Some(incremental.id));
    assert_eq!(latest.chain_depth, 2);
    assert!(third.pruned.is_empty());
}
