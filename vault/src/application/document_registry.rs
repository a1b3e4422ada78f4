// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Document Registry
//!
//! Keeps track of which documents have already been analyzed. A document is
//! identified by the SHA-256 of its content, so registering the same file
//! twice (under any name) is a no-op that yields `None`.
//!
//! Documents are stored under their content hash; lookups by id scan the
//! collection, which stays small next to the pattern catalogue.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use sled::transaction::ConflictableTransactionError;
use tracing::{debug, info};

use crate::domain::{
    abort, document_hash, entity_index_key, AnalyzedDocument, Discipline, DocumentId, EntityType,
    Operation, VaultError, VaultResult,
};
use crate::infrastructure::{AuditLog, Collection, Store, DEFAULT_ACTOR};

pub struct DocumentRegistry {
    store: Arc<Store>,
    actor: String,
}

impl DocumentRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Register a document for analysis. Returns `None` when a document with
    /// the same content is already known.
    pub async fn register_document(
        &self,
        filename: &str,
        content: &[u8],
        document_type: Option<&str>,
        discipline: Option<Discipline>,
    ) -> VaultResult<Option<AnalyzedDocument>> {
        if filename.trim().is_empty() {
            return Err(VaultError::Validation("document filename cannot be empty".to_string()));
        }

        let hash = document_hash(content);
        let _access = self.store.write_entity(&format!("document-hash:{}", hash)).await?;

        if let Some(existing) = self.store.get::<AnalyzedDocument>(Collection::Documents, hash.as_bytes())? {
            debug!(document_id = %existing.id, filename, "Document already registered");
            return Ok(None);
        }

        let id = DocumentId(self.store.generate_id()?);
        let document = AnalyzedDocument {
            id,
            filename: filename.to_string(),
            file_hash: hash.clone(),
            document_type: document_type.map(str::to_string),
            discipline,
            patterns_extracted: 0,
            analyzed_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&document)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::Document,
            id.to_string(),
            Operation::Create,
            &self.actor,
            serde_json::to_value(&document)?,
        )?;

        self.store.commit(Collection::Documents, &entry, |tree| {
            if tree.get(hash.as_bytes())?.is_some() {
                return abort(VaultError::Concurrency(format!(
                    "document with hash {} registered concurrently",
                    hash
                )));
            }
            tree.insert(hash.as_bytes(), encoded.as_slice())?;
            Ok(())
        })?;

        info!(document_id = %id, filename, hash = %hash, "Registered document");
        Ok(Some(document))
    }

    /// Record how many patterns the analysis of a document produced.
    pub async fn update_document_patterns_count(
        &self,
        id: DocumentId,
        count: u64,
    ) -> VaultResult<AnalyzedDocument> {
        let _access = self
            .store
            .write_entity(&entity_index_key(EntityType::Document, &id.to_string()))
            .await?;

        let before = self
            .find(id)?
            .ok_or_else(|| VaultError::NotFound(format!("document {}", id)))?;
        let mut after = before.clone();
        after.patterns_extracted = count;

        let previous = serde_json::to_vec(&before)?;
        let encoded = serde_json::to_vec(&after)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::Document,
            id.to_string(),
            Operation::Update,
            &self.actor,
            json!({ "patterns_extracted": { "from": before.patterns_extracted, "to": count } }),
        )?;

        let key = before.file_hash.as_bytes();
        self.store.commit(Collection::Documents, &entry, |tree| {
            match tree.get(key)? {
                Some(current) if &current[..] == previous.as_slice() => {}
                _ => {
                    return abort(VaultError::Concurrency(format!(
                        "document {} changed during update",
                        id
                    )))
                }
            }
            tree.insert(key, encoded.as_slice())?;
            Ok::<_, ConflictableTransactionError<VaultError>>(())
        })?;

        debug!(document_id = %id, patterns_extracted = count, "Updated document pattern count");
        Ok(after)
    }

    pub async fn get_document(&self, id: DocumentId) -> VaultResult<Option<AnalyzedDocument>> {
        let _access = self.store.read().await?;
        self.find(id)
    }

    /// The registered document with exactly this content, if any.
    pub async fn find_by_content(&self, content: &[u8]) -> VaultResult<Option<AnalyzedDocument>> {
        let _access = self.store.read().await?;
        self.store
            .get(Collection::Documents, document_hash(content).as_bytes())
    }

    /// Every registered document, in registration order.
    pub async fn list_documents(&self) -> VaultResult<Vec<AnalyzedDocument>> {
        let _access = self.store.read().await?;
        let mut documents: Vec<AnalyzedDocument> = self.store.scan(Collection::Documents)?;
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }

    fn find(&self, id: DocumentId) -> VaultResult<Option<AnalyzedDocument>> {
        let documents: Vec<AnalyzedDocument> = self.store.scan(Collection::Documents)?;
        Ok(documents.into_iter().find(|d| d.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuditFilter;

    fn registry() -> (Arc<Store>, DocumentRegistry) {
        let store = Arc::new(Store::temporary().unwrap());
        (store.clone(), DocumentRegistry::new(store).with_actor("analyzer"))
    }

    #[tokio::test]
    async fn test_same_content_registers_once() {
        let (store, registry) = registry();
        let first = registry
            .register_document("analisi-1.pdf", b"%PDF-1.7 integrali", Some("textbook"), Some(Discipline::Mathematics))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.patterns_extracted, 0);
        assert_eq!(first.file_hash, document_hash(b"%PDF-1.7 integrali"));

        let again = registry
            .register_document("copia.pdf", b"%PDF-1.7 integrali", None, None)
            .await
            .unwrap();
        assert!(again.is_none());

        assert_eq!(registry.list_documents().await.unwrap(), vec![first]);
        let log: Vec<_> = AuditLog::new(store)
            .query(AuditFilter::all().of_type(EntityType::Document))
            .collect::<VaultResult<_>>()
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].actor, "analyzer");
    }

    #[tokio::test]
    async fn test_concurrent_registration_of_same_content_yields_one_document() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register_document(&format!("dup-{}.docx", i), b"stesso contenuto", None, None)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut registered = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                registered += 1;
            }
        }
        assert_eq!(registered, 1);
        assert_eq!(registry.list_documents().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_patterns_count_update() {
        let (_, registry) = registry();
        let document = registry
            .register_document("fisica.docx", b"onde", Some("lecture-notes"), Some(Discipline::Physics))
            .await
            .unwrap()
            .unwrap();

        let updated = registry
            .update_document_patterns_count(document.id, 12)
            .await
            .unwrap();
        assert_eq!(updated.patterns_extracted, 12);
        assert_eq!(
            registry.find_by_content(b"onde").await.unwrap(),
            Some(updated.clone())
        );
        assert_eq!(registry.get_document(document.id).await.unwrap(), Some(updated));

        let err = registry
            .update_document_patterns_count(DocumentId(404), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_blank_filename_is_rejected() {
        let (store, registry) = registry();
        let err = registry
            .register_document("  ", b"x", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert!(AuditLog::new(store).is_empty());
    }
}
