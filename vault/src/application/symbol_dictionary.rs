// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Symbol Dictionary
//!
//! Pronunciation knowledge for text-to-speech consumers: symbols with their
//! default reading and context rules, plus per-student overrides.
//!
//! Symbols are keyed by `(discipline, symbol)`, preferences by
//! `(student_id, symbol, context)`. Both are audited exactly like patterns.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::domain::{
    abort, entity_index_key, preference_key, resolve_pronunciation, symbol_key, ChangeLogEntry,
    ContextRule, Discipline, EntityType, NewSymbol, Operation, Pronunciation, Symbol,
    UserPreference, VaultError, VaultResult,
};
use crate::infrastructure::{AuditLog, Collection, Store, DEFAULT_ACTOR};

pub struct SymbolDictionary {
    store: Arc<Store>,
    actor: String,
}

impl SymbolDictionary {
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

    pub async fn add_symbol(&self, candidate: NewSymbol) -> VaultResult<Symbol> {
        let symbol = candidate.into_symbol(Utc::now())?;
        let key = symbol.key();
        let _access = self
            .store
            .write_entity(&entity_index_key(EntityType::Symbol, &key))
            .await?;

        if self.store.get::<Symbol>(Collection::Symbols, key.as_bytes())?.is_some() {
            return Err(VaultError::Validation(format!("symbol {} is already defined", key)));
        }

        let entry = self.entry(EntityType::Symbol, &key, Operation::Create, serde_json::to_value(&symbol)?)?;
        self.put(Collection::Symbols, &key, &symbol, &entry)?;

        info!(symbol = %key, "Added symbol");
        Ok(symbol)
    }

    /// Append a context rule. Rules are tried in insertion order.
    pub async fn add_context_rule(
        &self,
        discipline: Discipline,
        symbol: &str,
        rule: ContextRule,
    ) -> VaultResult<Symbol> {
        if rule.pattern.is_empty() {
            return Err(VaultError::Validation("context rule pattern cannot be empty".to_string()));
        }
        let key = symbol_key(discipline, symbol);
        let _access = self
            .store
            .write_entity(&entity_index_key(EntityType::Symbol, &key))
            .await?;

        let mut updated = self.load_symbol(&key)?;
        updated.context_rules.push(rule.clone());
        updated.updated_at = Utc::now();

        let entry = self.entry(
            EntityType::Symbol,
            &key,
            Operation::Update,
            json!({ "context_rules": { "added": rule } }),
        )?;
        self.put(Collection::Symbols, &key, &updated, &entry)?;

        debug!(symbol = %key, rules = updated.context_rules.len(), "Added context rule");
        Ok(updated)
    }

    /// Count one more use of a symbol by a reading workflow.
    pub async fn record_usage(&self, discipline: Discipline, symbol: &str) -> VaultResult<Symbol> {
        let key = symbol_key(discipline, symbol);
        let _access = self
            .store
            .write_entity(&entity_index_key(EntityType::Symbol, &key))
            .await?;

        let mut updated = self.load_symbol(&key)?;
        let before = updated.usage_count;
        updated.usage_count = before.saturating_add(1);
        updated.updated_at = Utc::now();

        let entry = self.entry(
            EntityType::Symbol,
            &key,
            Operation::Update,
            json!({ "usage_count": { "from": before, "to": updated.usage_count } }),
        )?;
        self.put(Collection::Symbols, &key, &updated, &entry)?;
        Ok(updated)
    }

    pub async fn delete_symbol(&self, discipline: Discipline, symbol: &str) -> VaultResult<Symbol> {
        let key = symbol_key(discipline, symbol);
        let lock_key = entity_index_key(EntityType::Symbol, &key);
        let removed = {
            let _access = self.store.write_entity(&lock_key).await?;
            let existing = self.load_symbol(&key)?;
            let entry = self.entry(EntityType::Symbol, &key, Operation::Delete, serde_json::to_value(&existing)?)?;
            self.remove(Collection::Symbols, &key, &entry)?;
            existing
        };

        info!(symbol = %key, "Deleted symbol");
        Ok(removed)
    }

    pub async fn get_symbol(&self, discipline: Discipline, symbol: &str) -> VaultResult<Option<Symbol>> {
        let _access = self.store.read().await?;
        self.store
            .get(Collection::Symbols, symbol_key(discipline, symbol).as_bytes())
    }

    pub async fn list_symbols(&self, discipline: Option<Discipline>) -> VaultResult<Vec<Symbol>> {
        let _access = self.store.read().await?;
        let symbols: Vec<Symbol> = self.store.scan(Collection::Symbols)?;
        Ok(symbols
            .into_iter()
            .filter(|s| discipline.map_or(true, |d| s.discipline == d))
            .collect())
    }

    /// Create or replace a student's reading of `symbol`. An absent or empty
    /// context applies everywhere.
    pub async fn set_user_preference(
        &self,
        student_id: &str,
        symbol: &str,
        pronunciation: &str,
        context: Option<&str>,
    ) -> VaultResult<UserPreference> {
        if student_id.trim().is_empty() {
            return Err(VaultError::Validation("student_id is required".to_string()));
        }
        if symbol.is_empty() {
            return Err(VaultError::Validation("symbol is required".to_string()));
        }
        if pronunciation.trim().is_empty() {
            return Err(VaultError::Validation("pronunciation is required".to_string()));
        }

        let context = context.unwrap_or("").trim();
        let key = preference_key(student_id, symbol, context);
        let _access = self
            .store
            .write_entity(&entity_index_key(EntityType::UserPreference, &key))
            .await?;

        let now = Utc::now();
        let existing: Option<UserPreference> = self.store.get(Collection::Preferences, key.as_bytes())?;
        let (preference, entry) = match existing {
            Some(mut pref) => {
                let diff = json!({ "pronunciation": { "from": pref.pronunciation, "to": pronunciation } });
                pref.pronunciation = pronunciation.to_string();
                pref.updated_at = now;
                (pref, self.entry(EntityType::UserPreference, &key, Operation::Update, diff)?)
            }
            None => {
                let pref = UserPreference {
                    student_id: student_id.to_string(),
                    symbol: symbol.to_string(),
                    pronunciation: pronunciation.to_string(),
                    context: context.to_string(),
                    created_at: now,
                    updated_at: now,
                };
                let diff = serde_json::to_value(&pref)?;
                (pref, self.entry(EntityType::UserPreference, &key, Operation::Create, diff)?)
            }
        };
        self.put(Collection::Preferences, &key, &preference, &entry)?;

        debug!(student_id, symbol, context, "Stored pronunciation preference");
        Ok(preference)
    }

    pub async fn remove_user_preference(
        &self,
        student_id: &str,
        symbol: &str,
        context: Option<&str>,
    ) -> VaultResult<UserPreference> {
        let key = preference_key(student_id, symbol, context.unwrap_or("").trim());
        let lock_key = entity_index_key(EntityType::UserPreference, &key);
        let removed = {
            let _access = self.store.write_entity(&lock_key).await?;
            let existing: UserPreference = self
                .store
                .get(Collection::Preferences, key.as_bytes())?
                .ok_or_else(|| VaultError::NotFound(format!("preference {}", key)))?;
            let entry = self.entry(
                EntityType::UserPreference,
                &key,
                Operation::Delete,
                serde_json::to_value(&existing)?,
            )?;
            self.remove(Collection::Preferences, &key, &entry)?;
            existing
        };
        Ok(removed)
    }

    pub async fn preferences_for(&self, student_id: &str) -> VaultResult<Vec<UserPreference>> {
        let _access = self.store.read().await?;
        let preferences: Vec<UserPreference> = self.store.scan(Collection::Preferences)?;
        Ok(preferences
            .into_iter()
            .filter(|p| p.student_id == student_id)
            .collect())
    }

    /// How `symbol` should be read, for `student_id` if given, in `context`.
    pub async fn pronounce(
        &self,
        discipline: Discipline,
        symbol: &str,
        student_id: Option<&str>,
        context: Option<&str>,
    ) -> VaultResult<Pronunciation> {
        let _access = self.store.read().await?;
        let key = symbol_key(discipline, symbol);
        let entry = self.load_symbol(&key)?;

        let preferences: Vec<UserPreference> = match student_id {
            Some(student) => {
                let all: Vec<UserPreference> = self.store.scan(Collection::Preferences)?;
                all.into_iter()
                    .filter(|p| p.student_id == student && p.symbol == symbol)
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(resolve_pronunciation(&entry, context, &preferences))
    }

    fn load_symbol(&self, key: &str) -> VaultResult<Symbol> {
        self.store
            .get(Collection::Symbols, key.as_bytes())?
            .ok_or_else(|| VaultError::NotFound(format!("symbol {}", key)))
    }

    fn entry(
        &self,
        entity_type: EntityType,
        key: &str,
        operation: Operation,
        diff: serde_json::Value,
    ) -> VaultResult<ChangeLogEntry> {
        AuditLog::entry(&self.store, entity_type, key, operation, &self.actor, diff)
    }

    fn put<T: Serialize>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
        entry: &ChangeLogEntry,
    ) -> VaultResult<()> {
        let encoded = serde_json::to_vec(value)?;
        self.store.commit(collection, entry, |tree| {
            tree.insert(key.as_bytes(), encoded.as_slice())?;
            Ok(())
        })
    }

    fn remove(&self, collection: Collection, key: &str, entry: &ChangeLogEntry) -> VaultResult<()> {
        self.store.commit(collection, entry, |tree| match tree.remove(key.as_bytes())? {
            Some(_) => Ok(()),
            None => abort(VaultError::NotFound(key.to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditFilter, PronunciationSource};

    fn dictionary() -> (Arc<Store>, SymbolDictionary) {
        let store = Arc::new(Store::temporary().unwrap());
        (store.clone(), SymbolDictionary::new(store))
    }

    async fn seed_integral(dictionary: &SymbolDictionary) {
        dictionary
            .add_symbol(
                NewSymbol::new("∫", Discipline::Mathematics, "integrale")
                    .with_rule(ContextRule::new("_0^", "integrale da zero a"))
                    .with_category("operator"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_symbol_is_rejected() {
        let (_, dictionary) = dictionary();
        seed_integral(&dictionary).await;
        let err = dictionary
            .add_symbol(NewSymbol::new("∫", Discipline::Mathematics, "integral"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_resolution_order() {
        let (_, dictionary) = dictionary();
        seed_integral(&dictionary).await;

        let plain = dictionary
            .pronounce(Discipline::Mathematics, "∫", Some("s-1"), Some("∫ f"))
            .await
            .unwrap();
        assert_eq!(plain.source, PronunciationSource::Default);

        let rule = dictionary
            .pronounce(Discipline::Mathematics, "∫", Some("s-1"), Some("∫_0^1 g"))
            .await
            .unwrap();
        assert_eq!(rule.text, "integrale da zero a");

        dictionary
            .set_user_preference("s-1", "∫", "integral", None)
            .await
            .unwrap();
        let general = dictionary
            .pronounce(Discipline::Mathematics, "∫", Some("s-1"), Some("∫_0^1 g"))
            .await
            .unwrap();
        assert_eq!(general.text, "integral");

        dictionary
            .set_user_preference("s-1", "∫", "definite integral", Some("∫_0^1 g"))
            .await
            .unwrap();
        let contextual = dictionary
            .pronounce(Discipline::Mathematics, "∫", Some("s-1"), Some("∫_0^1 g"))
            .await
            .unwrap();
        assert_eq!(contextual.text, "definite integral");

        let other_student = dictionary
            .pronounce(Discipline::Mathematics, "∫", Some("s-2"), None)
            .await
            .unwrap();
        assert_eq!(other_student.text, "integrale");
    }

    #[tokio::test]
    async fn test_preference_upsert_is_audited_as_update() {
        let (store, dictionary) = dictionary();
        dictionary.set_user_preference("s-1", "π", "pi", None).await.unwrap();
        dictionary.set_user_preference("s-1", "π", "pi greco", None).await.unwrap();

        let prefs = dictionary.preferences_for("s-1").await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert_eq!(prefs[0].pronunciation, "pi greco");

        let ops: Vec<Operation> = AuditLog::new(store)
            .query(AuditFilter::all().of_type(EntityType::UserPreference))
            .map(|e| e.unwrap().operation)
            .collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Update]);
    }

    #[tokio::test]
    async fn test_symbol_can_be_redefined_after_delete() {
        let (store, dictionary) = dictionary();
        seed_integral(&dictionary).await;
        dictionary.delete_symbol(Discipline::Mathematics, "∫").await.unwrap();
        assert!(dictionary
            .get_symbol(Discipline::Mathematics, "∫")
            .await
            .unwrap()
            .is_none());
        seed_integral(&dictionary).await;
        assert_eq!(AuditLog::new(store).len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_not_found() {
        let (_, dictionary) = dictionary();
        let err = dictionary
            .pronounce(Discipline::Physics, "ħ", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }
}
