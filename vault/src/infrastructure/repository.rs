// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pattern repository: catalogue CRUD, similarity search and reinforcement,
//! plus the contexts and relationships learned around each pattern.
//!
//! Every mutation is committed in the same sled transaction as its change-log
//! entry, so the catalogue and the audit trail can never disagree.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sled::transaction::ConflictableTransactionError;
use tracing::{debug, info};

use crate::domain::{
    abort, entity_index_key, visual_similarity, BackupRecord, ContextId, Discipline, EntityType,
    LearnedContext, MatchScorer, NewLearnedContext, NewPattern, Operation, Pattern, PatternId,
    PatternRelationship, RelationshipId, RelationshipType, VaultError, VaultResult,
};
use super::audit_log::AuditLog;
use super::store::{decode, scan_tree, Collection, Store};

pub const DEFAULT_ACTOR: &str = "system";

/// Input of [`PatternRepository::find_similar_patterns`].
#[derive(Debug, Clone, Default)]
pub struct SimilarityQuery {
    pub latex: Option<String>,
    pub visual_signature: Option<String>,
    pub context: Option<BTreeSet<String>>,
    pub discipline: Option<Discipline>,
    pub limit: usize,
}

impl SimilarityQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    pub fn latex(mut self, latex: impl Into<String>) -> Self {
        self.latex = Some(latex.into());
        self
    }

    pub fn visual_signature(mut self, signature: impl Into<String>) -> Self {
        self.visual_signature = Some(signature.into());
        self
    }

    pub fn context<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.context = Some(crate::domain::normalize_context_words(words));
        self
    }

    pub fn discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = Some(discipline);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPattern {
    pub pattern: Pattern,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VaultStatistics {
    pub total_patterns: usize,
    pub mean_frequency: f64,
    pub by_discipline: BTreeMap<Discipline, usize>,
    pub by_pattern_type: BTreeMap<String, usize>,
    pub total_symbols: usize,
    pub total_preferences: usize,
    pub learned_contexts: usize,
    pub pattern_relationships: usize,
    pub documents_analyzed: usize,
    pub change_log_entries: usize,
    pub valid_backups: usize,
}

/// Catalogue of content patterns.
#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// Validate and store a new pattern (frequency 1).
    async fn add_pattern(&self, candidate: NewPattern) -> VaultResult<PatternId>;

    /// Rank catalogued patterns against a query, best first.
    async fn find_similar_patterns(&self, query: &SimilarityQuery) -> VaultResult<Vec<ScoredPattern>>;

    /// Increase a pattern's frequency by `delta` (> 0). Returns the updated pattern.
    async fn update_pattern_frequency(&self, id: PatternId, delta: u64) -> VaultResult<Pattern>;

    async fn get_statistics(&self) -> VaultResult<VaultStatistics>;

    async fn get_pattern(&self, id: PatternId) -> VaultResult<Option<Pattern>>;

    async fn list_patterns(&self, discipline: Option<Discipline>) -> VaultResult<Vec<Pattern>>;

    /// Remove a pattern. Returns what was removed. Its learned contexts and
    /// relationships are kept as history.
    async fn delete_pattern(&self, id: PatternId) -> VaultResult<Pattern>;

    /// Record where and how an existing pattern was observed.
    async fn add_context(&self, pattern_id: PatternId, context: NewLearnedContext) -> VaultResult<LearnedContext>;

    /// Contexts learned for a pattern, oldest first.
    async fn get_contexts(&self, pattern_id: PatternId) -> VaultResult<Vec<LearnedContext>>;

    /// Link two existing, distinct patterns.
    async fn add_relationship(
        &self,
        source: PatternId,
        target: PatternId,
        relationship_type: RelationshipType,
        similarity_score: f64,
    ) -> VaultResult<PatternRelationship>;

    /// Relationships in which the pattern is either end, oldest first.
    async fn get_relationships(&self, pattern_id: PatternId) -> VaultResult<Vec<PatternRelationship>>;
}

pub struct SledPatternRepository {
    store: Arc<Store>,
    scorer: MatchScorer,
    actor: String,
}

impl SledPatternRepository {
    pub fn new(store: Arc<Store>, scorer: MatchScorer) -> Self {
        Self {
            store,
            scorer,
            actor: DEFAULT_ACTOR.to_string(),
        }
    }

    /// Name recorded as the actor of every change made through this handle.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    fn load(&self, id: PatternId) -> VaultResult<Pattern> {
        self.store
            .get(Collection::Patterns, &id.to_key())?
            .ok_or_else(|| VaultError::NotFound(format!("pattern {}", id)))
    }
}

fn pattern_lock_key(id: PatternId) -> String {
    entity_index_key(EntityType::Pattern, &id.to_string())
}

/// Descending score, then higher frequency, earlier creation, lower id.
fn rank(a: &ScoredPattern, b: &ScoredPattern) -> std::cmp::Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.pattern.frequency.cmp(&a.pattern.frequency))
        .then_with(|| a.pattern.created_at.cmp(&b.pattern.created_at))
        .then_with(|| a.pattern.id.cmp(&b.pattern.id))
}

#[async_trait]
impl PatternRepository for SledPatternRepository {
    async fn add_pattern(&self, candidate: NewPattern) -> VaultResult<PatternId> {
        let _access = self.store.write().await?;

        let id = PatternId(self.store.generate_id()?);
        let pattern = candidate.into_pattern(id, Utc::now())?;
        let encoded = serde_json::to_vec(&pattern)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::Pattern,
            id.to_string(),
            Operation::Create,
            &self.actor,
            serde_json::to_value(&pattern)?,
        )?;

        self.store.commit(Collection::Patterns, &entry, |tree| {
            tree.insert(id.to_key().to_vec(), encoded.as_slice())?;
            Ok(())
        })?;

        info!(
            pattern_id = %id,
            discipline = %pattern.discipline(),
            pattern_type = %pattern.pattern_type,
            "Added pattern"
        );
        Ok(id)
    }

    async fn find_similar_patterns(&self, query: &SimilarityQuery) -> VaultResult<Vec<ScoredPattern>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let patterns: Vec<Pattern> = {
            let _access = self.store.read().await?;
            self.store.scan(Collection::Patterns)?
        };

        let scanned = patterns.len();
        let mut max_frequency: HashMap<Discipline, u64> = HashMap::new();
        for pattern in &patterns {
            let max = max_frequency.entry(pattern.discipline()).or_insert(0);
            *max = (*max).max(pattern.frequency);
        }

        let mut ranked: Vec<ScoredPattern> = patterns
            .into_iter()
            .filter(|p| query.discipline.map_or(true, |d| p.discipline() == d))
            .map(|pattern| {
                let visual = match (&query.visual_signature, &pattern.visual_signature) {
                    (Some(a), Some(b)) => Some(visual_similarity(a, b)),
                    _ => None,
                };
                let max = max_frequency.get(&pattern.discipline()).copied().unwrap_or(0);
                let score = self.scorer.score(
                    query.latex.as_deref(),
                    &pattern,
                    query.context.as_ref(),
                    visual,
                    max,
                );
                ScoredPattern { pattern, score }
            })
            .collect();

        ranked.sort_by(rank);
        ranked.truncate(query.limit);

        debug!(
            scanned,
            returned = ranked.len(),
            "Similarity search complete"
        );
        Ok(ranked)
    }

    async fn update_pattern_frequency(&self, id: PatternId, delta: u64) -> VaultResult<Pattern> {
        if delta == 0 {
            return Err(VaultError::Validation("frequency delta must be positive".to_string()));
        }

        let _access = self.store.write_entity(&pattern_lock_key(id)).await?;

        let before = self.load(id)?;
        let mut after = before.clone();
        after.reinforce(delta, Utc::now());

        let previous = serde_json::to_vec(&before)?;
        let encoded = serde_json::to_vec(&after)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::Pattern,
            id.to_string(),
            Operation::Update,
            &self.actor,
            json!({ "frequency": { "from": before.frequency, "to": after.frequency } }),
        )?;

        self.store.commit(Collection::Patterns, &entry, |tree| {
            let key = id.to_key();
            match tree.get(key)? {
                Some(current) if &current[..] == previous.as_slice() => {}
                Some(_) => {
                    return abort(VaultError::Concurrency(format!(
                        "pattern {} changed during update",
                        id
                    )))
                }
                None => return abort(VaultError::NotFound(format!("pattern {}", id))),
            }
            tree.insert(key.to_vec(), encoded.as_slice())?;
            Ok::<_, ConflictableTransactionError<VaultError>>(())
        })?;

        debug!(pattern_id = %id, frequency = after.frequency, "Reinforced pattern");
        Ok(after)
    }

    async fn get_statistics(&self) -> VaultResult<VaultStatistics> {
        let _access = self.store.read().await?;

        let patterns: Vec<Pattern> = self.store.scan(Collection::Patterns)?;
        let backups: Vec<BackupRecord> = scan_tree(&self.store.trees().backups)?;

        let mut stats = VaultStatistics {
            total_patterns: patterns.len(),
            by_discipline: Discipline::ALL.iter().map(|d| (*d, 0)).collect(),
            total_symbols: self.store.count(Collection::Symbols),
            total_preferences: self.store.count(Collection::Preferences),
            learned_contexts: self.store.count(Collection::LearnedContexts),
            pattern_relationships: self.store.count(Collection::Relationships),
            documents_analyzed: self.store.count(Collection::Documents),
            change_log_entries: self.store.trees().change_log.len(),
            valid_backups: backups.iter().filter(|b| b.is_valid()).count(),
            ..Default::default()
        };

        let mut total_frequency: u128 = 0;
        for pattern in &patterns {
            *stats.by_discipline.entry(pattern.discipline()).or_insert(0) += 1;
            *stats
                .by_pattern_type
                .entry(pattern.pattern_type.clone())
                .or_insert(0) += 1;
            total_frequency += u128::from(pattern.frequency);
        }
        if !patterns.is_empty() {
            stats.mean_frequency = total_frequency as f64 / patterns.len() as f64;
        }

        Ok(stats)
    }

    async fn get_pattern(&self, id: PatternId) -> VaultResult<Option<Pattern>> {
        let _access = self.store.read().await?;
        self.store.get(Collection::Patterns, &id.to_key())
    }

    async fn list_patterns(&self, discipline: Option<Discipline>) -> VaultResult<Vec<Pattern>> {
        let _access = self.store.read().await?;
        let patterns: Vec<Pattern> = self.store.scan(Collection::Patterns)?;
        Ok(patterns
            .into_iter()
            .filter(|p| discipline.map_or(true, |d| p.discipline() == d))
            .collect())
    }

    async fn delete_pattern(&self, id: PatternId) -> VaultResult<Pattern> {
        let lock_key = pattern_lock_key(id);
        let removed = {
            let _access = self.store.write_entity(&lock_key).await?;
            let pattern = self.load(id)?;
            let entry = AuditLog::entry(
                &self.store,
                EntityType::Pattern,
                id.to_string(),
                Operation::Delete,
                &self.actor,
                serde_json::to_value(&pattern)?,
            )?;

            self.store.commit(Collection::Patterns, &entry, |tree| {
                match tree.remove(id.to_key().to_vec())? {
                    Some(raw) => decode::<Pattern>(&raw).map_err(ConflictableTransactionError::Abort),
                    None => abort(VaultError::NotFound(format!("pattern {}", id))),
                }
            })?
        };

        info!(pattern_id = %id, "Deleted pattern");
        Ok(removed)
    }

    async fn add_context(&self, pattern_id: PatternId, context: NewLearnedContext) -> VaultResult<LearnedContext> {
        // The pattern's own lock keeps a concurrent delete out until we commit.
        let _access = self.store.write_entity(&pattern_lock_key(pattern_id)).await?;
        self.load(pattern_id)?;

        let id = ContextId(self.store.generate_id()?);
        let learned = context.into_context(id, pattern_id, Utc::now())?;
        let encoded = serde_json::to_vec(&learned)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::LearnedContext,
            id.to_string(),
            Operation::Create,
            &self.actor,
            serde_json::to_value(&learned)?,
        )?;

        self.store.commit(Collection::LearnedContexts, &entry, |tree| {
            tree.insert(id.to_key().to_vec(), encoded.as_slice())?;
            Ok(())
        })?;

        debug!(
            pattern_id = %pattern_id,
            context_id = %id,
            confidence = learned.confidence,
            "Learned pattern context"
        );
        Ok(learned)
    }

    async fn get_contexts(&self, pattern_id: PatternId) -> VaultResult<Vec<LearnedContext>> {
        let _access = self.store.read().await?;
        let contexts: Vec<LearnedContext> = self.store.scan(Collection::LearnedContexts)?;
        Ok(contexts
            .into_iter()
            .filter(|c| c.pattern_id == pattern_id)
            .collect())
    }

    async fn add_relationship(
        &self,
        source: PatternId,
        target: PatternId,
        relationship_type: RelationshipType,
        similarity_score: f64,
    ) -> VaultResult<PatternRelationship> {
        let _access = self.store.write().await?;
        self.load(source)?;
        self.load(target)?;

        let id = RelationshipId(self.store.generate_id()?);
        let link = PatternRelationship::new(id, source, target, relationship_type, similarity_score, Utc::now())?;
        let encoded = serde_json::to_vec(&link)?;
        let entry = AuditLog::entry(
            &self.store,
            EntityType::PatternRelationship,
            id.to_string(),
            Operation::Create,
            &self.actor,
            serde_json::to_value(&link)?,
        )?;

        self.store.commit(Collection::Relationships, &entry, |tree| {
            tree.insert(id.to_key().to_vec(), encoded.as_slice())?;
            Ok(())
        })?;

        info!(
            relationship_id = %id,
            source = %source,
            target = %target,
            relationship_type = %relationship_type,
            "Linked patterns"
        );
        Ok(link)
    }

    async fn get_relationships(&self, pattern_id: PatternId) -> VaultResult<Vec<PatternRelationship>> {
        let _access = self.store.read().await?;
        let links: Vec<PatternRelationship> = self.store.scan(Collection::Relationships)?;
        Ok(links.into_iter().filter(|l| l.involves(pattern_id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuditFilter;

    fn repository() -> (Arc<Store>, SledPatternRepository) {
        let store = Arc::new(Store::temporary().unwrap());
        let repo = SledPatternRepository::new(store.clone(), MatchScorer::default()).with_actor("tester");
        (store, repo)
    }

    #[tokio::test]
    async fn test_add_then_get_round_trips() {
        let (store, repo) = repository();
        let candidate = NewPattern::new(Discipline::Chemistry, "reaction")
            .with_latex("2H_2 + O_2 \\rightarrow 2H_2O")
            .with_mathml("<math/>")
            .with_context_words(["Combustione", "acqua"]);

        let id = repo.add_pattern(candidate).await.unwrap();
        let stored = repo.get_pattern(id).await.unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.discipline(), Discipline::Chemistry);
        assert_eq!(stored.frequency, 1);
        assert!(stored.context_words.contains("Combustione"));

        let log: Vec<_> = AuditLog::new(store)
            .query(AuditFilter::entity(EntityType::Pattern, id.to_string()))
            .collect::<VaultResult<_>>()
            .unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, Operation::Create);
        assert_eq!(log[0].actor, "tester");
    }

    #[tokio::test]
    async fn test_missing_pattern_type_is_rejected_without_audit() {
        let (store, repo) = repository();
        let candidate = NewPattern {
            discipline: Some(Discipline::Physics),
            pattern_type: Some("   ".into()),
            ..Default::default()
        };
        let err = repo.add_pattern(candidate).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
        assert!(AuditLog::new(store).is_empty());
    }

    #[tokio::test]
    async fn test_reinforce_unknown_pattern_is_not_found() {
        let (_, repo) = repository();
        let err = repo.update_pattern_frequency(PatternId(404), 1).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zero_delta_is_rejected() {
        let (_, repo) = repository();
        let id = repo
            .add_pattern(NewPattern::new(Discipline::Generic, "note"))
            .await
            .unwrap();
        let err = repo.update_pattern_frequency(id, 0).await.unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn test_ties_prefer_frequency_then_age() {
        let (_, repo) = repository();
        let older = repo
            .add_pattern(NewPattern::new(Discipline::Mathematics, "sum").with_latex("\\sum x"))
            .await
            .unwrap();
        let newer = repo
            .add_pattern(NewPattern::new(Discipline::Mathematics, "sum").with_latex("\\sum x"))
            .await
            .unwrap();

        let query = SimilarityQuery::new(10).latex("\\sum x");
        let results = repo.find_similar_patterns(&query).await.unwrap();
        assert_eq!(results[0].pattern.id, older);
        assert_eq!(results[1].pattern.id, newer);

        repo.update_pattern_frequency(newer, 1).await.unwrap();
        let results = repo.find_similar_patterns(&query).await.unwrap();
        assert_eq!(results[0].pattern.id, newer);
    }

    #[tokio::test]
    async fn test_discipline_filter_and_limit() {
        let (_, repo) = repository();
        for d in [Discipline::Physics, Discipline::Physics, Discipline::Biology] {
            repo.add_pattern(NewPattern::new(d, "law")).await.unwrap();
        }
        let query = SimilarityQuery::new(1).discipline(Discipline::Physics);
        let results = repo.find_similar_patterns(&query).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].pattern.discipline(), Discipline::Physics);
        assert!(repo
            .find_similar_patterns(&SimilarityQuery::new(0))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_records_entry_and_blocks_further_updates() {
        let (store, repo) = repository();
        let id = repo
            .add_pattern(NewPattern::new(Discipline::Statistics, "distribution"))
            .await
            .unwrap();
        let removed = repo.delete_pattern(id).await.unwrap();
        assert_eq!(removed.id, id);
        assert!(repo.get_pattern(id).await.unwrap().is_none());

        let err = repo.update_pattern_frequency(id, 1).await.unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert_eq!(AuditLog::new(store).len(), 2);
    }

    #[tokio::test]
    async fn test_statistics_cover_every_discipline() {
        let (_, repo) = repository();
        let id = repo
            .add_pattern(NewPattern::new(Discipline::Engineering, "circuit"))
            .await
            .unwrap();
        repo.update_pattern_frequency(id, 2).await.unwrap();
        repo.add_pattern(NewPattern::new(Discipline::Engineering, "beam"))
            .await
            .unwrap();

        let stats = repo.get_statistics().await.unwrap();
        assert_eq!(stats.total_patterns, 2);
        assert_eq!(stats.by_discipline.len(), Discipline::ALL.len());
        assert_eq!(stats.by_discipline[&Discipline::Engineering], 2);
        assert_eq!(stats.by_discipline[&Discipline::Biology], 0);
        assert_eq!(stats.by_pattern_type["circuit"], 1);
        assert!((stats.mean_frequency - 2.0).abs() < 1e-9);
        assert_eq!(stats.change_log_entries, 3);
    }

    #[tokio::test]
    async fn test_context_requires_existing_pattern() {
        let (store, repo) = repository();
        let err = repo
            .add_context(PatternId(404), NewLearnedContext::new("area sotto la curva"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        assert!(AuditLog::new(store).is_empty());
    }

    #[tokio::test]
    async fn test_contexts_are_audited_and_listed_per_pattern() {
        let (store, repo) = repository();
        let integral = repo
            .add_pattern(NewPattern::new(Discipline::Mathematics, "definite_integral"))
            .await
            .unwrap();
        let other = repo
            .add_pattern(NewPattern::new(Discipline::Mathematics, "matrix"))
            .await
            .unwrap();

        let first = repo
            .add_context(
                integral,
                NewLearnedContext::new("Calcoliamo l'area sotto la curva")
                    .with_figure_references(["Fig. 3.2"])
                    .with_chapter_section("3.1")
                    .with_document_type("textbook"),
            )
            .await
            .unwrap();
        repo.add_context(other, NewLearnedContext::new("il determinante").with_confidence(0.9))
            .await
            .unwrap();

        let contexts = repo.get_contexts(integral).await.unwrap();
        assert_eq!(contexts, vec![first.clone()]);
        assert_eq!(first.confidence, 0.5);
        assert_eq!(first.figure_references, vec!["Fig. 3.2".to_string()]);

        let log: Vec<_> = AuditLog::new(store)
            .query(AuditFilter::all().of_type(EntityType::LearnedContext))
            .collect::<VaultResult<_>>()
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(repo.get_statistics().await.unwrap().learned_contexts, 2);
    }

    #[tokio::test]
    async fn test_relationships_link_existing_patterns_only() {
        let (_, repo) = repository();
        let general = repo
            .add_pattern(NewPattern::new(Discipline::Physics, "law"))
            .await
            .unwrap();
        let special = repo
            .add_pattern(NewPattern::new(Discipline::Physics, "law"))
            .await
            .unwrap();

        let err = repo
            .add_relationship(general, PatternId(404), RelationshipType::Variant, 0.4)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
        let err = repo
            .add_relationship(general, general, RelationshipType::Variant, 0.4)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));

        let link = repo
            .add_relationship(special, general, RelationshipType::Generalization, 0.7)
            .await
            .unwrap();
        assert_eq!(repo.get_relationships(general).await.unwrap(), vec![link.clone()]);
        assert_eq!(repo.get_relationships(special).await.unwrap(), vec![link]);
        assert_eq!(repo.get_statistics().await.unwrap().pattern_relationships, 1);
    }
}
