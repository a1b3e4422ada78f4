// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Corpus Knowledge
//!
//! What the vault learns around its patterns while documents are analyzed:
//!
//! - [`LearnedContext`]: one observation of a pattern in a document, with the
//!   surrounding text, figure references and where it was found.
//! - [`AnalyzedDocument`]: a document registered once per content hash, so the
//!   same file is never analyzed twice.
//! - [`PatternRelationship`]: a typed, scored link between two patterns.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::{VaultError, VaultResult};
use super::pattern::{Discipline, PatternId};

/// Confidence assigned to a learned context when the caller gives none.
pub const DEFAULT_CONTEXT_CONFIDENCE: f64 = 0.5;

macro_rules! sequence_id {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn to_key(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = VaultError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| VaultError::Validation(format!(concat!("invalid ", $what, " id '{}'"), s)))
            }
        }
    };
}

sequence_id!(ContextId, "context");
sequence_id!(DocumentId, "document");
sequence_id!(RelationshipId, "relationship");

fn check_unit_interval(what: &str, value: f64) -> VaultResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(VaultError::Validation(format!(
            "{} must lie in [0, 1], got {}",
            what, value
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedContext {
    pub id: ContextId,
    pub pattern_id: PatternId,
    pub surrounding_text: String,
    #[serde(default)]
    pub figure_references: Vec<String>,
    #[serde(default)]
    pub chapter_section: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// A context observation before it is attached to a pattern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLearnedContext {
    pub surrounding_text: String,
    #[serde(default)]
    pub figure_references: Vec<String>,
    #[serde(default)]
    pub chapter_section: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl NewLearnedContext {
    pub fn new(surrounding_text: impl Into<String>) -> Self {
        Self {
            surrounding_text: surrounding_text.into(),
            ..Default::default()
        }
    }

    pub fn with_figure_references<I, S>(mut self, figures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.figure_references = figures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_chapter_section(mut self, section: impl Into<String>) -> Self {
        self.chapter_section = Some(section.into());
        self
    }

    pub fn with_document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn into_context(
        self,
        id: ContextId,
        pattern_id: PatternId,
        now: DateTime<Utc>,
    ) -> VaultResult<LearnedContext> {
        if self.surrounding_text.trim().is_empty() {
            return Err(VaultError::Validation("surrounding text cannot be empty".to_string()));
        }
        let confidence = self.confidence.unwrap_or(DEFAULT_CONTEXT_CONFIDENCE);
        check_unit_interval("context confidence", confidence)?;

        Ok(LearnedContext {
            id,
            pattern_id,
            surrounding_text: self.surrounding_text,
            figure_references: self.figure_references,
            chapter_section: self.chapter_section,
            document_type: self.document_type,
            confidence,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedDocument {
    pub id: DocumentId,
    pub filename: String,
    /// Hex SHA-256 of the file content. Unique across the vault.
    pub file_hash: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub discipline: Option<Discipline>,
    pub patterns_extracted: u64,
    pub analyzed_at: DateTime<Utc>,
}

/// Content fingerprint used to recognise an already analyzed document.
pub fn document_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipType {
    Variant,
    Simplification,
    Generalization,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelationshipType::Variant => "variant",
            RelationshipType::Simplification => "simplification",
            RelationshipType::Generalization => "generalization",
        })
    }
}

impl FromStr for RelationshipType {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "variant" => Ok(RelationshipType::Variant),
            "simplification" => Ok(RelationshipType::Simplification),
            "generalization" => Ok(RelationshipType::Generalization),
            other => Err(VaultError::Validation(format!(
                "unknown relationship type '{}'",
                other
            ))),
        }
    }
}

/// Directed link: `target` is a variant, simplification or generalization of
/// `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRelationship {
    pub id: RelationshipId,
    pub source: PatternId,
    pub target: PatternId,
    pub relationship_type: RelationshipType,
    pub similarity_score: f64,
    pub created_at: DateTime<Utc>,
}

impl PatternRelationship {
    pub fn new(
        id: RelationshipId,
        source: PatternId,
        target: PatternId,
        relationship_type: RelationshipType,
        similarity_score: f64,
        now: DateTime<Utc>,
    ) -> VaultResult<Self> {
        if source == target {
            return Err(VaultError::Validation(format!(
                "pattern {} cannot be related to itself",
                source
            )));
        }
        check_unit_interval("similarity score", similarity_score)?;
        Ok(Self {
            id,
            source,
            target,
            relationship_type,
            similarity_score,
            created_at: now,
        })
    }

    pub fn involves(&self, pattern: PatternId) -> bool {
        self.source == pattern || self.target == pattern
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_confidence_defaults_and_is_bounded() {
        let context = NewLearnedContext::new("l'area sotto la curva")
            .into_context(ContextId(1), PatternId(2), Utc::now())
            .unwrap();
        assert_eq!(context.confidence, DEFAULT_CONTEXT_CONFIDENCE);

        for bad in [-0.1, 1.5, f64::NAN] {
            let err = NewLearnedContext::new("testo")
                .with_confidence(bad)
                .into_context(ContextId(1), PatternId(2), Utc::now())
                .unwrap_err();
            assert!(matches!(err, VaultError::Validation(_)));
        }
    }

    #[test]
    fn test_blank_surrounding_text_is_rejected() {
        let err = NewLearnedContext::new("  \n")
            .into_context(ContextId(1), PatternId(2), Utc::now())
            .unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn test_document_hash_is_sha256_hex() {
        assert_eq!(
            document_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_relationship_rejects_self_link_and_bad_score() {
        let now = Utc::now();
        assert!(PatternRelationship::new(
            RelationshipId(1),
            PatternId(4),
            PatternId(4),
            RelationshipType::Variant,
            0.5,
            now
        )
        .is_err());
        assert!(PatternRelationship::new(
            RelationshipId(1),
            PatternId(4),
            PatternId(5),
            RelationshipType::Variant,
            1.2,
            now
        )
        .is_err());

        let link = PatternRelationship::new(
            RelationshipId(1),
            PatternId(4),
            PatternId(5),
            RelationshipType::Simplification,
            0.8,
            now,
        )
        .unwrap();
        assert!(link.involves(PatternId(5)));
        assert!(!link.involves(PatternId(6)));
    }

    #[test]
    fn test_relationship_type_parsing() {
        assert_eq!(
            "Generalization".parse::<RelationshipType>().unwrap(),
            RelationshipType::Generalization
        );
        assert!("synonym".parse::<RelationshipType>().is_err());
    }
}
