// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Content Patterns
//!
//! A [`Pattern`] is a catalogued symbolic structure (a definite integral form,
//! a reaction scheme, a distribution formula...) extracted from a scientific
//! document together with the words that surrounded it.
//!
//! Every pattern shares one core attribute set. Discipline-specific auxiliary
//! fields live in [`DisciplineDetails`], a tagged variant whose tag *is* the
//! pattern's discipline, so a chemistry pattern can never carry biology fields.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{VaultError, VaultResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternId(pub u64);

impl PatternId {
    /// Big-endian key so sled iterates patterns in allocation order.
    pub fn to_key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = key.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatternId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(PatternId)
            .map_err(|_| VaultError::Validation(format!("invalid pattern id '{}'", s)))
    }
}

/// Top-level subject classification of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Discipline {
    Mathematics,
    Physics,
    Chemistry,
    Biology,
    Engineering,
    ComputerScience,
    Statistics,
    Generic,
}

impl Discipline {
    pub const ALL: [Discipline; 8] = [
        Discipline::Mathematics,
        Discipline::Physics,
        Discipline::Chemistry,
        Discipline::Biology,
        Discipline::Engineering,
        Discipline::ComputerScience,
        Discipline::Statistics,
        Discipline::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Discipline::Mathematics => "mathematics",
            Discipline::Physics => "physics",
            Discipline::Chemistry => "chemistry",
            Discipline::Biology => "biology",
            Discipline::Engineering => "engineering",
            Discipline::ComputerScience => "computer-science",
            Discipline::Statistics => "statistics",
            Discipline::Generic => "generic",
        }
    }
}

impl fmt::Display for Discipline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Discipline {
    type Err = VaultError;

    /// Accepts both `computer-science` and `computer_science`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Discipline::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| VaultError::Validation(format!("unknown discipline '{}'", s)))
    }
}

/// Discipline-specific auxiliary attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "discipline", rename_all = "kebab-case")]
pub enum DisciplineDetails {
    Mathematics {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
    },
    Physics {
        #[serde(default)]
        units: Vec<String>,
        #[serde(default)]
        constants: Vec<String>,
    },
    Chemistry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        molecular_formula: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reaction_type: Option<String>,
    },
    Biology {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        taxonomy_rank: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nomenclature: Option<String>,
    },
    Engineering {
        #[serde(default)]
        units: Vec<String>,
    },
    ComputerScience {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notation: Option<String>,
    },
    Statistics {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        distribution: Option<String>,
    },
    Generic,
}

impl DisciplineDetails {
    /// Details with every auxiliary field unset.
    pub fn empty(discipline: Discipline) -> Self {
        match discipline {
            Discipline::Mathematics => DisciplineDetails::Mathematics { branch: None },
            Discipline::Physics => DisciplineDetails::Physics {
                units: Vec::new(),
                constants: Vec::new(),
            },
            Discipline::Chemistry => DisciplineDetails::Chemistry {
                molecular_formula: None,
                reaction_type: None,
            },
            Discipline::Biology => DisciplineDetails::Biology {
                taxonomy_rank: None,
                nomenclature: None,
            },
            Discipline::Engineering => DisciplineDetails::Engineering { units: Vec::new() },
            Discipline::ComputerScience => DisciplineDetails::ComputerScience { notation: None },
            Discipline::Statistics => DisciplineDetails::Statistics { distribution: None },
            Discipline::Generic => DisciplineDetails::Generic,
        }
    }

    pub fn discipline(&self) -> Discipline {
        match self {
            DisciplineDetails::Mathematics { .. } => Discipline::Mathematics,
            DisciplineDetails::Physics { .. } => Discipline::Physics,
            DisciplineDetails::Chemistry { .. } => Discipline::Chemistry,
            DisciplineDetails::Biology { .. } => Discipline::Biology,
            DisciplineDetails::Engineering { .. } => Discipline::Engineering,
            DisciplineDetails::ComputerScience { .. } => Discipline::ComputerScience,
            DisciplineDetails::Statistics { .. } => Discipline::Statistics,
            DisciplineDetails::Generic => Discipline::Generic,
        }
    }
}

/// Where a pattern was first observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternSource {
    WordAnalysis,
    PdfRecognition,
    #[default]
    UserInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub pattern_type: String,
    pub latex: String,
    pub mathml: String,
    pub context_words: BTreeSet<String>,
    pub visual_signature: Option<String>,
    pub frequency: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tts_rule: Option<String>,
    #[serde(default)]
    pub source: PatternSource,
    #[serde(flatten)]
    pub details: DisciplineDetails,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pattern {
    pub fn discipline(&self) -> Discipline {
        self.details.discipline()
    }

    /// Frequency reinforcement. Saturates instead of wrapping.
    pub fn reinforce(&mut self, delta: u64, now: DateTime<Utc>) {
        self.frequency = self.frequency.saturating_add(delta);
        self.updated_at = now;
    }
}

/// Candidate submitted by the extraction workflow.
///
/// `discipline` and `pattern_type` are optional here because upstream
/// extractors may fail to classify a structure; [`NewPattern::into_pattern`]
/// rejects such candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPattern {
    pub discipline: Option<Discipline>,
    pub pattern_type: Option<String>,
    #[serde(default)]
    pub latex: String,
    #[serde(default)]
    pub mathml: String,
    #[serde(default)]
    pub context_words: BTreeSet<String>,
    #[serde(default)]
    pub visual_signature: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tts_rule: Option<String>,
    #[serde(default)]
    pub source: PatternSource,
    #[serde(default)]
    pub details: Option<DisciplineDetails>,
}

impl NewPattern {
    pub fn new(discipline: Discipline, pattern_type: impl Into<String>) -> Self {
        Self {
            discipline: Some(discipline),
            pattern_type: Some(pattern_type.into()),
            ..Default::default()
        }
    }

    pub fn with_latex(mut self, latex: impl Into<String>) -> Self {
        self.latex = latex.into();
        self
    }

    pub fn with_mathml(mut self, mathml: impl Into<String>) -> Self {
        self.mathml = mathml.into();
        self
    }

    pub fn with_context_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.context_words = words.into_iter().map(|w| w.as_ref().to_string()).collect();
        self
    }

    pub fn with_visual_signature(mut self, signature: impl Into<String>) -> Self {
        self.visual_signature = Some(signature.into());
        self
    }

    pub fn with_source(mut self, source: PatternSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_details(mut self, details: DisciplineDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Validate the candidate and materialize it under `id`.
    pub fn into_pattern(self, id: PatternId, now: DateTime<Utc>) -> VaultResult<Pattern> {
        let discipline = self
            .discipline
            .ok_or_else(|| VaultError::Validation("discipline is required".to_string()))?;

        let pattern_type = self
            .pattern_type
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| VaultError::Validation("pattern_type is required".to_string()))?;

        let details = match self.details {
            Some(details) if details.discipline() != discipline => {
                return Err(VaultError::Validation(format!(
                    "details for '{}' supplied with discipline '{}'",
                    details.discipline(),
                    discipline
                )));
            }
            Some(details) => details,
            None => DisciplineDetails::empty(discipline),
        };

        Ok(Pattern {
            id,
            pattern_type,
            latex: self.latex,
            mathml: self.mathml,
            context_words: self.context_words,
            visual_signature: self.visual_signature.filter(|s| !s.trim().is_empty()),
            frequency: 1,
            description: self.description,
            tts_rule: self.tts_rule,
            source: self.source,
            details,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Lowercase, trim and de-duplicate context words, dropping blanks.
pub fn normalize_context_words<I, S>(words: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words
        .into_iter()
        .map(|w| w.as_ref().trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Split free surrounding text into context words.
pub fn context_words_from_text(text: &str) -> BTreeSet<String> {
    normalize_context_words(
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discipline_parsing_accepts_both_separators() {
        assert_eq!(
            "computer_science".parse::<Discipline>().unwrap(),
            Discipline::ComputerScience
        );
        assert_eq!(
            "Computer-Science".parse::<Discipline>().unwrap(),
            Discipline::ComputerScience
        );
        assert!(matches!(
            "alchemy".parse::<Discipline>(),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_discipline_is_rejected() {
        let candidate = NewPattern {
            pattern_type: Some("formula".into()),
            ..Default::default()
        };
        let err = candidate.into_pattern(PatternId(1), Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn test_blank_pattern_type_is_rejected() {
        let candidate = NewPattern::new(Discipline::Physics, "   ");
        let err = candidate.into_pattern(PatternId(1), Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[test]
    fn test_details_must_match_discipline() {
        let candidate = NewPattern::new(Discipline::Biology, "nomenclature").with_details(
            DisciplineDetails::Chemistry {
                molecular_formula: Some("H2O".into()),
                reaction_type: None,
            },
        );
        assert!(candidate.into_pattern(PatternId(3), Utc::now()).is_err());
    }

    #[test]
    fn test_pattern_json_carries_discipline_tag() {
        let pattern = NewPattern::new(Discipline::Chemistry, "reaction")
            .with_latex("A + B \\rightarrow C")
            .with_details(DisciplineDetails::Chemistry {
                molecular_formula: None,
                reaction_type: Some("synthesis".into()),
            })
            .into_pattern(PatternId(9), Utc::now())
            .unwrap();

        let json = serde_json::to_value(&pattern).unwrap();
        assert_eq!(json["discipline"], "chemistry");
        assert_eq!(json["reaction_type"], "synthesis");

        let back: Pattern = serde_json::from_value(json).unwrap();
        assert_eq!(back, pattern);
        assert_eq!(back.discipline(), Discipline::Chemistry);
    }

    #[test]
    fn test_context_words_from_text() {
        let words = context_words_from_text("Area sotto la curva, area!");
        assert!(words.contains("area"));
        assert!(words.contains("curva"));
        assert_eq!(words.iter().filter(|w| *w == "area").count(), 1);
    }

    #[test]
    fn test_pattern_id_key_ordering() {
        assert!(PatternId(2).to_key() > PatternId(1).to_key());
        assert_eq!(PatternId::from_key(&PatternId(42).to_key()), Some(PatternId(42)));
    }
}
