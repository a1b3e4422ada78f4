// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Symbols & Pronunciation Preferences
//!
//! Symbols carry a default spoken form plus ordered context rules
//! (`d` inside `dx` is read differently from a variable `d`). Students may
//! override any of it with their own [`UserPreference`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{VaultError, VaultResult};
use super::pattern::Discipline;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRule {
    /// Literal fragment that must appear in the surrounding text.
    pub pattern: String,
    pub pronunciation: String,
}

impl ContextRule {
    pub fn new(pattern: impl Into<String>, pronunciation: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            pronunciation: pronunciation.into(),
        }
    }

    pub fn matches(&self, context: &str) -> bool {
        !self.pattern.is_empty() && context.contains(&self.pattern)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub symbol: String,
    pub discipline: Discipline,
    pub default_pronunciation: String,
    #[serde(default)]
    pub context_rules: Vec<ContextRule>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub latex_code: Option<String>,
    #[serde(default)]
    pub usage_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Symbol {
    pub fn key(&self) -> String {
        symbol_key(self.discipline, &self.symbol)
    }
}

/// Storage key and audit entity id of a symbol. Disciplines never contain `/`,
/// so the first separator is unambiguous.
pub fn symbol_key(discipline: Discipline, symbol: &str) -> String {
    format!("{}/{}", discipline, symbol)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSymbol {
    pub symbol: String,
    pub discipline: Option<Discipline>,
    pub default_pronunciation: String,
    #[serde(default)]
    pub context_rules: Vec<ContextRule>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub latex_code: Option<String>,
}

impl NewSymbol {
    pub fn new(
        symbol: impl Into<String>,
        discipline: Discipline,
        default_pronunciation: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            discipline: Some(discipline),
            default_pronunciation: default_pronunciation.into(),
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: ContextRule) -> Self {
        self.context_rules.push(rule);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn into_symbol(self, now: DateTime<Utc>) -> VaultResult<Symbol> {
        if self.symbol.trim().is_empty() {
            return Err(VaultError::Validation("symbol is required".to_string()));
        }
        let discipline = self
            .discipline
            .ok_or_else(|| VaultError::Validation("discipline is required".to_string()))?;
        if self.default_pronunciation.trim().is_empty() {
            return Err(VaultError::Validation(format!(
                "default pronunciation is required for '{}'",
                self.symbol
            )));
        }
        if self.context_rules.iter().any(|r| r.pattern.is_empty()) {
            return Err(VaultError::Validation("context rule pattern cannot be empty".to_string()));
        }

        Ok(Symbol {
            symbol: self.symbol,
            discipline,
            default_pronunciation: self.default_pronunciation,
            context_rules: self.context_rules,
            category: self.category,
            latex_code: self.latex_code,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreference {
    pub student_id: String,
    pub symbol: String,
    pub pronunciation: String,
    /// Empty means the preference applies in every context.
    #[serde(default)]
    pub context: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserPreference {
    pub fn key(&self) -> String {
        preference_key(&self.student_id, &self.symbol, &self.context)
    }
}

/// Storage key and audit entity id of a preference.
pub fn preference_key(student_id: &str, symbol: &str, context: &str) -> String {
    serde_json::json!([student_id, symbol, context]).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PronunciationSource {
    StudentPreference,
    ContextRule,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pronunciation {
    pub text: String,
    pub source: PronunciationSource,
}

/// Resolve how `symbol` is read aloud.
///
/// Order: the student's preference for this exact context, the student's
/// context-free preference, the first matching context rule, the default.
/// `preferences` must already be narrowed to one student and this symbol.
pub fn resolve_pronunciation(
    symbol: &Symbol,
    context: Option<&str>,
    preferences: &[UserPreference],
) -> Pronunciation {
    let context = context.unwrap_or("");

    let contextual = preferences
        .iter()
        .find(|p| !p.context.is_empty() && p.context == context);
    let general = preferences.iter().find(|p| p.context.is_empty());

    if let Some(pref) = contextual.or(general) {
        return Pronunciation {
            text: pref.pronunciation.clone(),
            source: PronunciationSource::StudentPreference,
        };
    }

    if let Some(rule) = symbol.context_rules.iter().find(|r| r.matches(context)) {
        return Pronunciation {
            text: rule.pronunciation.clone(),
            source: PronunciationSource::ContextRule,
        };
    }

    Pronunciation {
        text: symbol.default_pronunciation.clone(),
        source: PronunciationSource::Default,
    }
}
