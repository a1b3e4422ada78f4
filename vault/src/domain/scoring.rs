// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Match Scorer
//!
//! Deterministic multi-factor similarity used to recognize previously unseen
//! content against catalogued patterns:
//!
//! ```text
//! score = w1·latex_sim + w2·visual_sim + w3·context_sim + w4·freq_sim
//! ```
//!
//! Components that cannot be computed for a query/pattern pair are dropped and
//! the remaining weights renormalized, so the result always lies in `[0, 1]`.
//!
//! - `latex_sim`: 1 − normalized edit distance over LaTeX tokens
//! - `visual_sim`: bitwise agreement of two perceptual hashes
//! - `context_sim`: Jaccard index of the context word sets
//! - `freq_sim`: `ln(1+f) / ln(1+max_f)` within the pattern's discipline

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::error::{VaultError, VaultResult};
use super::pattern::{normalize_context_words, Pattern};

/// Commands that only affect spacing or delimiter sizing.
const LAYOUT_COMMANDS: &[&str] = &[
    "\\,", "\\;", "\\:", "\\!", "\\ ", "\\quad", "\\qquad", "\\left", "\\right", "\\displaystyle",
    "\\textstyle", "\\big", "\\Big", "\\bigg", "\\Bigg",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub latex: f64,
    pub visual: f64,
    pub context: f64,
    pub frequency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latex: 0.4,
            visual: 0.3,
            context: 0.2,
            frequency: 0.1,
        }
    }
}

impl ScoreWeights {
    pub fn validate(&self) -> VaultResult<()> {
        let all = [self.latex, self.visual, self.context, self.frequency];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(VaultError::Validation(
                "scoring weights must be finite and non-negative".to_string(),
            ));
        }
        if all.iter().sum::<f64>() <= 0.0 {
            return Err(VaultError::Validation(
                "scoring weights must not all be zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MatchScorer {
    weights: ScoreWeights,
}

impl MatchScorer {
    pub fn new(weights: ScoreWeights) -> VaultResult<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    /// Score `target` against a query.
    ///
    /// `max_frequency` is the highest frequency among patterns of the
    /// target's discipline in the snapshot being ranked.
    pub fn score(
        &self,
        candidate_latex: Option<&str>,
        target: &Pattern,
        context: Option<&BTreeSet<String>>,
        visual_similarity: Option<f64>,
        max_frequency: u64,
    ) -> f64 {
        let mut components: Vec<(f64, f64)> = Vec::with_capacity(4);

        if let Some(latex) = candidate_latex {
            components.push((self.weights.latex, latex_similarity(latex, &target.latex)));
        }
        if let Some(visual) = visual_similarity {
            components.push((self.weights.visual, visual.clamp(0.0, 1.0)));
        }
        if let Some(words) = context.filter(|w| !w.is_empty()) {
            components.push((self.weights.context, jaccard(words, &target.context_words)));
        }
        components.push((
            self.weights.frequency,
            frequency_similarity(target.frequency, max_frequency),
        ));

        let total_weight: f64 = components.iter().map(|(w, _)| w).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = components.iter().map(|(w, s)| w * s).sum();
        (weighted / total_weight).clamp(0.0, 1.0)
    }
}

/// Split LaTeX into command/symbol units.
///
/// `\frac` is one token, `\{` is one token, every other non-whitespace
/// character is its own token. Grouping braces and layout commands are not
/// tokens.
pub fn tokenize_latex(latex: &str) -> Vec<String> {
    let chars: Vec<char> = latex.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_ascii_alphabetic() {
                j += 1;
            }
            if j == i + 1 && j < chars.len() {
                // escaped single character such as \{ or \,
                j += 1;
            }
            let token: String = chars[i..j].iter().collect();
            i = j;
            if !LAYOUT_COMMANDS.contains(&token.as_str()) {
                tokens.push(token);
            }
            continue;
        }
        if !c.is_whitespace() && c != '{' && c != '}' {
            tokens.push(c.to_string());
        }
        i += 1;
    }

    tokens
}

/// Levenshtein distance over token slices.
pub fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, x) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(x != y);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

pub fn latex_similarity(candidate: &str, target: &str) -> f64 {
    let a = tokenize_latex(candidate);
    let b = tokenize_latex(target);
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

/// Jaccard index over trimmed, lowercased words. Two empty sets score 0.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let a = normalize_context_words(a);
    let b = normalize_context_words(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

pub fn frequency_similarity(frequency: u64, max_frequency: u64) -> f64 {
    if max_frequency == 0 {
        return 0.0;
    }
    let value = (1.0 + frequency as f64).ln() / (1.0 + max_frequency as f64).ln();
    value.clamp(0.0, 1.0)
}

/// Similarity of two visual signatures.
///
/// Equal-length hexadecimal hashes are compared bit by bit; any other pair
/// only matches when identical.
pub fn visual_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_ascii_lowercase();
    let b = b.trim().to_ascii_lowercase();

    match (hex::decode(&a), hex::decode(&b)) {
        (Ok(x), Ok(y)) if x.len() == y.len() && !x.is_empty() => {
            let differing: u32 = x.iter().zip(&y).map(|(p, q)| (p ^ q).count_ones()).sum();
            1.0 - differing as f64 / (x.len() * 8) as f64
        }
        _ => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
    }
}
