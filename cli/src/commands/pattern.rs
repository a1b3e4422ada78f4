// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pattern catalogue commands
//!
//! Commands: add, search, show, reinforce, list, delete, learn, contexts,
//! relate, related

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use corpus_vault::{
    Discipline, NewLearnedContext, NewPattern, Pattern, PatternId, PatternRepository,
    RelationshipType, ScoredPattern, SimilarityQuery, VaultError,
};

use crate::embedded::EmbeddedVault;

#[derive(Subcommand)]
pub enum PatternCommand {
    /// Register a new pattern (frequency starts at 1)
    Add {
        /// Discipline (mathematics, physics, chemistry, ...)
        #[arg(short, long)]
        discipline: Option<Discipline>,

        /// Pattern type, e.g. definite_integral
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        pattern_type: Option<String>,

        #[arg(long)]
        latex: Option<String>,

        #[arg(long)]
        mathml: Option<String>,

        /// Context words, comma separated
        #[arg(long, value_delimiter = ',')]
        context: Vec<String>,

        /// Hex-encoded visual fingerprint
        #[arg(long, value_name = "HEX")]
        visual: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Text-to-speech rule
        #[arg(long)]
        tts_rule: Option<String>,

        /// Read the candidate from a JSON file; flags override its fields
        #[arg(long, value_name = "FILE")]
        from_file: Option<PathBuf>,
    },

    /// Rank stored patterns by similarity
    Search {
        #[arg(long)]
        latex: Option<String>,

        #[arg(short, long)]
        discipline: Option<Discipline>,

        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Context words, comma separated
        #[arg(long, value_delimiter = ',')]
        context: Vec<String>,

        /// Hex-encoded visual fingerprint
        #[arg(long, value_name = "HEX")]
        visual: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one pattern
    Show {
        id: PatternId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reinforce a recognized pattern
    Reinforce {
        id: PatternId,

        /// Frequency increment
        #[arg(long, default_value = "1")]
        by: u64,
    },

    /// List patterns
    List {
        #[arg(short, long)]
        discipline: Option<Discipline>,
    },

    /// Delete a pattern
    Delete { id: PatternId },

    /// Record a context in which a pattern was observed
    Learn {
        id: PatternId,

        /// Text surrounding the occurrence
        #[arg(long)]
        text: String,

        /// Referenced figures, comma separated
        #[arg(long, value_delimiter = ',')]
        figures: Vec<String>,

        /// Chapter or section, e.g. 3.1
        #[arg(long)]
        section: Option<String>,

        #[arg(long)]
        document_type: Option<String>,

        /// Confidence in [0, 1] (default 0.5)
        #[arg(long)]
        confidence: Option<f64>,
    },

    /// List the contexts learned for a pattern
    Contexts {
        id: PatternId,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Link two patterns
    Relate {
        source: PatternId,
        target: PatternId,

        /// variant, simplification or generalization
        #[arg(short = 't', long = "type", value_name = "TYPE")]
        relationship_type: RelationshipType,

        /// Similarity in [0, 1]
        #[arg(long)]
        score: f64,
    },

    /// List relationships of a pattern
    Related { id: PatternId },
}

pub async fn handle_command(command: PatternCommand, config_path: Option<PathBuf>) -> Result<()> {
    let vault = EmbeddedVault::open(config_path)?;

    let result = match command {
        PatternCommand::Add {
            discipline,
            pattern_type,
            latex,
            mathml,
            context,
            visual,
            description,
            tts_rule,
            from_file,
        } => {
            let mut candidate = match from_file {
                Some(path) => read_candidate(&path)?,
                None => NewPattern::default(),
            };
            if discipline.is_some() {
                candidate.discipline = discipline;
            }
            if pattern_type.is_some() {
                candidate.pattern_type = pattern_type;
            }
            if let Some(latex) = latex {
                candidate.latex = latex;
            }
            if let Some(mathml) = mathml {
                candidate.mathml = mathml;
            }
            if !context.is_empty() {
                candidate = candidate.with_context_words(
                    context.iter().map(|w| w.trim()).filter(|w| !w.is_empty()),
                );
            }
            if let Some(visual) = visual {
                candidate.visual_signature = Some(visual);
            }
            if description.is_some() {
                candidate.description = description;
            }
            if tts_rule.is_some() {
                candidate.tts_rule = tts_rule;
            }
            add(&vault, candidate).await
        }
        PatternCommand::Search {
            latex,
            discipline,
            limit,
            context,
            visual,
            json,
        } => {
            let mut query = SimilarityQuery::new(limit).context(context);
            if let Some(latex) = latex {
                query = query.latex(latex);
            }
            if let Some(discipline) = discipline {
                query = query.discipline(discipline);
            }
            if let Some(visual) = visual {
                query = query.visual_signature(visual);
            }
            search(&vault, &query, json).await
        }
        PatternCommand::Show { id, json } => show(&vault, id, json).await,
        PatternCommand::Reinforce { id, by } => reinforce(&vault, id, by).await,
        PatternCommand::List { discipline } => list(&vault, discipline).await,
        PatternCommand::Delete { id } => delete(&vault, id).await,
        PatternCommand::Learn {
            id,
            text,
            figures,
            section,
            document_type,
            confidence,
        } => {
            let context = NewLearnedContext {
                surrounding_text: text,
                figure_references: figures,
                chapter_section: section,
                document_type,
                confidence,
            };
            learn(&vault, id, context).await
        }
        PatternCommand::Contexts { id, json } => contexts(&vault, id, json).await,
        PatternCommand::Relate {
            source,
            target,
            relationship_type,
            score,
        } => relate(&vault, source, target, relationship_type, score).await,
        PatternCommand::Related { id } => related(&vault, id).await,
    };

    vault.close()?;
    result
}

fn read_candidate(path: &Path) -> Result<NewPattern> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pattern file {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid pattern file {:?}", path))
}

async fn add(vault: &EmbeddedVault, candidate: NewPattern) -> Result<()> {
    let id = vault
        .patterns()
        .add_pattern(candidate)
        .await
        .context("Failed to add pattern")?;

    println!("{}", format!("✓ Pattern {} added", id).green());
    Ok(())
}

async fn search(vault: &EmbeddedVault, query: &SimilarityQuery, json: bool) -> Result<()> {
    let results = vault
        .patterns()
        .find_similar_patterns(query)
        .await
        .context("Pattern search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("{}", "No matching patterns".yellow());
        return Ok(());
    }

    println!("{}", format!("{} match(es):", results.len()).bold());
    for ScoredPattern { pattern, score } in &results {
        println!(
            "  {:>6}  {:.3}  {} {} ×{}",
            pattern.id.to_string().cyan(),
            score,
            pattern.discipline().to_string().dimmed(),
            pattern.pattern_type.bold(),
            pattern.frequency
        );
        if !pattern.latex.is_empty() {
            println!("          {}", pattern.latex);
        }
    }
    Ok(())
}

async fn show(vault: &EmbeddedVault, id: PatternId, json: bool) -> Result<()> {
    let pattern = vault
        .patterns()
        .get_pattern(id)
        .await?
        .ok_or_else(|| VaultError::NotFound(format!("pattern {}", id)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pattern)?);
        return Ok(());
    }

    print_pattern(&pattern);
    Ok(())
}

fn print_pattern(pattern: &Pattern) {
    println!("{}", format!("Pattern {}", pattern.id).bold());
    println!("  Discipline: {}", pattern.discipline());
    println!("  Type: {}", pattern.pattern_type);
    println!("  Frequency: {}", pattern.frequency);
    if !pattern.latex.is_empty() {
        println!("  LaTeX: {}", pattern.latex);
    }
    if !pattern.mathml.is_empty() {
        println!("  MathML: {}", pattern.mathml);
    }
    if !pattern.context_words.is_empty() {
        let words: Vec<&str> = pattern.context_words.iter().map(String::as_str).collect();
        println!("  Context: {}", words.join(", "));
    }
    if let Some(signature) = &pattern.visual_signature {
        println!("  Visual: {}", signature);
    }
    if let Some(description) = &pattern.description {
        println!("  Description: {}", description);
    }
    if let Some(rule) = &pattern.tts_rule {
        println!("  TTS rule: {}", rule);
    }
    println!("  Source: {:?}", pattern.source);
    println!("  Created: {}", pattern.created_at.to_rfc3339());
    println!("  Updated: {}", pattern.updated_at.to_rfc3339());
}

async fn reinforce(vault: &EmbeddedVault, id: PatternId, by: u64) -> Result<()> {
    let pattern = vault
        .patterns()
        .update_pattern_frequency(id, by)
        .await
        .with_context(|| format!("Failed to reinforce pattern {}", id))?;

    println!(
        "{}",
        format!("✓ Pattern {} frequency is now {}", id, pattern.frequency).green()
    );
    Ok(())
}

async fn list(vault: &EmbeddedVault, discipline: Option<Discipline>) -> Result<()> {
    let patterns = vault.patterns().list_patterns(discipline).await?;

    if patterns.is_empty() {
        println!("{}", "No patterns stored".yellow());
        return Ok(());
    }

    for pattern in &patterns {
        println!(
            "  {:>6}  {:<18} {:<28} ×{}",
            pattern.id.to_string().cyan(),
            pattern.discipline().to_string(),
            pattern.pattern_type,
            pattern.frequency
        );
    }
    println!("{}", format!("{} pattern(s)", patterns.len()).dimmed());
    Ok(())
}

async fn delete(vault: &EmbeddedVault, id: PatternId) -> Result<()> {
    vault
        .patterns()
        .delete_pattern(id)
        .await
        .with_context(|| format!("Failed to delete pattern {}", id))?;

    println!("{}", format!("✓ Pattern {} deleted", id).green());
    Ok(())
}

async fn learn(vault: &EmbeddedVault, id: PatternId, context: NewLearnedContext) -> Result<()> {
    let learned = vault
        .patterns()
        .add_context(id, context)
        .await
        .with_context(|| format!("Failed to record context for pattern {}", id))?;

    println!(
        "{}",
        format!("✓ Context {} recorded for pattern {}", learned.id, id).green()
    );
    Ok(())
}

async fn contexts(vault: &EmbeddedVault, id: PatternId, json: bool) -> Result<()> {
    let contexts = vault.patterns().get_contexts(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&contexts)?);
        return Ok(());
    }

    if contexts.is_empty() {
        println!("{}", format!("No contexts learned for pattern {}", id).yellow());
        return Ok(());
    }

    for context in &contexts {
        let section = context.chapter_section.as_deref().unwrap_or("-");
        println!(
            "  {:>6}  {:.2}  §{}  {}",
            context.id.to_string().cyan(),
            context.confidence,
            section,
            context.surrounding_text
        );
        if !context.figure_references.is_empty() {
            println!("          figures: {}", context.figure_references.join(", ").dimmed());
        }
    }
    Ok(())
}

async fn relate(
    vault: &EmbeddedVault,
    source: PatternId,
    target: PatternId,
    relationship_type: RelationshipType,
    score: f64,
) -> Result<()> {
    let link = vault
        .patterns()
        .add_relationship(source, target, relationship_type, score)
        .await
        .with_context(|| format!("Failed to link patterns {} and {}", source, target))?;

    println!(
        "{}",
        format!(
            "✓ Pattern {} recorded as {} of {} ({})",
            target, link.relationship_type, source, link.id
        )
        .green()
    );
    Ok(())
}

async fn related(vault: &EmbeddedVault, id: PatternId) -> Result<()> {
    let links = vault.patterns().get_relationships(id).await?;

    if links.is_empty() {
        println!("{}", format!("Pattern {} has no relationships", id).yellow());
        return Ok(());
    }

    for link in &links {
        println!(
            "  {:>6}  {} → {}  {:<15} {:.2}",
            link.id.to_string().cyan(),
            link.source,
            link.target,
            link.relationship_type.to_string(),
            link.similarity_score
        );
    }
    Ok(())
}
