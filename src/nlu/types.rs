//! Data model shared across the dispatch pipeline.
//!
//! `NluResult` is the artifact handed to the skill executor and returned to
//! the caller; everything else here is a piece of it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::brain::SkillResult;

// ── Entities ───────────────────────────────────────────

/// Character span of an entity inside the utterance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Discrete meaning carried by an entity, when the extractor resolved one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub value: String,
}

/// A named entity extracted from an utterance.
///
/// `entity` is the entity *type* name (e.g. `product`, `person`); the
/// matched text lives in `raw_text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub entity: String,
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub span: Span,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Entity {
    /// Shorthand used by tests and by the spaCy merge path.
    pub fn resolved(entity: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            entity: entity.into(),
            value: serde_json::Value::String(value.clone()),
            raw_text: value.clone(),
            span: Span::default(),
            resolution: Some(Resolution { value }),
        }
    }
}

// ── Resolvers ──────────────────────────────────────────

/// A discrete meaning label produced by a resolver classifier
/// (e.g. `answer = denial`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverMatch {
    pub name: String,
    pub value: String,
}

// ── Slots ──────────────────────────────────────────────

/// Filled slot value as exposed on `NluResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotValue {
    /// Entity type the slot was filled from.
    pub entity: String,
    pub value: serde_json::Value,
    pub is_filled: bool,
}

// ── Classification ─────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub domain: String,
    pub skill: String,
    pub action: String,
    /// In `[0, 1]`. Forced to `1` whenever the classification did not come
    /// from the main classifier (fallbacks, action loops, slot completion).
    pub confidence: f64,
}

impl Classification {
    pub fn certain(
        domain: impl Into<String>,
        skill: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            skill: skill.into(),
            action: action.into(),
            confidence: 1.0,
        }
    }

    /// `"{domain}.{skill}"`, the active-context name this classification
    /// binds to.
    pub fn context_name(&self) -> String {
        format!("{}.{}", self.domain, self.skill)
    }
}

/// Splits an intent string into its `(skill, action)` or
/// `(domain, skill, action)` segments.
pub(crate) fn intent_segments(intent: &str) -> Vec<&str> {
    intent.split('.').collect()
}

// ── NluResult ──────────────────────────────────────────

/// The decision produced for one utterance, passed to the skill executor.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NluResult {
    pub utterance: String,
    /// Entities present in the utterance just received.
    pub current_entities: Vec<Entity>,
    /// Entities inherited from the active context plus the current ones.
    pub entities: Vec<Entity>,
    pub current_resolvers: Vec<ResolverMatch>,
    pub resolvers: Vec<ResolverMatch>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub slots: HashMap<String, SlotValue>,
    /// Path to the skill's per-language config file. Opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_data_file_path: Option<PathBuf>,
    /// Lazy dialog answers produced by the classifier for dialog actions.
    pub answers: Vec<serde_json::Value>,
    pub classification: Classification,
}

// ── Turn outcomes ──────────────────────────────────────

/// A fully processed turn: the NLU decision, the skill executor's output,
/// and latency attribution.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTurn {
    /// Milliseconds from `process` entry to return.
    pub processing_time: u64,
    /// `processing_time` minus the skill's own execution time.
    pub nlu_processing_time: u64,
    pub nlu: NluResult,
    pub skill: SkillResult,
}

/// What one `process` call resolved to.
#[derive(Debug)]
pub enum ProcessOutcome {
    /// A skill ran and produced a reply.
    Answered(Box<CompletedTurn>),
    /// The turn was consumed without a skill reply: a slot question was
    /// asked, the context was dropped, or a language switch is in flight.
    Consumed,
    /// No intent matched and no fallback applied.
    NotFound {
        processing_time: u64,
        message: &'static str,
    },
}
