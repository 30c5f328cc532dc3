//! Opaque classifier capability — the contract the NLU core expects from
//! the intent classification library.
//!
//! The core never links the library itself; it talks to whatever implements
//! [`IntentClassifier`]. One instance per model: the main model, the global
//! resolvers model, and the skills resolvers model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ner::NerError;
use crate::nlu::types::Entity;

// ── Inference output ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentScore {
    pub intent: String,
    pub score: f64,
}

/// Raw output of one classifier inference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassificationOutcome {
    /// Locale the classifier detected for the utterance.
    pub locale: String,
    /// Winning intent, `"None"` when nothing matched.
    pub intent: String,
    pub score: f64,
    #[serde(default)]
    pub domain: Option<String>,
    /// All scored candidates, best first.
    #[serde(default)]
    pub classifications: Vec<IntentScore>,
    /// Lazy dialog answers for dialog-type actions.
    #[serde(default)]
    pub answers: Vec<serde_json::Value>,
}

impl ClassificationOutcome {
    pub fn has_intent(&self) -> bool {
        !self.intent.is_empty() && self.intent != "None"
    }
}

/// Mandatory slot declaration as reported by the classifier's slot manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MandatorySlot {
    pub name: String,
    pub expected_entity: String,
    pub picked_question: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier inference failed: {0}")]
    Inference(String),
    #[error("classifier inference timed out")]
    Timeout,
    #[error("model is not loaded")]
    NotLoaded,
}

// ── Capability trait ───────────────────────────────────

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Run inference on one utterance.
    async fn classify(&self, utterance: &str) -> Result<ClassificationOutcome, ClassifierError>;

    /// Teach the model a synonym for an entity value, under `lang`.
    ///
    /// Append-only and idempotent per `(entity, value)` pair; duplicates are
    /// benign. This is how proper nouns the model was never trained on get
    /// recognized.
    fn register_synonym(&self, lang: &str, entity: &str, value: &str, surface_forms: Vec<String>);

    fn set_spell_check(&self, enabled: bool);

    /// Activate the built-in entity extractor for the given entity names.
    /// Only meaningful on the main model.
    fn activate_builtin_entities(&self, entities: &[&'static str]);

    /// `"{domain}.{skill}"` the intent belongs to, if known.
    fn intent_domain(&self, locale: &str, intent: &str) -> Option<String>;

    /// Mandatory slots declared for an intent, in declaration order.
    fn mandatory_slots(&self, intent: &str) -> Vec<MandatorySlot>;

    /// Run the model's NER over the utterance, merging in skill-scoped
    /// entity definitions from the config file at `config_path`.
    async fn extract_entities(
        &self,
        lang: &str,
        utterance: &str,
        config_path: &Path,
    ) -> Result<Vec<Entity>, NerError>;
}
