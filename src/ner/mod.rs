//! NER Gateway — entity extraction for one utterance, plus the spaCy
//! augmentation that teaches the main classifier proper nouns it was never
//! trained on.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::classifier::NluModels;
use crate::nlu::types::{Entity, NluResult};
use crate::tokenizer::{TokenizerClient, TokenizerError};

/// Built-in entity names the main classifier activates at load time.
pub const BUILTIN_ENTITIES: &[&str] = &[
    "number",
    "ordinal",
    "percentage",
    "age",
    "currency",
    "dimension",
    "temperature",
    "date",
    "time",
    "duration",
    "email",
    "phonenumber",
    "url",
];

// ── Errors ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NerSeverity {
    Warning,
    Error,
}

/// Extraction failure. `code` doubles as the spoken phrase key; `data` is
/// whatever detail the classifier reported.
#[derive(Debug, Clone)]
pub struct NerError {
    pub severity: NerSeverity,
    pub code: String,
    pub data: String,
}

impl fmt::Display for NerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity extraction failed [{}]: {}", self.code, self.data)
    }
}

impl std::error::Error for NerError {}

impl NerError {
    pub fn error(code: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            severity: NerSeverity::Error,
            code: code.into(),
            data: data.into(),
        }
    }

    pub fn warning(code: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            severity: NerSeverity::Warning,
            code: code.into(),
            data: data.into(),
        }
    }
}

// ── Gateway ────────────────────────────────────────────

pub struct NerGateway {
    models: Arc<NluModels>,
    tokenizer: Arc<dyn TokenizerClient>,
}

impl NerGateway {
    pub fn new(models: Arc<NluModels>, tokenizer: Arc<dyn TokenizerClient>) -> Self {
        Self { models, tokenizer }
    }

    /// Entities of the just-received utterance, scoped to one skill's
    /// config file.
    pub async fn extract_entities(
        &self,
        lang: &str,
        config_path: &Path,
        partial: &NluResult,
    ) -> Result<Vec<Entity>, NerError> {
        let main = self
            .models
            .main()
            .await
            .ok_or_else(|| NerError::error("nlu", "main model is not loaded"))?;
        main.extract_entities(lang, &partial.utterance, config_path)
            .await
    }

    /// Fetch auxiliary entities from the tokenization service and register
    /// each resolved value as a synonym of itself (titlecased surface form)
    /// into the main classifier.
    ///
    /// Idempotent: registrations are append-only and duplicates per
    /// `(entity, value)` pair are benign.
    pub async fn merge_spacy_entities(
        &self,
        lang: &str,
        utterance: &str,
    ) -> Result<(), TokenizerError> {
        let entities = self.tokenizer.spacy_entities(utterance).await?;
        let Some(main) = self.models.main().await else {
            return Ok(());
        };
        for entity in &entities {
            if let Some(resolution) = &entity.resolution {
                debug!("registering spaCy synonym {}={}", entity.entity, resolution.value);
                main.register_synonym(
                    lang,
                    &entity.entity,
                    &resolution.value,
                    vec![titlecase(&resolution.value)],
                );
            }
        }
        Ok(())
    }
}

/// `"emmanuel macron"` → `"Emmanuel Macron"`.
pub(crate) fn titlecase(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
