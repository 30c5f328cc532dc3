//! On-disk layout and JSON config loading: skill configs, global resolver
//! definitions, and the per-language inventory (supported locales plus
//! their fallback tables).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::nlu::fallback::FallbackRule;

// ── Loading ────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Strict JSON read: a skill config or resolver file that is missing or
/// malformed is an error, never silently defaulted.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

// ── Layout ─────────────────────────────────────────────

/// Where models, language data, and skills live on disk, and how to launch
/// the tokenization service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NluPaths {
    /// `core/data/models`
    pub models_dir: PathBuf,
    /// `core/data`
    pub data_dir: PathBuf,
    /// `skills`
    pub skills_dir: PathBuf,
    /// Tokenization service binary, launched as `{binary} {locale}`.
    pub tokenizer_binary: PathBuf,
}

impl NluPaths {
    pub fn langs_file(&self) -> PathBuf {
        self.data_dir.join("langs.json")
    }

    pub fn global_resolver(&self, short_lang: &str, name: &str) -> PathBuf {
        self.data_dir
            .join(short_lang)
            .join("global-resolvers")
            .join(format!("{name}.json"))
    }

    pub fn skill_config(&self, domain: &str, skill: &str, short_lang: &str) -> PathBuf {
        self.skills_dir
            .join(domain)
            .join(skill)
            .join("config")
            .join(format!("{short_lang}.json"))
    }
}

// ── Skill configs ──────────────────────────────────────

/// `skills/{domain}/{skill}/config/{lang}.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillConfig {
    #[serde(default)]
    pub actions: HashMap<String, ActionConfig>,
    #[serde(default)]
    pub resolvers: HashMap<String, ResolverConfig>,
    /// Skill-scoped entity definitions, consumed verbatim by the classifier's
    /// NER. The core never inspects them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub action_loop: Option<LoopConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConfig {
    pub name: String,
    pub expected_entity: String,
    pub picked_question: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub expected_item: ExpectedItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ExpectedItemKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedItemKind {
    Entity,
    GlobalResolver,
    SkillResolver,
}

/// One resolver definition: intent leaf → value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default)]
    pub intents: HashMap<String, ResolverIntent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverIntent {
    pub value: String,
}

/// `core/data/{lang}/global-resolvers/{name}.json`
pub type GlobalResolverFile = ResolverConfig;

// ── Language inventory ─────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct LanguageEntry {
    /// Short code used in file paths (`en` for `en-US`).
    pub short: String,
    #[serde(default)]
    pub fallbacks: Vec<FallbackRule>,
}

/// `core/data/langs.json`, keyed by full locale.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct LanguageInventory {
    entries: HashMap<String, LanguageEntry>,
}

impl LanguageInventory {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_json(path)
    }

    pub fn is_supported(&self, locale: &str) -> bool {
        self.entries.contains_key(locale)
    }

    /// Short code for a supported locale; falls back to the locale itself
    /// so path building never panics on exotic input.
    pub fn short<'a>(&'a self, locale: &'a str) -> &'a str {
        self.entries
            .get(locale)
            .map(|e| e.short.as_str())
            .unwrap_or(locale)
    }

    pub fn fallbacks(&self, locale: &str) -> &[FallbackRule] {
        self.entries
            .get(locale)
            .map(|e| e.fallbacks.as_slice())
            .unwrap_or(&[])
    }
}
