//! Model Loader — loads the three classifier models from disk and exposes
//! readiness. The dispatcher refuses to serve until all three are up.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::interface::IntentClassifier;
use crate::config::NluPaths;

// ── Model identity ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    GlobalResolvers,
    SkillsResolvers,
    Main,
}

impl ModelKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelKind::GlobalResolvers => "leon-global-resolvers-model.nlp",
            ModelKind::SkillsResolvers => "leon-skills-resolvers-model.nlp",
            ModelKind::Main => "leon-main-model.nlp",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::GlobalResolvers => write!(f, "global resolvers"),
            ModelKind::SkillsResolvers => write!(f, "skills resolvers"),
            ModelKind::Main => write!(f, "main"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{kind} model is missing at {}, run `leon train` to generate it", .path.display())]
    Missing { kind: ModelKind, path: PathBuf },
    #[error("failed to load the {kind} model from {}: {message}", .path.display())]
    Load {
        kind: ModelKind,
        path: PathBuf,
        message: String,
    },
}

/// Entry point into the classifier library: builds one classifier per
/// model file.
#[async_trait]
pub trait ClassifierLoader: Send + Sync {
    async fn load(
        &self,
        kind: ModelKind,
        path: &Path,
    ) -> Result<Arc<dyn IntentClassifier>, ModelError>;
}

// ── Loaded models ──────────────────────────────────────

/// The three classifiers, populated by [`NluModels::load_all`].
#[derive(Default)]
pub struct NluModels {
    global_resolvers: RwLock<Option<Arc<dyn IntentClassifier>>>,
    skills_resolvers: RwLock<Option<Arc<dyn IntentClassifier>>>,
    main: RwLock<Option<Arc<dyn IntentClassifier>>>,
}

impl NluModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load all three models concurrently. Any failure is fatal for the
    /// whole load: readiness stays false and the error is surfaced.
    ///
    /// `builtin_entities` is the inventory the main model's builtin-entity
    /// extractor gets activated with (owned by the NER gateway).
    pub async fn load_all(
        &self,
        loader: &dyn ClassifierLoader,
        paths: &NluPaths,
        builtin_entities: &[&'static str],
    ) -> Result<(), ModelError> {
        let (global, skills, main) = tokio::try_join!(
            load_one(loader, ModelKind::GlobalResolvers, paths),
            load_one(loader, ModelKind::SkillsResolvers, paths),
            load_one(loader, ModelKind::Main, paths),
        )?;

        main.activate_builtin_entities(builtin_entities);

        *self.global_resolvers.write().await = Some(global);
        *self.skills_resolvers.write().await = Some(skills);
        *self.main.write().await = Some(main);
        info!("loaded all NLP models");
        Ok(())
    }

    /// True iff all three classifiers loaded successfully.
    pub async fn is_ready(&self) -> bool {
        self.global_resolvers.read().await.is_some()
            && self.skills_resolvers.read().await.is_some()
            && self.main.read().await.is_some()
    }

    pub async fn main(&self) -> Option<Arc<dyn IntentClassifier>> {
        self.main.read().await.clone()
    }

    pub async fn global_resolvers(&self) -> Option<Arc<dyn IntentClassifier>> {
        self.global_resolvers.read().await.clone()
    }

    pub async fn skills_resolvers(&self) -> Option<Arc<dyn IntentClassifier>> {
        self.skills_resolvers.read().await.clone()
    }
}

async fn load_one(
    loader: &dyn ClassifierLoader,
    kind: ModelKind,
    paths: &NluPaths,
) -> Result<Arc<dyn IntentClassifier>, ModelError> {
    let path = paths.models_dir.join(kind.file_name());
    if !path.exists() {
        warn!("{kind} model not found at {}", path.display());
        return Err(ModelError::Missing { kind, path });
    }
    let model = loader.load(kind, &path).await?;
    model.set_spell_check(true);
    info!("{kind} model loaded");
    Ok(model)
}
