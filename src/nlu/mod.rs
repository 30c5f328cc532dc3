//! The NLU session: one conversation, one language, one decision pipeline.
//!
//! [`NluSession`] owns every piece of mutable state (loaded models, active
//! context, current language, tokenization process) and the injected
//! collaborators (classifier loader, Brain, socket server, tokenizer
//! client). Fields are `Arc`-shared so the session clones cheaply; the
//! language-switch reconnect task re-enters `process` on its own clone.
//!
//! Callers must serialize `process` calls per session. The pipeline itself
//! is a trampoline: sub-state-machines return a redispatch sentinel instead
//! of recursing.

pub mod fallback;
pub mod types;

mod action_loop;
mod dispatcher;
mod language;
mod slot_filling;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::error;

use crate::brain::{Brain, BrainError, SocketEmitter};
use crate::classifier::{
    ClassificationOutcome, ClassifierError, ClassifierLoader, IntentClassifier, ModelError,
    NluModels,
};
use crate::config::{ConfigError, LanguageInventory, NluPaths};
use crate::conversation::ConversationStore;
use crate::ner::{NerGateway, BUILTIN_ENTITIES};
use crate::telemetry::TelemetryReporter;
use crate::tokenizer::{TokenizerClient, TokenizerProcess};

pub use types::{CompletedTurn, ProcessOutcome};

const INFERENCE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ─────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum NluError {
    #[error("nlp models are not loaded")]
    ModelsNotReady,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("skill executor rejected the turn: {0}")]
    Executor(#[from] BrainError),
}

// ── Session ────────────────────────────────────────────

#[derive(Clone)]
pub struct NluSession {
    pub(crate) paths: NluPaths,
    pub(crate) languages: Arc<LanguageInventory>,
    pub(crate) models: Arc<NluModels>,
    pub(crate) loader: Arc<dyn ClassifierLoader>,
    pub(crate) ner: Arc<NerGateway>,
    pub(crate) conversation: Arc<Mutex<ConversationStore>>,
    pub(crate) lang: Arc<Mutex<String>>,
    pub(crate) brain: Arc<dyn Brain>,
    pub(crate) socket: Arc<dyn SocketEmitter>,
    pub(crate) tokenizer_client: Arc<dyn TokenizerClient>,
    pub(crate) tokenizer_process: Arc<Mutex<Option<TokenizerProcess>>>,
    pub(crate) telemetry: Arc<TelemetryReporter>,
}

impl NluSession {
    pub fn new(
        paths: NluPaths,
        languages: LanguageInventory,
        default_lang: impl Into<String>,
        loader: Arc<dyn ClassifierLoader>,
        tokenizer_client: Arc<dyn TokenizerClient>,
        brain: Arc<dyn Brain>,
        socket: Arc<dyn SocketEmitter>,
    ) -> Self {
        let models = Arc::new(NluModels::new());
        let ner = Arc::new(NerGateway::new(models.clone(), tokenizer_client.clone()));
        Self {
            paths,
            languages: Arc::new(languages),
            models,
            loader,
            ner,
            conversation: Arc::new(Mutex::new(ConversationStore::new())),
            lang: Arc::new(Mutex::new(default_lang.into())),
            brain,
            socket,
            tokenizer_client,
            tokenizer_process: Arc::new(Mutex::new(None)),
            telemetry: Arc::new(TelemetryReporter::new()),
        }
    }

    /// Load the three classifier models from disk. The session rejects
    /// every `process` call until this succeeds.
    pub async fn load_models(&self) -> Result<(), ModelError> {
        match self
            .models
            .load_all(self.loader.as_ref(), &self.paths, BUILTIN_ENTITIES)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                error!("{err}");
                let phrase = self.brain.wernicke("random_errors", None, &HashMap::new());
                self.brain.talk(&phrase, false).await;
                if let ModelError::Load { ref message, .. } = err {
                    let mut vars = HashMap::new();
                    vars.insert("error".to_string(), message.clone());
                    let detail = self.brain.wernicke("errors", Some("nlu"), &vars);
                    self.brain.talk(&detail, false).await;
                }
                Err(err)
            }
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.models.is_ready().await
    }

    pub async fn current_lang(&self) -> String {
        self.lang.lock().await.clone()
    }

    /// Wall-clock guard around classifier inference.
    pub(crate) async fn classify_guarded(
        &self,
        model: &Arc<dyn IntentClassifier>,
        utterance: &str,
    ) -> Result<ClassificationOutcome, ClassifierError> {
        match tokio::time::timeout(INFERENCE_TIMEOUT, model.classify(utterance)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout),
        }
    }
}
