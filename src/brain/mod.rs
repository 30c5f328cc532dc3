//! Contracts of the two user-facing collaborators: the Brain (skill
//! executor) and the socket server streaming typing/suggestion events.
//!
//! The NLU core never runs a skill itself; it builds an [`NluResult`] and
//! hands it to whatever implements [`Brain`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::ActionConfig;
use crate::nlu::types::{Classification, NluResult, SlotValue};

// ── Executor output ────────────────────────────────────

/// Directives the skill hands back to the dispatch state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreDirectives {
    /// Restart the whole cycle from the context's original utterance.
    pub restart: bool,
    /// Whether the action wants to stay in (or leave) its loop.
    /// `None` means the skill did not say.
    pub is_in_action_loop: Option<bool>,
}

/// What the Brain returns after running a skill action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkillResult {
    /// Milliseconds spent inside the skill process itself.
    pub execution_time: u64,
    pub classification: Option<Classification>,
    /// Config of the action that ran, including `next_action` / `loop`.
    pub action: Option<ActionConfig>,
    /// Next action the skill explicitly asked for.
    pub next_action: Option<String>,
    pub core: CoreDirectives,
    pub utterance: String,
    pub config_data_file_path: Option<PathBuf>,
    pub slots: HashMap<String, SlotValue>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("skill execution failed: {0}")]
pub struct BrainError(pub String);

// ── Brain ──────────────────────────────────────────────

/// The external skill executor.
#[async_trait]
pub trait Brain: Send + Sync {
    /// Run the selected skill action and produce the spoken reply.
    async fn execute(&self, nlu: &NluResult) -> Result<SkillResult, BrainError>;

    /// Speak a phrase to the user. When `preserve_typing` is false the
    /// typing indicator is cleared once the phrase is out.
    async fn talk(&self, phrase: &str, preserve_typing: bool);

    /// Phrase template lookup by key ("Wernicke"). Opaque to the core; the
    /// core only fixes the keys it asks for.
    fn wernicke(&self, key: &str, subkey: Option<&str>, vars: &HashMap<String, String>) -> String;
}

// ── Socket server ──────────────────────────────────────

/// End-user event stream. Best effort, non-blocking in intent.
pub trait SocketEmitter: Send + Sync {
    fn is_typing(&self, on: bool);
    fn suggest(&self, suggestions: &[String]);
}
