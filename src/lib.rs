//! Conversational NLU core.
//!
//! Given a user utterance and the current dialog state, decide which skill
//! action to execute and with what parameters. The decision pipeline
//! composes three classifier models, an NER layer, a conversation store,
//! and the external skill executor ("Brain") into one deterministic state
//! machine whose behavior depends on prior turns: slot filling, action
//! loops, fallbacks, and language switching all hang off the active
//! context.
//!
//! The session is the unit of everything: build an [`NluSession`] with
//! your collaborators, call [`NluSession::load_models`], then feed it
//! utterances through [`NluSession::process`].

pub mod brain;
pub mod classifier;
pub mod config;
pub mod conversation;
pub mod ner;
pub mod nlu;
pub mod telemetry;
pub mod tokenizer;
pub mod utils;

pub use brain::{Brain, BrainError, CoreDirectives, SkillResult, SocketEmitter};
pub use classifier::{
    ClassificationOutcome, ClassifierError, ClassifierLoader, IntentClassifier, MandatorySlot,
    ModelError, ModelKind,
};
pub use config::{LanguageInventory, NluPaths, SkillConfig};
pub use conversation::{ActiveContext, ConversationStore, Slot};
pub use ner::{NerError, NerGateway, NerSeverity};
pub use nlu::types::{Classification, CompletedTurn, Entity, NluResult, ProcessOutcome};
pub use nlu::{NluError, NluSession};
pub use tokenizer::{TcpTokenizerClient, TokenizerClient, TokenizerError};
