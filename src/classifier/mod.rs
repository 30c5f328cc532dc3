pub mod interface;
pub mod loader;

pub use interface::{ClassificationOutcome, ClassifierError, IntentClassifier, IntentScore, MandatorySlot};
pub use loader::{ClassifierLoader, ModelError, ModelKind, NluModels};
