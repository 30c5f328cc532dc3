//! Tokenization service plumbing: the per-locale child process and the
//! line-based socket client used to fetch auxiliary ("spaCy") entities.

pub mod client;
pub mod process;

pub use client::{TcpTokenizerClient, TokenizerClient};
pub use process::TokenizerProcess;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenizerError {
    #[error("failed to spawn tokenization service: {0}")]
    Spawn(String),
    #[error("tokenization service connection failed: {0}")]
    Connect(String),
    #[error("tokenization service protocol error: {0}")]
    Protocol(String),
    #[error("tokenization service is not connected")]
    NotConnected,
}
