//! Line-based socket client for the tokenization service.
//!
//! One JSON object per line in both directions. The only operations the
//! core needs are `connect` (resolves once the service accepts) and the
//! auxiliary entity request.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::TokenizerError;
use crate::nlu::types::Entity;

const CONNECT_ATTEMPTS: u32 = 40;
const CONNECT_DELAY: Duration = Duration::from_millis(250);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait TokenizerClient: Send + Sync {
    /// Establish the connection. Resolves on the service's "connected"
    /// handshake, i.e. once the TCP connection is accepted. Retries while
    /// the freshly spawned service is still booting.
    async fn connect(&self) -> Result<(), TokenizerError>;

    /// Ask the service for auxiliary entities in the utterance.
    async fn spacy_entities(&self, utterance: &str) -> Result<Vec<Entity>, TokenizerError>;
}

// ── Wire format ────────────────────────────────────────

#[derive(Serialize)]
struct Request<'a> {
    topic: &'a str,
    data: &'a str,
}

#[derive(Deserialize)]
struct Reply {
    topic: String,
    #[serde(default)]
    data: serde_json::Value,
}

// ── TCP client ─────────────────────────────────────────

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

pub struct TcpTokenizerClient {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl TcpTokenizerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            conn: Mutex::new(None),
        }
    }

    async fn request(&self, topic: &str, data: &str) -> Result<Reply, TokenizerError> {
        let mut guard = self.conn.lock().await;
        // Take the connection out for the exchange; a failed exchange drops
        // it so the next connect() starts clean.
        let mut conn = guard.take().ok_or(TokenizerError::NotConnected)?;
        let result = exchange(&mut conn, topic, data).await;
        if result.is_ok() {
            *guard = Some(conn);
        }
        result
    }
}

async fn exchange(
    conn: &mut Connection,
    topic: &str,
    data: &str,
) -> Result<Reply, TokenizerError> {
    let mut line = serde_json::to_string(&Request { topic, data })
        .map_err(|e| TokenizerError::Protocol(e.to_string()))?;
    line.push('\n');
    conn.writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| TokenizerError::Protocol(format!("write: {e}")))?;

    let mut buf = String::new();
    loop {
        buf.clear();
        let read = conn
            .reader
            .read_line(&mut buf)
            .await
            .map_err(|e| TokenizerError::Protocol(format!("read: {e}")))?;
        if read == 0 {
            return Err(TokenizerError::NotConnected);
        }
        let trimmed = buf.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map_err(|e| TokenizerError::Protocol(format!("{e} — line: {trimmed}")));
    }
}

#[async_trait]
impl TokenizerClient for TcpTokenizerClient {
    async fn connect(&self) -> Result<(), TokenizerError> {
        let mut last_err = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    *self.conn.lock().await = Some(Connection {
                        reader: BufReader::new(read),
                        writer: write,
                    });
                    info!("connected to tokenization service at {}", self.addr);
                    return Ok(());
                }
                Err(e) => {
                    last_err = e.to_string();
                    debug!("connect attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e}");
                    tokio::time::sleep(CONNECT_DELAY).await;
                }
            }
        }
        Err(TokenizerError::Connect(format!(
            "{} after {CONNECT_ATTEMPTS} attempts: {last_err}",
            self.addr
        )))
    }

    async fn spacy_entities(&self, utterance: &str) -> Result<Vec<Entity>, TokenizerError> {
        let reply = tokio::time::timeout(
            REQUEST_TIMEOUT,
            self.request("get-spacy-entities", utterance),
        )
        .await
        .map_err(|_| TokenizerError::Protocol("spaCy entity request timed out".into()))??;

        if reply.topic != "spacy-entities" {
            return Err(TokenizerError::Protocol(format!(
                "unexpected topic: {}",
                reply.topic
            )));
        }
        serde_json::from_value(reply.data).map_err(|e| TokenizerError::Protocol(e.to_string()))
    }
}
