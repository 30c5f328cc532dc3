//! Language Switcher — recycles the tokenization service for a new locale
//! and re-enters dispatch once the socket reconnects.

use futures::future::BoxFuture;
use std::collections::HashMap;
use tracing::{error, info};

use super::{NluError, NluSession};
use crate::nlu::types::ProcessOutcome;
use crate::tokenizer::{TokenizerError, TokenizerProcess};

impl NluSession {
    /// Switch the session to `locale`. Fire and forget: the turn ends
    /// immediately and the classification happens again from the reconnect
    /// task. If the new service never comes up there is no retry; the user
    /// re-drives.
    pub fn switch_language<'a>(&'a self, utterance: &'a str, locale: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            info!("switching language to {locale}");
            let phrase = self
                .brain
                .wernicke("random_language_switch", None, &HashMap::new());
            // keep the typing indicator: the re-dispatched turn owns it
            self.brain.talk(&phrase, true).await;

            *self.lang.lock().await = locale.to_string();
            self.conversation.lock().await.clean_active_context();

            let session = self.clone();
            let utterance = utterance.to_string();
            let locale = locale.to_string();
            tokio::spawn(async move {
                if let Err(err) = session.recycle_tokenizer(&locale).await {
                    error!("language switch to {locale} failed: {err}");
                    return;
                }
                // exactly one re-entry on successful connection
                let redispatch: BoxFuture<'static, Result<ProcessOutcome, NluError>> = {
                    let session = session.clone();
                    Box::pin(async move { session.process(&utterance).await })
                };
                if let Err(err) = redispatch.await {
                    error!("re-dispatch after language switch failed: {err}");
                }
            });
        })
    }

    /// Kill the previous tokenization process tree, spawn one for the new
    /// locale, and reconnect the socket client.
    pub(crate) async fn recycle_tokenizer(&self, locale: &str) -> Result<(), TokenizerError> {
        let previous = self.tokenizer_process.lock().await.take();
        if let Some(process) = previous {
            process.kill_tree().await;
        }
        let process = TokenizerProcess::spawn(&self.paths.tokenizer_binary, locale)?;
        *self.tokenizer_process.lock().await = Some(process);
        self.tokenizer_client.connect().await
    }
}
