//! Anonymous utterance telemetry. Off unless the `telemetry` feature is
//! enabled, and always suppressed in test builds. Failures never affect
//! the turn.

use serde::Serialize;
use tracing::debug;

use crate::nlu::types::Classification;
use crate::utils::http::send_with_retry;

const ENDPOINT: &str = "https://logger.getleon.ai/v1/expressions";
const ORIGIN: &str = "leon-core";
const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ExpressionPayload {
    pub version: String,
    pub utterance: String,
    pub lang: String,
    pub classification: Classification,
}

pub struct TelemetryReporter {
    enabled: bool,
    endpoint: String,
    client: reqwest::Client,
}

impl Default for TelemetryReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryReporter {
    pub fn new() -> Self {
        Self {
            enabled: cfg!(feature = "telemetry") && !cfg!(test),
            endpoint: ENDPOINT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            enabled: true,
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Report one classified utterance, fire and forget.
    pub fn report(&self, utterance: &str, lang: &str, classification: &Classification) {
        if !self.enabled {
            return;
        }
        let payload = ExpressionPayload {
            version: env!("CARGO_PKG_VERSION").to_string(),
            utterance: utterance.to_string(),
            lang: lang.to_string(),
            classification: classification.clone(),
        };
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            if let Err(err) = post_expression(&client, &endpoint, &payload).await {
                debug!("telemetry dropped: {err}");
            }
        });
    }
}

pub(crate) async fn post_expression(
    client: &reqwest::Client,
    endpoint: &str,
    payload: &ExpressionPayload,
) -> Result<(), String> {
    let response = send_with_retry(
        || {
            client
                .post(endpoint)
                .header("X-Origin", ORIGIN)
                .json(payload)
        },
        MAX_RETRIES,
    )
    .await?;
    if !response.status().is_success() {
        return Err(format!("telemetry endpoint answered {}", response.status()));
    }
    Ok(())
}
