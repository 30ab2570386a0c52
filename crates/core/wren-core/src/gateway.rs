//! Chat gateway client
//!
//! Transcribed utterances are forwarded into the text conversation through an
//! external chat gateway. Delivery is at-least-once: every message carries a
//! freshly generated idempotency key and deduplication is the gateway's job.

use crate::{Result, WrenError};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    session_key: &'a str,
    message: &'a str,
    idempotency_key: String,
}

/// HTTP client for the chat-gateway collaborator
#[derive(Debug, Clone)]
pub struct ChatGateway {
    endpoint: String,
    http: reqwest::Client,
}

impl ChatGateway {
    /// Create a client for the given send endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            http,
        }
    }

    /// Gateway endpoint this client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver a message into a chat session.
    ///
    /// A new idempotency key is generated per call; retrying a failed send
    /// produces a new key, so duplicates are possible and expected.
    pub async fn send(&self, session_key: &str, message: &str) -> Result<()> {
        let request = SendMessageRequest {
            session_key,
            message,
            idempotency_key: Uuid::new_v4().to_string(),
        };

        debug!(
            session_key = %session_key,
            idempotency_key = %request.idempotency_key,
            "Forwarding message to chat gateway"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| WrenError::gateway(format!("send failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WrenError::remote(status.as_u16(), body));
        }

        Ok(())
    }
}
