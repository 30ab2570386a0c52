//! Text-to-speech provider client
//!
//! The synthesis pipeline itself is a separate service; this crate only
//! submits text and hands back the path of the rendered audio file, which the
//! Discord adaptor then plays through its playback controller.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use wren_core::{Result, WrenError};

/// Synthesis can take a few seconds for long responses
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    channel: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesizeResponse {
    success: bool,
    #[serde(default)]
    audio_path: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the TTS collaborator service
#[derive(Debug, Clone)]
pub struct TtsClient {
    endpoint: String,
    http: reqwest::Client,
}

impl TtsClient {
    /// Create a client for the given synthesis endpoint
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

    /// Synthesis endpoint this client posts to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Render `text` to an audio file and return its path.
    ///
    /// `channel` identifies the requesting conversation so the service can
    /// pick per-channel voice settings.
    pub async fn synthesize(&self, text: &str, channel: &str) -> Result<PathBuf> {
        debug!(
            endpoint = %self.endpoint,
            text_len = %text.len(),
            channel = %channel,
            "Requesting TTS synthesis"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&SynthesizeRequest { text, channel })
            .send()
            .await
            .map_err(|e| WrenError::tts(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WrenError::remote(status.as_u16(), body));
        }

        let reply: SynthesizeResponse = response
            .json()
            .await
            .map_err(|e| WrenError::tts(format!("invalid response: {}", e)))?;

        if !reply.success {
            return Err(WrenError::tts(
                reply.error.unwrap_or_else(|| "synthesis failed".to_string()),
            ));
        }

        let path = reply
            .audio_path
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| WrenError::tts("synthesis succeeded but no audio path returned"))?;

        info!(audio_path = %path, "TTS synthesis complete");
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parses_camel_case_audio_path() {
        let reply: SynthesizeResponse =
            serde_json::from_str(r#"{"success": true, "audioPath": "/tmp/out.mp3"}"#).unwrap();
        assert!(reply.success);
        assert_eq!(reply.audio_path.as_deref(), Some("/tmp/out.mp3"));
        assert_eq!(reply.error, None);
    }

    #[test]
    fn test_response_parses_failure_with_error() {
        let reply: SynthesizeResponse =
            serde_json::from_str(r#"{"success": false, "error": "voice unavailable"}"#).unwrap();
        assert!(!reply.success);
        assert_eq!(reply.error.as_deref(), Some("voice unavailable"));
    }

    #[test]
    fn test_request_wire_format() {
        let json = serde_json::to_value(SynthesizeRequest {
            text: "hello there",
            channel: "discord:42",
        })
        .unwrap();
        assert_eq!(json["text"], "hello there");
        assert_eq!(json["channel"], "discord:42");
    }
}
