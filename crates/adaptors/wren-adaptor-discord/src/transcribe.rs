//! Remote speech-to-text client
//!
//! Finalized utterances are uploaded as WAV files to a Whisper-style HTTP
//! endpoint. The verbose response carries per-segment no-speech
//! probabilities, which gate delivery together with the noise classifier.

use crate::noise;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use wren_core::{Result, WrenError};

/// Whisper can take a while on long utterances
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Transcription endpoint configuration
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Whisper-style `audio/transcriptions` endpoint
    pub endpoint: String,
    /// Bearer token; transcription fails up-front without one
    pub api_key: Option<String>,
    /// Model name submitted with each request
    pub model: String,
    /// Utterances whose mean segment no-speech probability exceeds this are
    /// discarded as non-speech
    pub no_speech_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            no_speech_threshold: 0.5,
        }
    }
}

/// One segment of a verbose transcription response
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionSegment {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub no_speech_prob: f32,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

/// A transcript that survived confidence and noise filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub language: Option<String>,
}

/// Client for the remote transcription API
#[derive(Debug, Clone)]
pub struct TranscriptionClient {
    config: TranscriptionConfig,
    http: reqwest::Client,
}

impl TranscriptionClient {
    pub fn new(config: TranscriptionConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Transcribe a WAV file.
    ///
    /// Returns `Ok(None)`, not an error, when the result is rejected as
    /// noise or likely non-speech. Errors never tear down the listening
    /// session; the finalize task logs them and moves on.
    pub async fn transcribe(
        &self,
        wav_path: &Path,
        language_hint: Option<&str>,
    ) -> Result<Option<Transcript>> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                WrenError::missing_credential(
                    "transcription API key is not configured; set TRANSCRIPTION_API_KEY",
                )
            })?;

        let wav_bytes = tokio::fs::read(wav_path).await?;
        debug!(
            path = %wav_path.display(),
            bytes = %wav_bytes.len(),
            "Submitting utterance for transcription"
        );

        let file_part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json");
        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WrenError::remote(status.as_u16(), body));
        }

        let verbose: VerboseTranscription = response.json().await?;
        Ok(self.filter_transcript(verbose))
    }

    /// Apply the noise classifier and the mean no-speech-probability gate.
    fn filter_transcript(&self, verbose: VerboseTranscription) -> Option<Transcript> {
        let text = verbose.text.trim();
        if noise::is_noise_transcript(text) {
            debug!(text = %text, "Transcript rejected as noise");
            return None;
        }

        let probabilities: Vec<f32> = verbose.segments.iter().map(|s| s.no_speech_prob).collect();
        let mean = noise::mean_no_speech(&probabilities);
        if mean > self.config.no_speech_threshold {
            info!(
                mean_no_speech = %mean,
                threshold = %self.config.no_speech_threshold,
                "Transcript suppressed as likely non-speech"
            );
            return None;
        }

        Some(Transcript {
            text: text.to_string(),
            language: verbose.language,
        })
    }
}
