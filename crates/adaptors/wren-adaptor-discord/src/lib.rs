//! Discord Voice Adaptor
//!
//! Connects a Wren agent to Discord voice channels: joining and leaving,
//! playing audio files, and transcribing what users say so it can flow back
//! into the text conversation.
//!
//! The embedding application owns the serenity client and gateway session; it
//! hands this crate an [`Arc<Songbird>`](songbird::Songbird) registered with
//! [`songbird_config`] (the receiver must decode incoming Opus to PCM).
//! Everything else (per-guild sessions, per-speaker utterance capture,
//! playback sequencing, transcription) lives behind [`VoiceManager`].
//!
//! Transcripts are delivered as [`TranscriptEvent`]s on an outbound channel
//! the embedding application drains; [`spawn_chat_forwarder`] is a ready-made
//! drain that posts them to the chat gateway.

use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;
use wren_core::{require_credential, resolve_credential, ChatGateway, Result};

pub mod commands;
pub mod connection;
pub mod listener;
pub mod noise;
pub mod playback;
pub mod transcribe;
pub mod wav;

pub use commands::{CommandOutcome, VoiceCommands};
pub use listener::{GuildListener, ListenerConfig};
pub use transcribe::{Transcript, TranscriptionClient, TranscriptionConfig};

/// Depth of the outbound transcript queue before capture tasks back off
const EVENT_QUEUE_DEPTH: usize = 64;

/// A finalized, filtered utterance transcription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Guild the utterance was captured in
    pub guild_id: u64,
    /// Speaker
    pub user_id: u64,
    /// Voice channel the listener was attached to
    pub channel_id: u64,
    /// Trimmed transcript text
    pub text: String,
    /// Language reported by the transcription API, if any
    pub language: Option<String>,
}

/// Transcription endpoint settings, nested under `voice.transcription`
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub endpoint: String,
    pub model: String,
    /// Overridden by `TRANSCRIPTION_API_KEY` / `OPENAI_API_KEY` when set
    pub api_key: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
            api_key: None,
        }
    }
}

/// Voice adaptor settings, parsed from the `voice` key of the agent settings
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub transcription: TranscriptionSettings,
    /// Default language hint for transcription; `listen` may override per guild
    pub language: Option<String>,
    /// Continuous silence that ends an utterance
    pub silence_ms: u64,
    /// Utterances captured for less than this are discarded
    pub min_speech_ms: u64,
    /// Mean segment no-speech probability above which a transcript is dropped
    pub no_speech_threshold: f32,
    /// Bound on waiting for voice connection readiness
    pub join_timeout_secs: u64,
    /// TTS collaborator endpoint
    pub tts_endpoint: String,
    /// Chat gateway send endpoint
    pub gateway_endpoint: String,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            transcription: TranscriptionSettings::default(),
            language: None,
            silence_ms: 1500,
            min_speech_ms: 500,
            no_speech_threshold: 0.5,
            join_timeout_secs: 20,
            tts_endpoint: "http://127.0.0.1:5030/tts".to_string(),
            gateway_endpoint: "http://127.0.0.1:9090/chat/send".to_string(),
        }
    }
}

impl VoiceSettings {
    /// Parse voice settings from the agent settings JSON.
    ///
    /// Credentials resolve environment-first: `TRANSCRIPTION_API_KEY`, then
    /// `OPENAI_API_KEY`, then `settings.voice.transcription.api_key`.
    pub fn from_settings(settings: &serde_json::Value) -> Self {
        let mut parsed = match settings.get("voice") {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
                warn!(error = %e, "Invalid voice settings, using defaults");
                Self::default()
            }),
            None => Self::default(),
        };

        if let Some(key) = resolve_credential(
            &["TRANSCRIPTION_API_KEY", "OPENAI_API_KEY"],
            settings,
            "voice.transcription.api_key",
        ) {
            parsed.transcription.api_key = Some(key);
        }

        parsed
    }
}

/// Resolve the Discord bot token: `DISCORD_BOT_TOKEN` first, then
/// `settings.discord.token`.
pub fn resolve_bot_token(settings: &serde_json::Value) -> Result<String> {
    require_credential(
        &["DISCORD_BOT_TOKEN"],
        settings,
        "discord.token",
        "Discord bot token",
    )
}

/// Songbird driver configuration for this adaptor.
///
/// Listening needs decoded PCM from the receiver; register songbird with this
/// config when building the serenity client.
pub fn songbird_config() -> songbird::Config {
    songbird::Config::default().decode_mode(songbird::driver::DecodeMode::Decode)
}

/// Voice session state for a guild
#[derive(Debug)]
pub struct VoiceSession {
    /// Guild ID
    pub guild_id: u64,
    /// Voice channel ID the bot is in
    pub channel_id: u64,
    /// When the bot joined
    pub joined_at: Instant,
    /// Playback state, created lazily on first play and reused
    pub(crate) playback: Option<playback::Playback>,
    /// Listener state when `listen` is active for this guild
    pub(crate) listener: Option<Arc<GuildListener>>,
}

impl VoiceSession {
    pub(crate) fn new(guild_id: u64, channel_id: u64) -> Self {
        Self {
            guild_id,
            channel_id,
            joined_at: Instant::now(),
            playback: None,
            listener: None,
        }
    }
}

/// Voice session registry for one bot.
///
/// Owned by the embedding application and passed by handle to command
/// handlers; multiple independent managers may coexist. Joining a guild and
/// never leaving keeps its session and connection alive for process
/// lifetime; `leave` is the only teardown path.
pub struct VoiceManager {
    pub(crate) songbird: Arc<Songbird>,
    pub(crate) settings: VoiceSettings,
    /// Active voice sessions by guild ID
    pub(crate) sessions: Arc<RwLock<HashMap<u64, VoiceSession>>>,
    pub(crate) events_tx: mpsc::Sender<TranscriptEvent>,
    pub(crate) transcriber: Arc<TranscriptionClient>,
}

impl VoiceManager {
    /// Create a manager and the transcript event stream it feeds.
    pub fn new(
        songbird: Arc<Songbird>,
        settings: VoiceSettings,
    ) -> (Self, mpsc::Receiver<TranscriptEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let transcriber = Arc::new(TranscriptionClient::new(TranscriptionConfig {
            endpoint: settings.transcription.endpoint.clone(),
            api_key: settings.transcription.api_key.clone(),
            model: settings.transcription.model.clone(),
            no_speech_threshold: settings.no_speech_threshold,
        }));

        let manager = Self {
            songbird,
            settings,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
            transcriber,
        };
        (manager, events_rx)
    }

    /// Settings this manager was built with
    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    /// Guild IDs with an active session
    pub async fn active_guilds(&self) -> Vec<u64> {
        let sessions = self.sessions.read().await;
        let mut guilds: Vec<u64> = sessions.keys().copied().collect();
        guilds.sort_unstable();
        guilds
    }
}

/// Serenity IDs are non-zero; map raw zero IDs to `None` instead of panicking
pub(crate) fn guild_id_of(raw: u64) -> Option<GuildId> {
    (raw != 0).then(|| GuildId::new(raw))
}

pub(crate) fn channel_id_of(raw: u64) -> Option<ChannelId> {
    (raw != 0).then(|| ChannelId::new(raw))
}

/// Drain transcript events into the chat gateway.
///
/// Each transcript becomes one `chat.send` with a fresh idempotency key;
/// delivery failures are logged and skipped so the listening session is never
/// affected. The task ends when the event channel closes.
pub fn spawn_chat_forwarder(
    mut events: mpsc::Receiver<TranscriptEvent>,
    gateway: ChatGateway,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let session_key = format!("discord:{}:{}", event.guild_id, event.channel_id);
            let message = format!("[voice:{}] {}", event.user_id, event.text);
            if let Err(e) = gateway.send(&session_key, &message).await {
                warn!(
                    error = %e,
                    guild_id = %event.guild_id,
                    user_id = %event.user_id,
                    "Failed to forward transcript to chat gateway"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_voice_settings_defaults() {
        let settings = VoiceSettings::default();
        assert_eq!(settings.silence_ms, 1500);
        assert_eq!(settings.min_speech_ms, 500);
        assert_eq!(settings.no_speech_threshold, 0.5);
        assert_eq!(settings.join_timeout_secs, 20);
        assert_eq!(settings.transcription.model, "whisper-1");
    }

    #[test]
    fn test_voice_settings_parsing() {
        let settings = VoiceSettings::from_settings(&json!({
            "voice": {
                "silence_ms": 2000,
                "language": "ja",
                "no_speech_threshold": 0.7,
                "transcription": {
                    "endpoint": "http://127.0.0.1:8080/v1/audio/transcriptions"
                }
            }
        }));
        assert_eq!(settings.silence_ms, 2000);
        assert_eq!(settings.min_speech_ms, 500); // untouched default
        assert_eq!(settings.language.as_deref(), Some("ja"));
        assert_eq!(settings.no_speech_threshold, 0.7);
        assert_eq!(
            settings.transcription.endpoint,
            "http://127.0.0.1:8080/v1/audio/transcriptions"
        );
    }

    #[test]
    fn test_voice_settings_env_key_wins() {
        std::env::set_var("TRANSCRIPTION_API_KEY", "sk-env");
        let settings = VoiceSettings::from_settings(&json!({
            "voice": {"transcription": {"api_key": "sk-settings"}}
        }));
        assert_eq!(settings.transcription.api_key.as_deref(), Some("sk-env"));
        std::env::remove_var("TRANSCRIPTION_API_KEY");
    }

    #[test]
    fn test_bot_token_resolution_precedence() {
        let settings = json!({"discord": {"token": "settings-token"}});
        assert_eq!(resolve_bot_token(&settings).unwrap(), "settings-token");

        let err = resolve_bot_token(&json!({})).unwrap_err();
        assert_eq!(err.code(), "missing_credential");
    }

    #[test]
    fn test_zero_ids_are_rejected() {
        assert!(guild_id_of(0).is_none());
        assert!(channel_id_of(0).is_none());
        assert_eq!(guild_id_of(42), Some(GuildId::new(42)));
    }

    #[tokio::test]
    async fn test_fresh_manager_has_no_sessions() {
        let (manager, _events) = VoiceManager::new(Songbird::serenity(), VoiceSettings::default());
        assert!(manager.active_guilds().await.is_empty());
    }
}
