//! Voice command surface
//!
//! Consumed by an external tool-dispatch layer: each action takes a JSON
//! parameter object and returns a human-readable text line plus a structured
//! details object. Malformed or missing required parameters produce a
//! `missing_params` detail; component errors become `{error, message}`
//! details. Nothing here propagates a failure to the caller.

use crate::VoiceManager;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use wren_core::WrenError;
use wren_provider_tts::TtsClient;

/// Result of one voice command
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Human-readable one-liner for the agent/user
    pub text: String,
    /// Structured details for the tool-dispatch layer
    pub details: Value,
}

impl CommandOutcome {
    fn ok(text: impl Into<String>, details: Value) -> Self {
        Self {
            text: text.into(),
            details,
        }
    }

    fn missing_params(missing: &[&str]) -> Self {
        Self {
            text: format!("Missing required parameters: {}", missing.join(", ")),
            details: json!({
                "error": "missing_params",
                "missing": missing,
            }),
        }
    }

    fn from_error(err: WrenError) -> Self {
        let text = match &err {
            WrenError::NotConnected { guild_id } => format!(
                "Not connected to a voice channel in guild {} - use join first",
                guild_id
            ),
            _ => err.to_string(),
        };
        Self {
            text,
            details: json!({
                "error": err.code(),
                "message": err.to_string(),
            }),
        }
    }
}

fn id_param(params: &Value, key: &str) -> Option<u64> {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_u64().filter(|v| *v != 0),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok().filter(|v| *v != 0),
        _ => None,
    }
}

fn text_param(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Optional linear gain. `Err` means the parameter was present but malformed
/// or out of `[0.0, 1.0]`.
fn volume_param(params: &Value) -> Result<Option<f32>, ()> {
    let value = match params.get("volume") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match value {
        Some(v) if (0.0..=1.0).contains(&v) => Ok(Some(v as f32)),
        _ => Err(()),
    }
}

/// Voice command dispatcher for one manager
pub struct VoiceCommands {
    manager: Arc<VoiceManager>,
    tts: TtsClient,
}

impl VoiceCommands {
    pub fn new(manager: Arc<VoiceManager>, tts: TtsClient) -> Self {
        Self { manager, tts }
    }

    /// Dispatch one named action with its JSON parameters.
    pub async fn dispatch(&self, action: &str, params: &Value) -> CommandOutcome {
        debug!(action = %action, "Dispatching voice command");
        match action {
            "join" => self.join(params).await,
            "play" => self.play(params).await,
            "stop" => self.stop(params).await,
            "leave" => self.leave(params).await,
            "tts" => self.tts(params).await,
            "status" => self.status(params).await,
            "listen" => self.listen(params).await,
            "stop-listen" | "stop_listen" => self.stop_listen(params).await,
            other => CommandOutcome {
                text: format!("Unknown voice action: {}", other),
                details: json!({"error": "unknown_action", "action": other}),
            },
        }
    }

    async fn join(&self, params: &Value) -> CommandOutcome {
        let guild_id = id_param(params, "guild_id");
        let channel_id = id_param(params, "channel_id");
        let (Some(guild_id), Some(channel_id)) = (guild_id, channel_id) else {
            let mut missing = Vec::new();
            if guild_id.is_none() {
                missing.push("guild_id");
            }
            if channel_id.is_none() {
                missing.push("channel_id");
            }
            return CommandOutcome::missing_params(&missing);
        };

        match self.manager.join(guild_id, channel_id).await {
            Ok(()) => CommandOutcome::ok(
                format!("Joined voice channel {} in guild {}", channel_id, guild_id),
                json!({
                    "guild_id": guild_id.to_string(),
                    "channel_id": channel_id.to_string(),
                    "connected": true,
                }),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn play(&self, params: &Value) -> CommandOutcome {
        let guild_id = id_param(params, "guild_id");
        let file_path = text_param(params, "file_path");
        let volume = volume_param(params);
        if guild_id.is_none() || file_path.is_none() || volume.is_err() {
            let mut missing = Vec::new();
            if guild_id.is_none() {
                missing.push("guild_id");
            }
            if file_path.is_none() {
                missing.push("file_path");
            }
            if volume.is_err() {
                missing.push("volume");
            }
            return CommandOutcome::missing_params(&missing);
        }
        let (guild_id, file_path, volume) =
            (guild_id.unwrap(), file_path.unwrap(), volume.unwrap());

        match self.manager.play(guild_id, &file_path, volume).await {
            Ok(()) => CommandOutcome::ok(
                format!("Finished playing {}", file_path),
                json!({
                    "guild_id": guild_id.to_string(),
                    "file_path": file_path,
                    "volume": volume,
                }),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn stop(&self, params: &Value) -> CommandOutcome {
        let Some(guild_id) = id_param(params, "guild_id") else {
            return CommandOutcome::missing_params(&["guild_id"]);
        };
        match self.manager.stop(guild_id).await {
            Ok(()) => CommandOutcome::ok(
                format!("Stopped playback in guild {}", guild_id),
                json!({"guild_id": guild_id.to_string(), "stopped": true}),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn leave(&self, params: &Value) -> CommandOutcome {
        let Some(guild_id) = id_param(params, "guild_id") else {
            return CommandOutcome::missing_params(&["guild_id"]);
        };
        match self.manager.leave(guild_id).await {
            Ok(()) => CommandOutcome::ok(
                format!("Left voice channel in guild {}", guild_id),
                json!({"guild_id": guild_id.to_string(), "connected": false}),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn tts(&self, params: &Value) -> CommandOutcome {
        let guild_id = id_param(params, "guild_id");
        let text = text_param(params, "text");
        let volume = volume_param(params);
        if guild_id.is_none() || text.is_none() || volume.is_err() {
            let mut missing = Vec::new();
            if guild_id.is_none() {
                missing.push("guild_id");
            }
            if text.is_none() {
                missing.push("text");
            }
            if volume.is_err() {
                missing.push("volume");
            }
            return CommandOutcome::missing_params(&missing);
        }
        let (guild_id, text, volume) = (guild_id.unwrap(), text.unwrap(), volume.unwrap());

        // Resolve the channel before paying for synthesis
        let Some(channel_id) = self.manager.channel_id(guild_id).await else {
            return CommandOutcome::from_error(WrenError::not_connected(guild_id));
        };

        let audio_path = match self.tts.synthesize(&text, &channel_id.to_string()).await {
            Ok(path) => path,
            Err(e) => return CommandOutcome::from_error(e),
        };

        match self.manager.play(guild_id, &audio_path, volume).await {
            Ok(()) => CommandOutcome::ok(
                format!("Spoke {} characters in guild {}", text.chars().count(), guild_id),
                json!({
                    "guild_id": guild_id.to_string(),
                    "characters": text.chars().count(),
                    "audio_path": audio_path.display().to_string(),
                }),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn status(&self, params: &Value) -> CommandOutcome {
        if let Some(guild_id) = id_param(params, "guild_id") {
            let details = self.guild_status(guild_id).await;
            let text = if details["connected"].as_bool().unwrap_or(false) {
                let listening = if details["listening"].as_bool().unwrap_or(false) {
                    " (listening)"
                } else {
                    ""
                };
                format!(
                    "Connected to channel {} in guild {}{}",
                    details["channel_id"].as_str().unwrap_or("?"),
                    guild_id,
                    listening
                )
            } else {
                format!("Not connected in guild {}", guild_id)
            };
            return CommandOutcome::ok(text, details);
        }

        let mut sessions = Vec::new();
        for guild_id in self.manager.active_guilds().await {
            sessions.push(self.guild_status(guild_id).await);
        }
        CommandOutcome::ok(
            format!("{} active voice session(s)", sessions.len()),
            json!({"sessions": sessions}),
        )
    }

    async fn guild_status(&self, guild_id: u64) -> Value {
        let connected = self.manager.is_connected(guild_id).await;
        let channel_id = self.manager.channel_id(guild_id).await;
        let listening = self.manager.is_listening(guild_id).await;
        json!({
            "guild_id": guild_id.to_string(),
            "connected": connected,
            "channel_id": channel_id.map(|c| c.to_string()),
            "listening": listening,
        })
    }

    async fn listen(&self, params: &Value) -> CommandOutcome {
        let Some(guild_id) = id_param(params, "guild_id") else {
            return CommandOutcome::missing_params(&["guild_id"]);
        };
        let language = text_param(params, "language");

        match self.manager.listen(guild_id, language.clone()).await {
            Ok(()) => CommandOutcome::ok(
                format!("Listening for speech in guild {}", guild_id),
                json!({
                    "guild_id": guild_id.to_string(),
                    "listening": true,
                    "language": language,
                }),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }

    async fn stop_listen(&self, params: &Value) -> CommandOutcome {
        let Some(guild_id) = id_param(params, "guild_id") else {
            return CommandOutcome::missing_params(&["guild_id"]);
        };
        match self.manager.stop_listening(guild_id).await {
            Ok(()) => CommandOutcome::ok(
                format!("Stopped listening in guild {}", guild_id),
                json!({"guild_id": guild_id.to_string(), "listening": false}),
            ),
            Err(e) => CommandOutcome::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoiceSettings;
    use songbird::Songbird;

    fn commands() -> VoiceCommands {
        let (manager, _events) = VoiceManager::new(Songbird::serenity(), VoiceSettings::default());
        VoiceCommands::new(
            Arc::new(manager),
            TtsClient::new("http://127.0.0.1:1/tts"),
        )
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let commands = commands();
        let outcome = commands.dispatch("dance", &json!({})).await;
        assert_eq!(outcome.details["error"], "unknown_action");
    }

    #[tokio::test]
    async fn test_join_missing_params() {
        let commands = commands();
        let outcome = commands.dispatch("join", &json!({})).await;
        assert_eq!(outcome.details["error"], "missing_params");
        assert_eq!(outcome.details["missing"], json!(["guild_id", "channel_id"]));

        let outcome = commands
            .dispatch("join", &json!({"guild_id": "123"}))
            .await;
        assert_eq!(outcome.details["missing"], json!(["channel_id"]));
    }

    #[tokio::test]
    async fn test_ids_accept_snowflake_strings() {
        let commands = commands();
        // String snowflakes parse; the guild simply is not connected
        let outcome = commands
            .dispatch(
                "play",
                &json!({"guild_id": "123456789012345678", "file_path": "/tmp/x.mp3"}),
            )
            .await;
        assert_eq!(outcome.details["error"], "not_connected");
        assert!(outcome.text.contains("join"));
    }

    #[tokio::test]
    async fn test_play_rejects_out_of_range_volume() {
        let commands = commands();
        let outcome = commands
            .dispatch(
                "play",
                &json!({"guild_id": "1", "file_path": "/tmp/x.mp3", "volume": 1.5}),
            )
            .await;
        assert_eq!(outcome.details["error"], "missing_params");
        assert_eq!(outcome.details["missing"], json!(["volume"]));
    }

    #[tokio::test]
    async fn test_tts_requires_text() {
        let commands = commands();
        let outcome = commands.dispatch("tts", &json!({"guild_id": "1"})).await;
        assert_eq!(outcome.details["error"], "missing_params");
        assert_eq!(outcome.details["missing"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_tts_without_connection() {
        let commands = commands();
        let outcome = commands
            .dispatch("tts", &json!({"guild_id": "1", "text": "hello"}))
            .await;
        assert_eq!(outcome.details["error"], "not_connected");
    }

    #[tokio::test]
    async fn test_status_without_guild_lists_sessions() {
        let commands = commands();
        let outcome = commands.dispatch("status", &json!({})).await;
        assert_eq!(outcome.text, "0 active voice session(s)");
        assert_eq!(outcome.details["sessions"], json!([]));
    }

    #[tokio::test]
    async fn test_status_reports_disconnected_guild() {
        let commands = commands();
        let outcome = commands
            .dispatch("status", &json!({"guild_id": "42"}))
            .await;
        assert_eq!(outcome.details["connected"], false);
        assert_eq!(outcome.details["listening"], false);
        assert!(outcome.text.contains("Not connected"));
    }

    #[tokio::test]
    async fn test_listen_without_connection() {
        let commands = commands();
        let outcome = commands
            .dispatch("listen", &json!({"guild_id": "42", "language": "en"}))
            .await;
        assert_eq!(outcome.details["error"], "not_connected");
    }

    #[tokio::test]
    async fn test_stop_and_leave_are_safe_when_not_connected() {
        let commands = commands();
        let outcome = commands.dispatch("stop", &json!({"guild_id": "42"})).await;
        assert_eq!(outcome.details["stopped"], true);

        let outcome = commands.dispatch("leave", &json!({"guild_id": "42"})).await;
        assert_eq!(outcome.details["connected"], false);

        let outcome = commands
            .dispatch("stop-listen", &json!({"guild_id": "42"}))
            .await;
        assert_eq!(outcome.details["listening"], false);
    }

    #[test]
    fn test_volume_param_parsing() {
        assert_eq!(volume_param(&json!({})), Ok(None));
        assert_eq!(volume_param(&json!({"volume": 0.5})), Ok(Some(0.5)));
        assert_eq!(volume_param(&json!({"volume": "0.25"})), Ok(Some(0.25)));
        assert_eq!(volume_param(&json!({"volume": 0})), Ok(Some(0.0)));
        assert_eq!(volume_param(&json!({"volume": 1})), Ok(Some(1.0)));
        assert!(volume_param(&json!({"volume": -0.1})).is_err());
        assert!(volume_param(&json!({"volume": "loud"})).is_err());
        assert!(volume_param(&json!({"volume": true})).is_err());
    }

    #[test]
    fn test_id_param_rejects_zero() {
        assert_eq!(id_param(&json!({"guild_id": 0}), "guild_id"), None);
        assert_eq!(id_param(&json!({"guild_id": "0"}), "guild_id"), None);
        assert_eq!(id_param(&json!({"guild_id": 7}), "guild_id"), Some(7));
    }
}
