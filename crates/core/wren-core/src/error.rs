//! Error types for Wren

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Wren operations
#[derive(Debug, Error)]
pub enum WrenError {
    /// A required credential (bot token, API key) is not configured
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Voice connection establishment failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation requires an active voice connection
    #[error("Not connected to a voice channel in guild {guild_id}")]
    NotConnected {
        /// Guild the operation targeted
        guild_id: u64,
    },

    /// Playback target does not exist on disk
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Remote API returned a non-success status
    #[error("Remote error ({status}): {body}")]
    Remote {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the remote service
        body: String,
    },

    /// Incoming audio stream could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Audio playback failure reported by the voice driver
    #[error("Playback error: {0}")]
    Playback(String),

    /// TTS collaborator failure
    #[error("TTS error: {0}")]
    Tts(String),

    /// Chat gateway delivery failure
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Network/HTTP error
    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Convenient Result type using WrenError
pub type Result<T> = std::result::Result<T, WrenError>;

impl WrenError {
    /// Create a missing-credential error
    pub fn missing_credential(msg: impl Into<String>) -> Self {
        WrenError::MissingCredential(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        WrenError::Connection(msg.into())
    }

    /// Create a not-connected error for a guild
    pub fn not_connected(guild_id: u64) -> Self {
        WrenError::NotConnected { guild_id }
    }

    /// Create a remote API error
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        WrenError::Remote {
            status,
            body: body.into(),
        }
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        WrenError::Decode(msg.into())
    }

    /// Create a playback error
    pub fn playback(msg: impl Into<String>) -> Self {
        WrenError::Playback(msg.into())
    }

    /// Create a TTS error
    pub fn tts(msg: impl Into<String>) -> Self {
        WrenError::Tts(msg.into())
    }

    /// Create a gateway error
    pub fn gateway(msg: impl Into<String>) -> Self {
        WrenError::Gateway(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        WrenError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        WrenError::Timeout(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        WrenError::Other(msg.into())
    }

    /// Short machine-readable code for command-surface detail objects
    pub fn code(&self) -> &'static str {
        match self {
            WrenError::MissingCredential(_) => "missing_credential",
            WrenError::Connection(_) => "connection_error",
            WrenError::NotConnected { .. } => "not_connected",
            WrenError::FileNotFound(_) => "file_not_found",
            WrenError::Remote { .. } => "remote_error",
            WrenError::Decode(_) => "decode_error",
            WrenError::Playback(_) => "playback_error",
            WrenError::Tts(_) => "tts_error",
            WrenError::Gateway(_) => "gateway_error",
            WrenError::Config(_) => "config_error",
            WrenError::Timeout(_) => "timeout",
            WrenError::Http(_) => "network_error",
            WrenError::Io(_) => "io_error",
            WrenError::Serialization(_) => "serialization_error",
            WrenError::Other(_) => "error",
        }
    }
}
