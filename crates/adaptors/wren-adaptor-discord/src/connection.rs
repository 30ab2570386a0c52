//! Voice connection management
//!
//! Join, rejoin and leave for per-guild voice connections. Joins are bounded
//! by a readiness timeout; rejoining through a live call is preferred over
//! recreating it, which would churn the voice gateway.

use crate::{channel_id_of, guild_id_of, VoiceManager, VoiceSession};
use std::time::Duration;
use tracing::{info, warn};
use wren_core::{Result, WrenError};

impl VoiceManager {
    /// Establish (or move) the voice connection for a guild.
    ///
    /// Waits for the driver to report readiness, bounded by the configured
    /// join timeout. Fails with a connection error when the channel cannot be
    /// joined and a timeout error when readiness never arrives.
    pub async fn join(&self, guild_id: u64, channel_id: u64) -> Result<()> {
        let guild = guild_id_of(guild_id)
            .ok_or_else(|| WrenError::connection("invalid guild id"))?;
        let channel = channel_id_of(channel_id)
            .ok_or_else(|| WrenError::connection("invalid channel id"))?;
        let timeout = Duration::from_secs(self.settings.join_timeout_secs);

        let live_call = match self.songbird.get(guild) {
            Some(call_lock) => {
                let live = call_lock.lock().await.current_connection().is_some();
                live.then_some(call_lock)
            }
            None => None,
        };

        match live_call {
            Some(call_lock) => {
                // Rejoin through the existing call
                let join = {
                    let mut call = call_lock.lock().await;
                    call.join(channel).await.map_err(|e| {
                        WrenError::connection(format!("failed to rejoin voice channel: {}", e))
                    })?
                };
                tokio::time::timeout(timeout, join)
                    .await
                    .map_err(|_| {
                        WrenError::timeout(format!(
                            "voice connection not ready after {}s",
                            timeout.as_secs()
                        ))
                    })?
                    .map_err(|e| {
                        WrenError::connection(format!("failed to rejoin voice channel: {}", e))
                    })?;
                info!(guild_id = %guild_id, channel_id = %channel_id, "Rejoined voice channel");
            }
            None => {
                tokio::time::timeout(timeout, self.songbird.join(guild, channel))
                    .await
                    .map_err(|_| {
                        WrenError::timeout(format!(
                            "voice connection not ready after {}s",
                            timeout.as_secs()
                        ))
                    })?
                    .map_err(|e| {
                        WrenError::connection(format!("failed to join voice channel: {}", e))
                    })?;
                info!(guild_id = %guild_id, channel_id = %channel_id, "Joined voice channel");
            }
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&guild_id) {
            Some(session) => session.channel_id = channel_id,
            None => {
                sessions.insert(guild_id, VoiceSession::new(guild_id, channel_id));
            }
        }

        Ok(())
    }

    /// Leave the guild's voice channel.
    ///
    /// Stops playback, drops listener state and destroys the connection.
    /// Safe to call when not connected.
    pub async fn leave(&self, guild_id: u64) -> Result<()> {
        if let Some(mut session) = self.sessions.write().await.remove(&guild_id) {
            session.stop_playback();
            if let Some(listener) = session.listener.take() {
                listener.disable();
            }
        }

        let Some(guild) = guild_id_of(guild_id) else {
            return Ok(());
        };
        if self.songbird.get(guild).is_some() {
            if let Err(e) = self.songbird.remove(guild).await {
                warn!(guild_id = %guild_id, error = %e, "Error leaving voice channel");
            }
            info!(guild_id = %guild_id, "Left voice channel");
        }

        Ok(())
    }

    /// Whether a live voice connection exists for the guild
    pub async fn is_connected(&self, guild_id: u64) -> bool {
        let Some(guild) = guild_id_of(guild_id) else {
            return false;
        };
        match self.songbird.get(guild) {
            Some(call_lock) => call_lock.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    /// Voice channel the bot is connected to in the guild, if any
    pub async fn channel_id(&self, guild_id: u64) -> Option<u64> {
        let guild = guild_id_of(guild_id)?;
        let call_lock = self.songbird.get(guild)?;
        let call = call_lock.lock().await;
        call.current_channel().map(|c| c.0.get())
    }

    /// Whether listening is active for the guild
    pub async fn is_listening(&self, guild_id: u64) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(&guild_id)
            .and_then(|s| s.listener.as_ref())
            .map(|l| l.is_enabled())
            .unwrap_or(false)
    }
}
