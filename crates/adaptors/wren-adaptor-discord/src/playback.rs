//! Audio playback
//!
//! One playback pipeline per guild, created lazily on first play and reused.
//! Concurrent plays on the same guild replace the current track (latest
//! wins); there is no queue. `play` resolves when the driver reports the
//! track finished and errors when it reports a playback failure.

use crate::{guild_id_of, VoiceManager, VoiceSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use songbird::input::{File as AudioFile, Input};
use songbird::tracks::{PlayMode, Track, TrackHandle};
use songbird::{Event, EventContext, EventHandler, TrackEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use wren_core::{Result, WrenError};

/// Per-guild playback state
#[derive(Debug, Default)]
pub(crate) struct Playback {
    /// Handle of the track currently playing, if any
    current: Option<TrackHandle>,
}

impl Playback {
    fn set_current(&mut self, handle: TrackHandle) {
        self.current = Some(handle);
    }

    fn stop_current(&mut self) -> bool {
        match self.current.take() {
            Some(handle) => {
                let _ = handle.stop();
                true
            }
            None => false,
        }
    }
}

impl VoiceSession {
    /// Halt and discard any active playback. Used by `stop` and `leave`.
    pub(crate) fn stop_playback(&mut self) -> bool {
        self.playback
            .as_mut()
            .map(Playback::stop_current)
            .unwrap_or(false)
    }
}

/// Resolves the play future when the track ends, with the driver's verdict.
#[derive(Clone)]
struct TrackEndNotifier {
    done: Arc<Mutex<Option<oneshot::Sender<std::result::Result<(), String>>>>>,
}

#[async_trait]
impl EventHandler for TrackEndNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _handle) in *tracks {
                let outcome = match &state.playing {
                    PlayMode::Errored(e) => Err(e.to_string()),
                    _ => Ok(()),
                };
                if let Some(tx) = self.done.lock().take() {
                    let _ = tx.send(outcome);
                }
            }
        }
        None
    }
}

/// `play` target must exist before any playback state is touched
pub(crate) fn resolve_playable(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(WrenError::FileNotFound(path.to_path_buf()))
    }
}

impl VoiceManager {
    /// Play an audio file in the guild's voice channel.
    ///
    /// `volume` is a linear gain in `[0.0, 1.0]`; omitted volume plays at
    /// source level and never inherits a previous call's setting. Replaces
    /// whatever is currently playing. Resolves once playback finishes.
    pub async fn play(
        &self,
        guild_id: u64,
        file_path: impl AsRef<Path>,
        volume: Option<f32>,
    ) -> Result<()> {
        let call_lock = guild_id_of(guild_id)
            .and_then(|guild| self.songbird.get(guild))
            .ok_or_else(|| WrenError::not_connected(guild_id))?;

        let connected_channel = {
            let call = call_lock.lock().await;
            match call.current_connection() {
                Some(_) => call.current_channel().map(|c| c.0.get()).unwrap_or(0),
                None => return Err(WrenError::not_connected(guild_id)),
            }
        };

        let path = resolve_playable(file_path.as_ref())?;

        let (done_tx, done_rx) = oneshot::channel();
        let notifier = TrackEndNotifier {
            done: Arc::new(Mutex::new(Some(done_tx))),
        };

        let input: Input = AudioFile::new(path.clone()).into();
        let mut track = Track::new(input);
        if let Some(gain) = volume {
            track = track.volume(gain.clamp(0.0, 1.0));
        }

        let handle = {
            let mut call = call_lock.lock().await;
            call.play_only(track)
        };
        handle
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .map_err(|e| WrenError::playback(format!("failed to attach end handler: {}", e)))?;
        handle
            .add_event(Event::Track(TrackEvent::Error), notifier)
            .map_err(|e| WrenError::playback(format!("failed to attach error handler: {}", e)))?;

        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(guild_id)
                .or_insert_with(|| VoiceSession::new(guild_id, connected_channel));
            session
                .playback
                .get_or_insert_with(Playback::default)
                .set_current(handle);
        }

        info!(
            guild_id = %guild_id,
            path = %path.display(),
            volume = ?volume,
            "Playing audio file"
        );

        match done_rx.await {
            Ok(Ok(())) => {
                debug!(guild_id = %guild_id, path = %path.display(), "Playback finished");
                Ok(())
            }
            Ok(Err(e)) => Err(WrenError::playback(e)),
            // Driver torn down mid-track (leave); nothing left to wait for
            Err(_) => {
                debug!(guild_id = %guild_id, "Playback ended with driver teardown");
                Ok(())
            }
        }
    }

    /// Forcibly halt playback in the guild. No-op when nothing is playing.
    pub async fn stop(&self, guild_id: u64) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let stopped = sessions
            .get_mut(&guild_id)
            .map(|s| s.stop_playback())
            .unwrap_or(false);
        if stopped {
            info!(guild_id = %guild_id, "Stopped playback");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VoiceSettings;
    use songbird::Songbird;

    #[test]
    fn test_resolve_playable_missing_file() {
        let err = resolve_playable(Path::new("/nonexistent/clip.mp3")).unwrap_err();
        assert_eq!(err.code(), "file_not_found");
        assert!(err.to_string().contains("/nonexistent/clip.mp3"));
    }

    #[test]
    fn test_resolve_playable_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = resolve_playable(file.path()).unwrap();
        assert_eq!(path, file.path());
    }

    #[test]
    fn test_resolve_playable_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_playable(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_play_without_connection_is_not_connected() {
        let (manager, _events) = VoiceManager::new(Songbird::serenity(), VoiceSettings::default());
        let err = manager.play(42, "/tmp/clip.mp3", None).await.unwrap_err();
        assert_eq!(err.code(), "not_connected");
        // No playback state was created
        assert!(manager.active_guilds().await.is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_playback_is_noop() {
        let (manager, _events) = VoiceManager::new(Songbird::serenity(), VoiceSettings::default());
        manager.stop(42).await.unwrap();
    }
}
