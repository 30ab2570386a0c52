//! Per-speaker utterance capture
//!
//! Tracks which users are speaking in a guild's voice channel, buffers their
//! decoded audio into discrete utterances, and hands finalized utterances to
//! the transcription client. Each (guild, user) pair moves through an
//! explicit state machine: Idle → Capturing → Finalizing → Idle. Absence
//! from the capture map is Idle; at most one buffer exists per user.
//!
//! Silence-based segmentation approximates utterance boundaries without a
//! real voice-activity model, and the minimum-duration floor suppresses
//! clicks and coughs. Finalized utterances are transcribed on independent
//! spawned tasks: one user's failure never touches another user's capture or
//! the guild's connection.

use crate::transcribe::TranscriptionClient;
use crate::{guild_id_of, wav, TranscriptEvent, VoiceManager};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use songbird::{CoreEvent, Event, EventContext, EventHandler};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wren_core::{Result, WrenError};

/// Discord delivers decoded voice as 48 kHz samples
pub const DISCORD_SAMPLE_RATE: u32 = 48_000;
/// ...in two channels
pub const DISCORD_CHANNELS: u16 = 2;

/// Per-guild listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Language hint passed to the transcription API
    pub language: Option<String>,
    /// Continuous silence that ends an utterance
    pub silence: Duration,
    /// Utterances captured for less than this are discarded
    pub min_speech: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            language: None,
            silence: Duration::from_millis(1500),
            min_speech: Duration::from_millis(500),
        }
    }
}

/// Audio accumulated for one in-progress utterance
#[derive(Debug)]
struct UtteranceBuffer {
    /// Decoded PCM samples, 48 kHz stereo interleaved
    samples: Vec<i16>,
    /// When capture began
    started_at: Instant,
    /// Last time decoded audio arrived
    last_voice: Instant,
}

impl UtteranceBuffer {
    fn new(chunk: &[i16]) -> Self {
        let now = Instant::now();
        Self {
            samples: chunk.to_vec(),
            started_at: now,
            last_voice: now,
        }
    }

    fn push(&mut self, chunk: &[i16]) {
        self.samples.extend_from_slice(chunk);
        self.last_voice = Instant::now();
    }

    /// Wall-clock span this utterance has been capturing
    fn captured_for(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Duration of the buffered audio itself
    fn audio_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / (DISCORD_SAMPLE_RATE as u64 * DISCORD_CHANNELS as u64)
    }
}

/// Capture state for one (guild, user) pair; Idle is absence from the map
#[derive(Debug)]
enum CaptureState {
    /// Speaking; audio is accumulating
    Capturing(UtteranceBuffer),
    /// Handed off; a transcription task owns the buffer until it completes
    Finalizing,
}

/// Listening state for one guild
#[derive(Debug)]
pub struct GuildListener {
    guild_id: u64,
    channel_id: u64,
    silence: Duration,
    min_speech: Duration,
    language: RwLock<Option<String>>,
    enabled: AtomicBool,
    /// Capture state per user; the single-buffer invariant lives here
    captures: Mutex<HashMap<u64, CaptureState>>,
    /// Voice packets carry SSRCs; speaking-state updates map them to users
    ssrc_map: RwLock<HashMap<u32, u64>>,
    transcriber: Arc<TranscriptionClient>,
    events_tx: mpsc::Sender<TranscriptEvent>,
}

impl GuildListener {
    pub(crate) fn new(
        guild_id: u64,
        channel_id: u64,
        config: ListenerConfig,
        transcriber: Arc<TranscriptionClient>,
        events_tx: mpsc::Sender<TranscriptEvent>,
    ) -> Self {
        Self {
            guild_id,
            channel_id,
            silence: config.silence,
            min_speech: config.min_speech,
            language: RwLock::new(config.language),
            enabled: AtomicBool::new(true),
            captures: Mutex::new(HashMap::new()),
            ssrc_map: RwLock::new(HashMap::new()),
            transcriber,
            events_tx,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Stop capturing. Buffers still Capturing are dropped; utterances
    /// already Finalizing run to completion on their own tasks.
    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        self.captures
            .lock()
            .retain(|_, state| matches!(state, CaptureState::Finalizing));
    }

    pub(crate) fn set_language(&self, language: Option<String>) {
        *self.language.write() = language;
    }

    /// Record an SSRC→user mapping from a speaking-state update
    pub(crate) fn note_speaking(&self, ssrc: u32, user_id: Option<u64>) {
        if let Some(user_id) = user_id {
            self.ssrc_map.write().insert(ssrc, user_id);
        }
    }

    pub(crate) fn user_for_ssrc(&self, ssrc: u32) -> Option<u64> {
        self.ssrc_map.read().get(&ssrc).copied()
    }

    /// Feed one decoded chunk for a user.
    ///
    /// The first chunk while Idle starts a capture; further chunks append.
    /// Chunks arriving while the user's previous utterance is Finalizing are
    /// dropped; utterances from one user never overlap.
    pub(crate) fn accept_chunk(&self, user_id: u64, chunk: &[i16]) {
        if !self.is_enabled() {
            return;
        }
        let mut captures = self.captures.lock();
        match captures.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if let CaptureState::Capturing(buffer) = entry.get_mut() {
                    buffer.push(chunk);
                }
            }
            Entry::Vacant(entry) => {
                debug!(
                    guild_id = %self.guild_id,
                    user_id = %user_id,
                    "User started speaking"
                );
                entry.insert(CaptureState::Capturing(UtteranceBuffer::new(chunk)));
            }
        }
    }

    /// A speaking user produced an undecodable packet: drop that utterance
    /// only. Other users and the listener itself are unaffected.
    pub(crate) fn note_decode_failure(&self, user_id: u64) {
        let mut captures = self.captures.lock();
        if matches!(captures.get(&user_id), Some(CaptureState::Capturing(_))) {
            warn!(
                guild_id = %self.guild_id,
                user_id = %user_id,
                "Audio decode failed, dropping utterance"
            );
            captures.remove(&user_id);
        }
    }

    /// Finalize every capture whose silence threshold has elapsed.
    ///
    /// Returns the buffers that passed the minimum-duration floor; their
    /// entries are left in Finalizing until the transcription task clears
    /// them. Too-short utterances are discarded silently.
    pub(crate) fn sweep_silence(&self) -> Vec<(u64, UtteranceBuffer)> {
        let mut captures = self.captures.lock();
        let expired: Vec<u64> = captures
            .iter()
            .filter_map(|(user_id, state)| match state {
                CaptureState::Capturing(buffer)
                    if buffer.last_voice.elapsed() >= self.silence =>
                {
                    Some(*user_id)
                }
                _ => None,
            })
            .collect();

        let mut finalized = Vec::new();
        for user_id in expired {
            if let Some(buffer) = Self::take_for_finalize(
                &mut captures,
                user_id,
                self.min_speech,
                self.guild_id,
            ) {
                finalized.push((user_id, buffer));
            }
        }
        finalized
    }

    /// Finalize a user's capture immediately (stream end / disconnect).
    pub(crate) fn finish_stream(&self, user_id: u64) -> Option<UtteranceBuffer> {
        let mut captures = self.captures.lock();
        Self::take_for_finalize(&mut captures, user_id, self.min_speech, self.guild_id)
    }

    /// Capturing → Finalizing, applying the duration floor. Returns the
    /// buffer to transcribe, or None when the utterance was discarded (the
    /// entry then goes straight back to Idle).
    fn take_for_finalize(
        captures: &mut HashMap<u64, CaptureState>,
        user_id: u64,
        min_speech: Duration,
        guild_id: u64,
    ) -> Option<UtteranceBuffer> {
        if !matches!(captures.get(&user_id), Some(CaptureState::Capturing(_))) {
            return None;
        }
        let Some(CaptureState::Capturing(buffer)) = captures.remove(&user_id) else {
            return None;
        };

        if buffer.samples.is_empty() || buffer.captured_for() < min_speech {
            debug!(
                guild_id = %guild_id,
                user_id = %user_id,
                captured_ms = %buffer.captured_for().as_millis(),
                "Discarding too-short utterance"
            );
            return None;
        }

        captures.insert(user_id, CaptureState::Finalizing);
        Some(buffer)
    }

    /// Transcribe a finalized utterance on its own task.
    pub(crate) fn spawn_transcription(self: Arc<Self>, user_id: u64, buffer: UtteranceBuffer) {
        tokio::spawn(async move {
            if let Err(e) = self.transcribe_utterance(user_id, buffer).await {
                warn!(
                    guild_id = %self.guild_id,
                    user_id = %user_id,
                    error = %e,
                    "Utterance transcription failed"
                );
            }
            // Finalizing → Idle
            self.captures.lock().remove(&user_id);
        });
    }

    async fn transcribe_utterance(&self, user_id: u64, buffer: UtteranceBuffer) -> Result<()> {
        let audio_ms = buffer.audio_ms();
        let wav_bytes = wav::encode_wav_i16(&buffer.samples, DISCORD_SAMPLE_RATE, DISCORD_CHANNELS);
        let path = std::env::temp_dir().join(format!("wren-utterance-{}.wav", Uuid::new_v4()));
        tokio::fs::write(&path, &wav_bytes).await?;

        let language = self.language.read().clone();
        let outcome = self.transcriber.transcribe(&path, language.as_deref()).await;

        // Cleanup is attempted on both outcomes
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!(path = %path.display(), error = %e, "Failed to remove temp utterance file");
        }

        match outcome? {
            Some(transcript) => {
                info!(
                    guild_id = %self.guild_id,
                    user_id = %user_id,
                    audio_ms = %audio_ms,
                    text = %transcript.text,
                    "Transcribed utterance"
                );
                let event = TranscriptEvent {
                    guild_id: self.guild_id,
                    user_id,
                    channel_id: self.channel_id,
                    text: transcript.text,
                    language: transcript.language,
                };
                if self.events_tx.send(event).await.is_err() {
                    warn!(guild_id = %self.guild_id, "Transcript event channel closed");
                }
            }
            None => {
                debug!(
                    guild_id = %self.guild_id,
                    user_id = %user_id,
                    "Utterance suppressed by noise filter"
                );
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn capture_counts(&self) -> (usize, usize) {
        let captures = self.captures.lock();
        let capturing = captures
            .values()
            .filter(|s| matches!(s, CaptureState::Capturing(_)))
            .count();
        let finalizing = captures
            .values()
            .filter(|s| matches!(s, CaptureState::Finalizing))
            .count();
        (capturing, finalizing)
    }
}

/// Songbird event handler feeding a guild listener
#[derive(Clone)]
pub(crate) struct VoiceListenerHandler {
    pub listener: Arc<GuildListener>,
}

#[async_trait]
impl EventHandler for VoiceListenerHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::SpeakingStateUpdate(speaking) => {
                self.listener
                    .note_speaking(speaking.ssrc, speaking.user_id.map(|u| u.0));
            }
            EventContext::VoiceTick(tick) => {
                if !self.listener.is_enabled() {
                    return None;
                }
                for (ssrc, data) in &tick.speaking {
                    let Some(user_id) = self.listener.user_for_ssrc(*ssrc) else {
                        continue;
                    };
                    match data.decoded_voice.as_deref() {
                        Some(audio) if !audio.is_empty() => {
                            self.listener.accept_chunk(user_id, audio)
                        }
                        _ => self.listener.note_decode_failure(user_id),
                    }
                }
                for (user_id, buffer) in self.listener.sweep_silence() {
                    Arc::clone(&self.listener).spawn_transcription(user_id, buffer);
                }
            }
            EventContext::ClientDisconnect(disconnect) => {
                let user_id = disconnect.user_id.0;
                if let Some(buffer) = self.listener.finish_stream(user_id) {
                    Arc::clone(&self.listener).spawn_transcription(user_id, buffer);
                }
            }
            _ => {}
        }
        None
    }
}

impl VoiceManager {
    /// Start transcribing speech in the guild's voice channel.
    ///
    /// Requires an active connection. Calling again while listening updates
    /// the language hint and re-enables capture; the driver-side handlers are
    /// registered once per session.
    pub async fn listen(&self, guild_id: u64, language: Option<String>) -> Result<()> {
        let call_lock = guild_id_of(guild_id)
            .and_then(|guild| self.songbird.get(guild))
            .ok_or_else(|| WrenError::not_connected(guild_id))?;
        {
            let call = call_lock.lock().await;
            if call.current_connection().is_none() {
                return Err(WrenError::not_connected(guild_id));
            }
        }

        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&guild_id)
            .ok_or_else(|| WrenError::not_connected(guild_id))?;

        let language = language.or_else(|| self.settings.language.clone());
        if let Some(listener) = &session.listener {
            listener.set_language(language);
            listener.enable();
            info!(guild_id = %guild_id, "Listening re-enabled");
            return Ok(());
        }

        let config = ListenerConfig {
            language,
            silence: Duration::from_millis(self.settings.silence_ms),
            min_speech: Duration::from_millis(self.settings.min_speech_ms),
        };
        let listener = Arc::new(GuildListener::new(
            guild_id,
            session.channel_id,
            config,
            Arc::clone(&self.transcriber),
            self.events_tx.clone(),
        ));

        let handler = VoiceListenerHandler {
            listener: Arc::clone(&listener),
        };
        {
            let mut call = call_lock.lock().await;
            call.add_global_event(Event::Core(CoreEvent::SpeakingStateUpdate), handler.clone());
            call.add_global_event(Event::Core(CoreEvent::VoiceTick), handler.clone());
            call.add_global_event(Event::Core(CoreEvent::ClientDisconnect), handler);
        }
        session.listener = Some(listener);

        info!(guild_id = %guild_id, "Listening started");
        Ok(())
    }

    /// Stop capturing speech in the guild.
    ///
    /// Clears per-user capture state; utterances already being finalized run
    /// to completion. No-op when the guild is not listening.
    pub async fn stop_listening(&self, guild_id: u64) -> Result<()> {
        let sessions = self.sessions.read().await;
        if let Some(listener) = sessions.get(&guild_id).and_then(|s| s.listener.as_ref()) {
            listener.disable();
            info!(guild_id = %guild_id, "Listening stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcribe::TranscriptionConfig;

    fn listener_with(config: ListenerConfig) -> (Arc<GuildListener>, mpsc::Receiver<TranscriptEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let transcriber = Arc::new(TranscriptionClient::new(TranscriptionConfig {
            endpoint: "http://127.0.0.1:1/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            no_speech_threshold: 0.5,
        }));
        (
            Arc::new(GuildListener::new(10, 20, config, transcriber, tx)),
            rx,
        )
    }

    fn chunk() -> Vec<i16> {
        // 20ms of 48kHz stereo audio
        vec![100i16; 1920]
    }

    #[test]
    fn test_single_buffer_per_user() {
        let (listener, _rx) = listener_with(ListenerConfig::default());
        listener.accept_chunk(7, &chunk());
        listener.accept_chunk(7, &chunk());
        let (capturing, finalizing) = listener.capture_counts();
        assert_eq!((capturing, finalizing), (1, 0));

        // The second chunk appended rather than starting a new buffer
        let captures = listener.captures.lock();
        match captures.get(&7) {
            Some(CaptureState::Capturing(buffer)) => {
                assert_eq!(buffer.samples.len(), 2 * chunk().len())
            }
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn test_concurrent_users_capture_independently() {
        let (listener, _rx) = listener_with(ListenerConfig::default());
        listener.accept_chunk(1, &chunk());
        listener.accept_chunk(2, &chunk());
        listener.accept_chunk(3, &chunk());
        assert_eq!(listener.capture_counts(), (3, 0));
    }

    #[test]
    fn test_short_utterance_is_discarded() {
        let (listener, _rx) = listener_with(ListenerConfig {
            silence: Duration::ZERO,
            min_speech: Duration::from_secs(10),
            ..ListenerConfig::default()
        });
        listener.accept_chunk(7, &chunk());
        let finalized = listener.sweep_silence();
        assert!(finalized.is_empty());
        // Straight back to Idle, nothing handed to transcription
        assert_eq!(listener.capture_counts(), (0, 0));
    }

    #[test]
    fn test_silence_finalizes_after_threshold() {
        let (listener, _rx) = listener_with(ListenerConfig {
            silence: Duration::from_millis(40),
            min_speech: Duration::ZERO,
            ..ListenerConfig::default()
        });
        listener.accept_chunk(7, &chunk());
        assert!(listener.sweep_silence().is_empty());
        assert_eq!(listener.capture_counts(), (1, 0));

        std::thread::sleep(Duration::from_millis(50));
        let finalized = listener.sweep_silence();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0].0, 7);
        assert_eq!(listener.capture_counts(), (0, 1));
    }

    #[test]
    fn test_chunks_during_finalizing_are_dropped() {
        let (listener, _rx) = listener_with(ListenerConfig {
            silence: Duration::ZERO,
            min_speech: Duration::ZERO,
            ..ListenerConfig::default()
        });
        listener.accept_chunk(7, &chunk());
        let finalized = listener.sweep_silence();
        assert_eq!(finalized.len(), 1);

        // Utterance 1 is still Finalizing; new audio must not open a buffer
        listener.accept_chunk(7, &chunk());
        assert_eq!(listener.capture_counts(), (0, 1));
    }

    #[test]
    fn test_finish_stream_flushes_capture() {
        let (listener, _rx) = listener_with(ListenerConfig {
            min_speech: Duration::ZERO,
            ..ListenerConfig::default()
        });
        listener.accept_chunk(7, &chunk());
        let buffer = listener.finish_stream(7).expect("buffer");
        assert_eq!(buffer.samples.len(), chunk().len());
        assert_eq!(listener.capture_counts(), (0, 1));
        assert!(listener.finish_stream(7).is_none());
    }

    #[test]
    fn test_decode_failure_drops_only_that_capture() {
        let (listener, _rx) = listener_with(ListenerConfig::default());
        listener.accept_chunk(1, &chunk());
        listener.accept_chunk(2, &chunk());
        listener.note_decode_failure(1);
        assert_eq!(listener.capture_counts(), (1, 0));
        assert!(matches!(
            listener.captures.lock().get(&2),
            Some(CaptureState::Capturing(_))
        ));
    }

    #[test]
    fn test_disable_clears_captures() {
        let (listener, _rx) = listener_with(ListenerConfig::default());
        listener.accept_chunk(1, &chunk());
        listener.disable();
        assert_eq!(listener.capture_counts(), (0, 0));
        assert!(!listener.is_enabled());

        // Disabled listeners ignore incoming audio
        listener.accept_chunk(1, &chunk());
        assert_eq!(listener.capture_counts(), (0, 0));
    }

    #[test]
    fn test_ssrc_mapping() {
        let (listener, _rx) = listener_with(ListenerConfig::default());
        assert_eq!(listener.user_for_ssrc(555), None);
        listener.note_speaking(555, Some(7));
        assert_eq!(listener.user_for_ssrc(555), Some(7));
        listener.note_speaking(556, None);
        assert_eq!(listener.user_for_ssrc(556), None);
    }

    #[test]
    fn test_buffer_audio_duration() {
        // 48kHz stereo: 96000 samples per second of audio
        let buffer = UtteranceBuffer::new(&vec![0i16; 96_000]);
        assert_eq!(buffer.audio_ms(), 1000);
    }

    #[tokio::test]
    async fn test_failed_transcription_returns_user_to_idle() {
        // No API key configured: the spawned task fails fast, logs, and must
        // still clear the Finalizing entry
        let (listener, _rx) = listener_with(ListenerConfig {
            silence: Duration::ZERO,
            min_speech: Duration::ZERO,
            ..ListenerConfig::default()
        });
        listener.accept_chunk(7, &chunk());
        let finalized = listener.sweep_silence();
        assert_eq!(finalized.len(), 1);

        for (user_id, buffer) in finalized {
            Arc::clone(&listener).spawn_transcription(user_id, buffer);
        }
        for _ in 0..50 {
            if listener.capture_counts() == (0, 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(listener.capture_counts(), (0, 0));

        // The user can start a fresh utterance afterwards
        listener.accept_chunk(7, &chunk());
        assert_eq!(listener.capture_counts(), (1, 0));
    }
}
