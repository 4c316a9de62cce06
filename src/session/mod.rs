//! Voice session orchestration
//!
//! [`VoiceSession`] owns the capture and playback devices, the rate-limited
//! uplink, the realtime connection, and the turn state machine. Three loops
//! feed it: the capture worker thread, the inbound event dispatch task, and
//! the periodic flush task. Turn decisions are computed under one lock and
//! the device/network I/O they call for runs after it is released; the
//! uplink keeps its own lock so frame appends never contend with turn state.

mod turn;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{Notify, mpsc};

use crate::audio::{AudioCapture, AudioPlayback};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::realtime::protocol::ServerEvent;
use crate::realtime::{ConnectionEvent, RealtimeConnection};
use crate::uplink::{CommitDecision, RateLimitedUplink};
use turn::{StartDecision, TurnEngine};

/// Flush poll cadence; the uplink applies its own interval/backoff gate
const FLUSH_TICK: Duration = Duration::from_millis(100);

/// Callbacks consumed by a UI collaborator; every method defaults to a no-op
pub trait SessionListener: Send + Sync {
    fn on_connected(&self) {}
    fn on_disconnected(&self) {}
    fn on_voice_session_started(&self) {}
    fn on_voice_session_stopped(&self) {}
    /// Raw response text: full text parts, opaque unrecognized events, and
    /// interruption notices
    fn on_response(&self, _text: &str) {}
    /// Verbose raw event text for diagnostics
    fn on_trace(&self, _text: &str) {}
    /// Incremental agent text
    fn on_text_delta(&self, _delta: &str) {}
    /// The server committed the user's speech
    fn on_user_speech_ended(&self) {}
    /// A response's audio began; `mic_was_idle` is the pre-turn mic state
    fn on_audio_response_started(&self, _mic_was_idle: bool) {}
    fn on_audio_response_completed(&self) {}
    fn on_user_transcript(&self, _text: &str) {}
    fn on_agent_transcript(&self, _text: &str) {}
    fn on_error(&self, _error: &Error) {}
    /// One entry per protocol exchange, for a request-trail display
    fn on_request_log(&self, _kind: &str, _detail: &str, _status: &str) {}
}

/// Event stream for transcript and diagnostics consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Completed transcription of the user's speech
    UserTranscript { text: String },
    /// Final transcript of an agent audio response
    AgentTranscript { text: String },
    /// Incremental agent text
    AgentTextDelta { text: String },
    /// Mirror of the request-log trail
    RequestLogged {
        kind: String,
        detail: String,
        status: String,
    },
}

/// One full-duplex voice conversation
pub struct VoiceSession {
    connection: RealtimeConnection,
    capture: Mutex<AudioCapture>,
    playback: Mutex<AudioPlayback>,
    uplink: Arc<RateLimitedUplink>,
    turn: Mutex<TurnEngine>,
    listener: Arc<dyn SessionListener>,
    transcript_tx: mpsc::UnboundedSender<TranscriptEvent>,
    /// Latest capture RMS level, stored as f32 bits
    input_level: Arc<AtomicU32>,
    flush_notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

impl VoiceSession {
    /// Build the devices, open the realtime connection, and start the
    /// dispatch and flush loops
    ///
    /// Device probing runs first so a missing microphone or speaker fails
    /// the whole session before any network work. Returns the session handle
    /// plus the transcript-event receiver.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid, a device cannot
    /// be opened, or the connection handshake fails.
    pub async fn connect(
        config: SessionConfig,
        listener: Arc<dyn SessionListener>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<TranscriptEvent>)> {
        config.validate()?;

        let capture = AudioCapture::new()?;
        let playback = AudioPlayback::new()?;

        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();

        let detail = format!("connecting to {} with model {}", config.endpoint, config.model);
        listener.on_request_log("WebSocket Connection", &detail, "PENDING");
        let _ = transcript_tx.send(TranscriptEvent::RequestLogged {
            kind: "WebSocket Connection".to_string(),
            detail,
            status: "PENDING".to_string(),
        });

        let (connection, event_rx) = match RealtimeConnection::connect(&config).await {
            Ok(pair) => pair,
            Err(e) => {
                listener.on_request_log(
                    "WebSocket Connection",
                    &format!("connection failed: {e}"),
                    "ERROR",
                );
                return Err(e);
            }
        };

        let session = Arc::new(Self {
            connection,
            capture: Mutex::new(capture),
            playback: Mutex::new(playback),
            uplink: Arc::new(RateLimitedUplink::new()),
            turn: Mutex::new(TurnEngine::new()),
            listener,
            transcript_tx,
            input_level: Arc::new(AtomicU32::new(0)),
            flush_notify: Arc::new(Notify::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        let dispatch = Arc::clone(&session);
        tokio::spawn(async move {
            dispatch.dispatch_loop(event_rx).await;
        });
        session.spawn_flush_task();

        Ok((session, transcript_rx))
    }

    /// Start streaming the microphone to the service
    ///
    /// A warning no-op when disconnected. Called while a response is
    /// playing, this is an interruption: the interrupted flag is set and
    /// audible playback is muted, each exactly once per turn no matter how
    /// often this is called.
    ///
    /// # Errors
    ///
    /// Returns an error when the capture worker cannot be started.
    pub fn start_voice_session(&self) -> Result<()> {
        if !self.connection.is_connected() {
            tracing::warn!("cannot start voice session, not connected");
            return Ok(());
        }

        let muted = self.lock_playback().is_muted();
        // bind the decision so the turn guard drops before any device call
        let decision = self.lock_turn().start_requested(muted);
        match decision {
            StartDecision::Fresh => tracing::info!("voice session started"),
            StartDecision::Interruption { mute_playback } => {
                tracing::info!("user interrupting active response");
                if mute_playback {
                    self.lock_playback().set_muted(true);
                    self.listener.on_trace("speaker muted for interruption");
                }
            }
            StartDecision::AlreadyInterrupted => {
                tracing::debug!("interruption already active");
            }
        }

        if let Err(e) = self.start_capture_worker() {
            self.lock_turn().stop_requested();
            self.listener.on_error(&e);
            return Err(e);
        }
        self.listener.on_voice_session_started();
        Ok(())
    }

    /// Stop the microphone and run the commit flow
    ///
    /// Below the minimum buffered duration nothing is sent and the buffer is
    /// discarded quietly; otherwise the tail is flushed, the buffer
    /// committed, and a response requested.
    pub async fn stop_voice_session(&self) {
        self.lock_capture().stop();
        self.lock_turn().stop_requested();
        self.input_level.store(0, Ordering::Relaxed);

        self.run_commit_flow(false).await;

        self.listener.on_voice_session_stopped();
        tracing::info!("voice session stopped");
    }

    /// Send a typed user message and request a response
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails or the writer is gone.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.connection.send_text(text).await?;
        self.request_log("API Request", &format!("text message sent: {text}"), "SENT");
        self.connection.request_response().await?;
        self.request_log("API Request", "response requested", "SENT");
        Ok(())
    }

    /// Add assistant context to the conversation without requesting a
    /// response
    ///
    /// # Errors
    ///
    /// Returns an error when serialization fails or the writer is gone.
    pub async fn inject_assistant_text(&self, text: &str) -> Result<()> {
        self.connection.inject_assistant_text(text).await?;
        self.request_log("API Request", "assistant context injected", "SENT");
        Ok(())
    }

    /// Mute or unmute the speaker (the deliberate-mute workflow)
    pub fn set_speaker_muted(&self, muted: bool) {
        self.lock_playback().set_muted(muted);
    }

    #[must_use]
    pub fn is_speaker_muted(&self) -> bool {
        self.lock_playback().is_muted()
    }

    /// Whether the mic is streaming (intent, not device state)
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock_turn().is_capturing()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Latest capture RMS level, 0-100
    #[must_use]
    pub fn input_level(&self) -> f32 {
        f32::from_bits(self.input_level.load(Ordering::Relaxed))
    }

    /// Stop everything and close the connection; safe to call repeatedly
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutting down voice session");
        // last chance for buffered audio to become a commit
        self.stop_voice_session().await;
        self.lock_playback().abort();
        self.connection.disconnect().await;
        self.flush_notify.notify_one();
    }

    // -- loops ---------------------------------------------------------------

    async fn dispatch_loop(&self, mut events: mpsc::Receiver<ConnectionEvent>) {
        while let Some(event) = events.recv().await {
            let closed = matches!(event, ConnectionEvent::Closed { .. });
            self.handle_event(event);
            if closed {
                break;
            }
        }
        tracing::debug!("event dispatch stopped");
    }

    fn spawn_flush_task(&self) {
        let uplink = Arc::clone(&self.uplink);
        let connection = self.connection.clone();
        let notify = Arc::clone(&self.flush_notify);
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_TICK);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = notify.notified() => {}
                }
                if shutdown.load(Ordering::Acquire) {
                    break;
                }
                if !connection.is_connected() {
                    continue;
                }
                let Some(bytes) = uplink.try_flush(Instant::now()) else {
                    continue;
                };
                match connection.send_audio(&bytes).await {
                    Ok(()) => uplink.record_sent(bytes.len()),
                    Err(e) => {
                        tracing::warn!(error = %e, "audio flush failed");
                        uplink.record_failure();
                    }
                }
            }
            tracing::debug!("flush task stopped");
        });
    }

    fn start_capture_worker(&self) -> Result<()> {
        let uplink = Arc::clone(&self.uplink);
        let notify = Arc::clone(&self.flush_notify);
        let level = Arc::clone(&self.input_level);
        self.lock_capture().start(move |frame, rms| {
            level.store(rms.to_bits(), Ordering::Relaxed);
            uplink.submit(frame.bytes());
            notify.notify_one();
        })
    }

    // -- event handling ------------------------------------------------------

    fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open { status } => {
                tracing::info!(status, "session connected");
                self.request_log(
                    "WebSocket Connection",
                    "connected to realtime service",
                    &status.to_string(),
                );
                self.listener.on_connected();
            }
            ConnectionEvent::Closed { reason } => {
                self.handle_connection_closed(reason);
            }
            ConnectionEvent::TransportError { message } => {
                let error = Error::Connection(message);
                tracing::error!(error = %error, "transport error");
                self.uplink.record_failure();
                self.listener.on_error(&error);
            }
            ConnectionEvent::Malformed { error, raw } => {
                tracing::error!(error = %error, raw = %raw, "malformed service event");
                let error = Error::Connection(format!("malformed event: {error}"));
                self.listener.on_error(&error);
            }
            ConnectionEvent::Event { event, raw } => {
                self.handle_server_event(event, &raw);
            }
            ConnectionEvent::Unknown { event_type, raw } => {
                tracing::debug!(event_type = %event_type, "forwarding unrecognized event");
                self.listener.on_response(&raw);
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_server_event(&self, event: ServerEvent, raw: &str) {
        match event {
            ServerEvent::SessionCreated => {
                tracing::info!("session created");
                self.request_log("API Response", "session created", "200");
            }
            ServerEvent::SessionUpdated => {
                tracing::info!("session configuration updated");
                self.request_log("API Response", "session configuration updated", "200");
            }
            ServerEvent::SpeechStarted => {
                tracing::info!("speech detected");
            }
            ServerEvent::SpeechStopped => {
                tracing::info!("speech ended");
            }
            ServerEvent::InputAudioCommitted => {
                let muted = self.lock_playback().is_muted();
                if self.lock_turn().speech_ended(muted) {
                    tracing::info!("restoring speaker after interruption");
                    self.lock_playback().set_muted(false);
                }
                self.request_log("API Response", "audio buffer committed", "200");
                self.listener.on_user_speech_ended();
            }
            ServerEvent::ItemCreated => {
                tracing::info!("conversation item created");
            }
            ServerEvent::ResponseCreated => {
                if self.lock_turn().response_preempting() {
                    tracing::info!("new response preempts active turn, stopping playback");
                    self.lock_playback().abort();
                    self.listener.on_response("[response interrupted by a new response]");
                }
            }
            ServerEvent::OutputItemAdded => {
                tracing::debug!("response item added");
            }
            ServerEvent::ContentPartAdded { part } => {
                if let Some(part) = part
                    && part.kind == "text"
                    && let Some(text) = part.text
                {
                    tracing::info!(text = %text, "text response");
                    self.listener.on_response(&text);
                }
            }
            ServerEvent::ContentPartDone => {
                self.listener.on_trace(raw);
            }
            ServerEvent::TextDelta { delta } => {
                self.lock_turn().append_delta(&delta);
                self.listener.on_text_delta(&delta);
                self.send_transcript(TranscriptEvent::AgentTextDelta { text: delta });
            }
            ServerEvent::AudioDelta { delta } => {
                self.handle_audio_delta(&delta);
            }
            ServerEvent::AudioDone => {
                tracing::debug!("audio response completed");
                self.request_log("API Response", "audio response completed", "200");
            }
            ServerEvent::AudioTranscriptDelta { delta } => {
                self.lock_turn().append_delta(&delta);
                self.listener.on_text_delta(&delta);
                self.listener.on_trace(raw);
                self.send_transcript(TranscriptEvent::AgentTextDelta { text: delta });
            }
            ServerEvent::AudioTranscriptDone { transcript } => {
                {
                    let turn = self.lock_turn();
                    let streamed = turn.streamed();
                    if !streamed.is_empty() && streamed != transcript {
                        tracing::debug!(
                            streamed_len = streamed.len(),
                            transcript_len = transcript.len(),
                            "final transcript differs from streamed deltas"
                        );
                    }
                }
                self.listener.on_agent_transcript(&transcript);
                self.send_transcript(TranscriptEvent::AgentTranscript { text: transcript });
            }
            ServerEvent::ResponseDone => {
                self.handle_response_done();
            }
            ServerEvent::InputTranscriptionDelta { .. } => {
                self.listener.on_trace(raw);
            }
            ServerEvent::InputTranscriptionCompleted { transcript } => {
                tracing::debug!("input transcription completed");
                self.listener.on_user_transcript(&transcript);
                self.send_transcript(TranscriptEvent::UserTranscript { text: transcript });
            }
            ServerEvent::InputTranscriptionFailed { item_id, error } => {
                let message = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "transcription failed".to_string());
                tracing::error!(item_id = %item_id, error = %message, "input transcription failed");
                self.uplink.record_failure();
                let error = if is_rate_limited(None, &message) {
                    Error::RateLimited(message)
                } else {
                    Error::Transcription(message)
                };
                self.listener.on_error(&error);
            }
            ServerEvent::Error { error } => {
                let body = error.unwrap_or_default();
                let message = body.message.unwrap_or_else(|| "unknown error".to_string());
                tracing::error!(code = ?body.code, error = %message, "service error");
                self.uplink.record_failure();
                let error = if is_rate_limited(body.code.as_deref(), &message) {
                    Error::RateLimited(message)
                } else {
                    Error::Api(message)
                };
                self.listener.on_error(&error);
            }
        }
    }

    fn handle_audio_delta(&self, delta: &str) {
        let pcm = match BASE64.decode(delta.as_bytes()) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable audio delta");
                return;
            }
        };

        let muted = self.lock_playback().is_muted();
        // bind the decision so the turn guard drops before any device call
        let started = self.lock_turn().turn_started(muted);
        if let Some(start) = started {
            if start.stop_capture {
                self.lock_capture().stop();
                self.input_level.store(0, Ordering::Relaxed);
                tracing::debug!("capture stopped for response playback");
            }
            if let Err(e) = self.lock_playback().begin() {
                tracing::error!(error = %e, "playback start failed");
                self.listener.on_error(&e);
            }
            self.listener.on_audio_response_started(start.mic_was_idle);
        }

        if let Err(e) = self.lock_playback().write(&pcm) {
            tracing::warn!(error = %e, "playback write failed");
        }
    }

    fn handle_response_done(&self) {
        // bind the decision so the turn guard drops before the drain
        let completed = self.lock_turn().turn_completed();
        if let Some(end) = completed {
            // drain before any mic restart so the tail of the response is
            // not captured back
            self.lock_playback().end();
            if end.restart_capture {
                tracing::info!("mic was idle before turn, resuming listening");
                if let Err(e) = self.start_capture_worker() {
                    tracing::error!(error = %e, "failed to resume capture");
                    self.lock_turn().stop_requested();
                    self.listener.on_error(&e);
                }
            }
            self.listener.on_audio_response_completed();
        }
        self.request_log("API Response", "response completed", "200");
    }

    fn handle_connection_closed(&self, reason: Option<String>) {
        let cleanup = self.lock_turn().disconnected();
        if cleanup.stop_capture {
            self.lock_capture().stop();
        }
        if cleanup.abort_playback {
            self.lock_playback().abort();
        }
        self.uplink.clear();
        self.input_level.store(0, Ordering::Relaxed);
        tracing::info!(reason = ?reason, "session disconnected");
        self.listener.on_disconnected();
    }

    // -- commit flow ---------------------------------------------------------

    async fn run_commit_flow(&self, forced: bool) {
        match self.uplink.commit(forced) {
            CommitDecision::TooShort { duration_ms } => {
                tracing::debug!(duration_ms, "recording too short, discarding");
            }
            CommitDecision::Empty => {
                tracing::debug!("nothing buffered, skipping commit");
            }
            CommitDecision::Ready {
                tail,
                buffered_bytes,
                duration_ms,
            } => {
                if !tail.is_empty() {
                    match self.connection.send_audio(&tail).await {
                        Ok(()) => self.uplink.record_sent(tail.len()),
                        Err(e) => {
                            // committed audio is whatever the server already
                            // has; the tail is not requeued
                            tracing::warn!(error = %e, "failed to send trailing audio");
                            self.uplink.record_failure();
                        }
                    }
                }
                match self.connection.commit_audio().await {
                    Ok(()) => {
                        self.uplink.mark_committed();
                        tracing::info!(buffered_bytes, duration_ms, "audio buffer committed");
                        self.request_log(
                            "API Request",
                            &format!("committed {duration_ms:.0} ms of audio"),
                            "SENT",
                        );
                        if let Err(e) = self.connection.request_response().await {
                            tracing::warn!(error = %e, "response request failed");
                            self.uplink.record_failure();
                            self.listener.on_error(&e);
                        } else {
                            self.request_log("API Request", "response requested", "SENT");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "commit failed");
                        self.uplink.record_failure();
                        self.listener.on_error(&e);
                    }
                }
            }
        }
    }

    // -- plumbing ------------------------------------------------------------

    fn request_log(&self, kind: &str, detail: &str, status: &str) {
        self.listener.on_request_log(kind, detail, status);
        self.send_transcript(TranscriptEvent::RequestLogged {
            kind: kind.to_string(),
            detail: detail.to_string(),
            status: status.to_string(),
        });
    }

    fn send_transcript(&self, event: TranscriptEvent) {
        if self.transcript_tx.send(event).is_err() {
            tracing::trace!("transcript receiver dropped");
        }
    }

    fn lock_turn(&self) -> MutexGuard<'_, TurnEngine> {
        self.turn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_capture(&self) -> MutexGuard<'_, AudioCapture> {
        self.capture.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_playback(&self) -> MutexGuard<'_, AudioPlayback> {
        self.playback.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether a remote error is a rate-limit condition
fn is_rate_limited(code: Option<&str>, message: &str) -> bool {
    code.is_some_and(|c| c.contains("rate_limit"))
        || message.contains("429")
        || message.contains("Too Many Requests")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_detected_by_code() {
        assert!(is_rate_limited(Some("rate_limit_exceeded"), "slow down"));
    }

    #[test]
    fn rate_limit_detected_by_message() {
        assert!(is_rate_limited(None, "HTTP 429 returned"));
        assert!(is_rate_limited(None, "Too Many Requests"));
    }

    #[test]
    fn ordinary_errors_are_not_rate_limits() {
        assert!(!is_rate_limited(None, "invalid audio format"));
        assert!(!is_rate_limited(Some("server_error"), "internal error"));
    }

    #[test]
    fn request_log_transcript_events_compare() {
        let a = TranscriptEvent::RequestLogged {
            kind: "API Request".to_string(),
            detail: "response requested".to_string(),
            status: "SENT".to_string(),
        };
        assert_eq!(a.clone(), a);
    }
}
