//! Turn state machine for the voice session
//!
//! Pure decision logic: the session feeds lifecycle inputs under its lock
//! and performs the device and network I/O each returned decision calls
//! for. Turn bookkeeping is one phase value plus a per-turn context
//! snapshot, so callbacks arriving from different loops cannot leave the
//! flags half-updated.

/// Where the session is in the conversation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Nothing in flight
    Idle,
    /// Mic is streaming to the uplink
    Recording,
    /// An AI turn's audio is active
    AiResponding,
}

/// Snapshot taken at AI-turn start, consumed by the restore and unmute rules
#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnContext {
    /// Mic was idle before the turn's first audio delta
    pub mic_was_idle: bool,
    /// Speaker was already muted before the turn (deliberate mute)
    pub speaker_was_muted: bool,
    /// User started talking mid-turn; set at most once per turn
    pub interrupted: bool,
}

/// Decision for a voice-session start request
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StartDecision {
    /// Begin or resume plain recording
    Fresh,
    /// User is interrupting the active AI turn
    Interruption {
        /// Playback was audible and must be muted now
        mute_playback: bool,
    },
    /// The active turn was already interrupted; start capture quietly
    AlreadyInterrupted,
}

/// Decision for the first audio delta of a new turn
#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnStart {
    /// Mic was idle before this turn (reported to listeners, drives restore)
    pub mic_was_idle: bool,
    /// Capture is running and must be stopped to avoid feedback
    pub stop_capture: bool,
}

/// Decision for turn completion
#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnEnd {
    /// Restore rule: restart capture because the mic was idle pre-turn
    pub restart_capture: bool,
}

/// Cleanup decision after connection loss
#[derive(Debug, Clone, Copy)]
pub(crate) struct Disconnect {
    pub stop_capture: bool,
    pub abort_playback: bool,
}

/// Mutable turn state; lives under the session's turn lock
#[derive(Debug)]
pub(crate) struct TurnEngine {
    phase: Phase,
    /// Mic intent; device worker state follows it
    capturing: bool,
    /// Context of the current turn; survives completion so the post-speech
    /// unmute rule can still fire, replaced at the next turn start
    turn: Option<TurnContext>,
    /// Accumulated streamed text of the current response
    streamed: String,
}

impl TurnEngine {
    pub(crate) fn new() -> Self {
        Self {
            phase: Phase::Idle,
            capturing: false,
            turn: None,
            streamed: String::new(),
        }
    }

    /// User asked to start a voice session
    pub(crate) fn start_requested(&mut self, playback_muted: bool) -> StartDecision {
        if self.phase == Phase::AiResponding {
            self.capturing = true;
            if let Some(ctx) = self.turn.as_mut() {
                if ctx.interrupted {
                    return StartDecision::AlreadyInterrupted;
                }
                ctx.interrupted = true;
            }
            return StartDecision::Interruption {
                mute_playback: !playback_muted,
            };
        }
        self.capturing = true;
        self.phase = Phase::Recording;
        StartDecision::Fresh
    }

    /// User asked to stop the voice session; the caller runs the commit flow
    pub(crate) fn stop_requested(&mut self) {
        self.capturing = false;
        if self.phase == Phase::Recording {
            self.phase = Phase::Idle;
        }
    }

    /// First audio delta of a response; `None` for deltas of the active turn
    pub(crate) fn turn_started(&mut self, playback_muted: bool) -> Option<TurnStart> {
        if self.phase == Phase::AiResponding {
            return None;
        }
        let mic_was_idle = !self.capturing;
        // an unconsumed interruption carries into the replacing turn so the
        // deferred unmute still happens
        let (interrupted, speaker_was_muted) = match self.turn {
            Some(prev) if prev.interrupted => (true, prev.speaker_was_muted),
            _ => (false, playback_muted),
        };
        self.turn = Some(TurnContext {
            mic_was_idle,
            speaker_was_muted,
            interrupted,
        });
        self.streamed.clear();
        let stop_capture = self.capturing;
        self.capturing = false;
        self.phase = Phase::AiResponding;
        Some(TurnStart {
            mic_was_idle,
            stop_capture,
        })
    }

    /// A new response was created; true when it preempts an active turn
    pub(crate) fn response_preempting(&self) -> bool {
        self.phase == Phase::AiResponding
    }

    /// Response finished; `None` when no audio turn was active
    pub(crate) fn turn_completed(&mut self) -> Option<TurnEnd> {
        self.streamed.clear();
        if self.phase != Phase::AiResponding {
            return None;
        }
        let mic_was_idle = self.turn.is_some_and(|ctx| ctx.mic_was_idle);
        let restart_capture = mic_was_idle && !self.capturing;
        if restart_capture {
            self.capturing = true;
        }
        self.phase = if self.capturing {
            Phase::Recording
        } else {
            Phase::Idle
        };
        Some(TurnEnd { restart_capture })
    }

    /// Server committed the user's speech; true when the speaker should be
    /// unmuted (interruption mute, not a deliberate one)
    pub(crate) fn speech_ended(&mut self, playback_muted: bool) -> bool {
        let Some(ctx) = self.turn.as_mut() else {
            return false;
        };
        let unmute = ctx.interrupted && playback_muted && !ctx.speaker_was_muted;
        ctx.interrupted = false;
        unmute
    }

    /// Connection lost; full reset
    pub(crate) fn disconnected(&mut self) -> Disconnect {
        let cleanup = Disconnect {
            stop_capture: self.capturing,
            abort_playback: self.phase == Phase::AiResponding,
        };
        self.phase = Phase::Idle;
        self.capturing = false;
        self.turn = None;
        self.streamed.clear();
        cleanup
    }

    pub(crate) fn append_delta(&mut self, delta: &str) {
        self.streamed.push_str(delta);
    }

    pub(crate) fn streamed(&self) -> &str {
        &self.streamed
    }

    pub(crate) fn is_capturing(&self) -> bool {
        self.capturing
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_start_enters_recording() {
        let mut engine = TurnEngine::new();
        assert_eq!(engine.start_requested(false), StartDecision::Fresh);
        assert_eq!(engine.phase(), Phase::Recording);
        assert!(engine.is_capturing());
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let mut engine = TurnEngine::new();
        engine.start_requested(false);
        engine.stop_requested();
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(!engine.is_capturing());
    }

    #[test]
    fn test_turn_start_snapshots_active_mic() {
        let mut engine = TurnEngine::new();
        engine.start_requested(false);
        let start = engine.turn_started(false).unwrap();
        assert!(!start.mic_was_idle);
        assert!(start.stop_capture);
        assert_eq!(engine.phase(), Phase::AiResponding);
        assert!(!engine.is_capturing());
    }

    #[test]
    fn test_turn_start_from_idle() {
        let mut engine = TurnEngine::new();
        let start = engine.turn_started(false).unwrap();
        assert!(start.mic_was_idle);
        assert!(!start.stop_capture);
    }

    #[test]
    fn test_subsequent_deltas_do_not_restart_turn() {
        let mut engine = TurnEngine::new();
        assert!(engine.turn_started(false).is_some());
        assert!(engine.turn_started(false).is_none());
    }

    #[test]
    fn test_interruption_mutes_exactly_once() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);

        let first = engine.start_requested(false);
        assert_eq!(
            first,
            StartDecision::Interruption {
                mute_playback: true
            }
        );
        assert!(engine.is_capturing());

        let second = engine.start_requested(true);
        assert_eq!(second, StartDecision::AlreadyInterrupted);
    }

    #[test]
    fn test_interruption_with_muted_speaker_skips_mute() {
        let mut engine = TurnEngine::new();
        engine.turn_started(true);
        assert_eq!(
            engine.start_requested(true),
            StartDecision::Interruption {
                mute_playback: false
            }
        );
    }

    #[test]
    fn test_completion_restarts_idle_mic() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        let end = engine.turn_completed().unwrap();
        assert!(end.restart_capture);
        assert_eq!(engine.phase(), Phase::Recording);
        assert!(engine.is_capturing());
    }

    #[test]
    fn test_completion_leaves_pre_active_mic_stopped() {
        let mut engine = TurnEngine::new();
        engine.start_requested(false);
        engine.turn_started(false);
        let end = engine.turn_completed().unwrap();
        assert!(!end.restart_capture);
        assert_eq!(engine.phase(), Phase::Idle);
    }

    #[test]
    fn test_completion_with_interruption_keeps_capture_running() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.start_requested(false);
        let end = engine.turn_completed().unwrap();
        assert!(!end.restart_capture);
        assert_eq!(engine.phase(), Phase::Recording);
        assert!(engine.is_capturing());
    }

    #[test]
    fn test_completion_without_turn_is_none() {
        let mut engine = TurnEngine::new();
        engine.append_delta("text only");
        assert!(engine.turn_completed().is_none());
        assert!(engine.streamed().is_empty());
    }

    #[test]
    fn test_speech_end_unmutes_after_interruption() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.start_requested(false);
        // playback was muted by the interruption
        assert!(engine.speech_ended(true));
        // flag consumed; a second committed event does nothing
        assert!(!engine.speech_ended(true));
    }

    #[test]
    fn test_speech_end_respects_deliberate_mute() {
        let mut engine = TurnEngine::new();
        engine.turn_started(true);
        engine.start_requested(true);
        assert!(!engine.speech_ended(true));
    }

    #[test]
    fn test_unmute_still_fires_after_turn_completed() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.start_requested(false);
        engine.turn_completed();
        assert!(engine.speech_ended(true));
    }

    #[test]
    fn test_pending_unmute_survives_preemption() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.start_requested(false);
        // replacing turn begins while the interruption mute is still on
        engine.turn_completed();
        let start = engine.turn_started(true).unwrap();
        assert!(!start.mic_was_idle);
        assert!(engine.speech_ended(true));
    }

    #[test]
    fn test_preemption_is_flagged_only_during_turn() {
        let mut engine = TurnEngine::new();
        assert!(!engine.response_preempting());
        engine.turn_started(false);
        assert!(engine.response_preempting());
        engine.turn_completed();
        assert!(!engine.response_preempting());
    }

    #[test]
    fn test_disconnect_resets_everything() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.start_requested(false);
        engine.append_delta("partial");

        let cleanup = engine.disconnected();
        assert!(cleanup.stop_capture);
        assert!(cleanup.abort_playback);
        assert_eq!(engine.phase(), Phase::Idle);
        assert!(!engine.is_capturing());
        assert!(engine.streamed().is_empty());
        assert!(!engine.speech_ended(true));
    }

    #[test]
    fn test_streamed_text_accumulates() {
        let mut engine = TurnEngine::new();
        engine.turn_started(false);
        engine.append_delta("Hello, ");
        engine.append_delta("world");
        assert_eq!(engine.streamed(), "Hello, world");
    }
}
