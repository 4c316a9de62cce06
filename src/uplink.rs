//! Rate-limited uplink buffering for outbound audio
//!
//! Captured frames accumulate in a pending buffer. Flushes are gated by
//! `max(minimum interval, current backoff)`; commits are gated by a minimum
//! buffered duration. The caller performs the actual network send and
//! reports the outcome back, which keeps all I/O outside the lock.
//!
//! One consecutive-error counter covers send failures and remote API errors
//! alike: every failure doubles the backoff up to a cap, one success resets
//! it to the floor, and repeated failures force-clear the buffer so it
//! cannot grow without bound during a sustained outage.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::audio;

/// Floor between flushes; also the backoff reset value
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(500);

/// Backoff ceiling
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Minimum committable audio duration in milliseconds
pub const MIN_COMMIT_MS: usize = 100;

/// Consecutive errors at which the buffer is force-cleared
const FORCE_CLEAR_ERRORS: u32 = 4;

/// Outcome of a commit evaluation
#[derive(Debug)]
pub enum CommitDecision {
    /// Below the minimum duration and not forced; buffer cleared
    TooShort {
        /// Duration that was buffered, for the debug log
        duration_ms: f64,
    },
    /// Forced commit with zero buffered bytes; nothing to send
    Empty,
    /// Commit should proceed: append `tail`, then send the commit command
    Ready {
        /// Pending bytes not yet flushed, to append before committing
        tail: Vec<u8>,
        /// Total buffered bytes (pending + sent) at evaluation time
        buffered_bytes: usize,
        /// Total buffered duration at evaluation time
        duration_ms: f64,
    },
}

#[derive(Debug)]
struct UplinkState {
    /// Accumulated, not yet flushed
    pending: Vec<u8>,
    /// Flushed to the service since the last commit or clear
    sent_bytes: usize,
    /// When the last flush happened
    last_flush: Option<Instant>,
    /// Current backoff delay
    backoff: Duration,
    /// Consecutive failures, sends and remote errors alike
    consecutive_errors: u32,
}

/// Accumulates outbound audio and gates flushes by interval and backoff
#[derive(Debug)]
pub struct RateLimitedUplink {
    state: Mutex<UplinkState>,
}

impl Default for RateLimitedUplink {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitedUplink {
    /// Create an empty uplink buffer at the backoff floor
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UplinkState {
                pending: Vec::new(),
                sent_bytes: 0,
                last_flush: None,
                backoff: MIN_FLUSH_INTERVAL,
                consecutive_errors: 0,
            }),
        }
    }

    /// Append captured PCM to the pending buffer
    pub fn submit(&self, pcm: &[u8]) {
        self.lock().pending.extend_from_slice(pcm);
    }

    /// Take the pending bytes for sending if a flush is due
    ///
    /// A flush is due when the buffer is non-empty and at least
    /// `max(MIN_FLUSH_INTERVAL, backoff)` has passed since the last flush.
    /// The flush timestamp is recorded and pending is cleared; report the
    /// send outcome with [`record_sent`](Self::record_sent) or
    /// [`record_failure`](Self::record_failure).
    pub fn try_flush(&self, now: Instant) -> Option<Vec<u8>> {
        let mut state = self.lock();
        if state.pending.is_empty() {
            return None;
        }
        let required = state.backoff.max(MIN_FLUSH_INTERVAL);
        if let Some(last) = state.last_flush {
            if now.duration_since(last) < required {
                return None;
            }
        }
        state.last_flush = Some(now);
        Some(std::mem::take(&mut state.pending))
    }

    /// Evaluate a commit of everything buffered (pending + already sent)
    ///
    /// Below the minimum duration and not forced, the buffer is cleared and
    /// nothing is sent. A forced commit bypasses the minimum but is skipped
    /// entirely at zero bytes. On [`CommitDecision::Ready`], append the tail,
    /// send the commit command, then call
    /// [`mark_committed`](Self::mark_committed).
    pub fn commit(&self, forced: bool) -> CommitDecision {
        let mut state = self.lock();
        let buffered_bytes = state.pending.len() + state.sent_bytes;
        let duration_ms = audio::duration_ms(buffered_bytes);

        if !forced && buffered_bytes < audio::bytes_for_ms(MIN_COMMIT_MS) {
            state.pending.clear();
            state.sent_bytes = 0;
            return CommitDecision::TooShort { duration_ms };
        }
        if buffered_bytes == 0 {
            return CommitDecision::Empty;
        }

        let tail = std::mem::take(&mut state.pending);
        CommitDecision::Ready {
            tail,
            buffered_bytes,
            duration_ms,
        }
    }

    /// Record a successful send of `n` bytes
    ///
    /// Adds to the sent-but-uncommitted count and resets backoff to the
    /// floor.
    pub fn record_sent(&self, n: usize) {
        let mut state = self.lock();
        state.sent_bytes += n;
        if state.consecutive_errors > 0 {
            tracing::debug!(
                errors = state.consecutive_errors,
                "uplink recovered, backoff reset"
            );
        }
        state.consecutive_errors = 0;
        state.backoff = MIN_FLUSH_INTERVAL;
    }

    /// Record a send failure or remote API error
    ///
    /// Doubles the backoff up to the cap; past the threshold the whole
    /// buffer is force-cleared.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_errors += 1;
        state.backoff = (state.backoff * 2).min(MAX_BACKOFF);
        tracing::warn!(
            errors = state.consecutive_errors,
            backoff = ?state.backoff,
            "uplink failure, backoff increased"
        );
        if state.consecutive_errors >= FORCE_CLEAR_ERRORS {
            let dropped = state.pending.len() + state.sent_bytes;
            if dropped > 0 {
                tracing::warn!(
                    dropped_bytes = dropped,
                    "clearing uplink buffer after repeated failures"
                );
            }
            state.pending.clear();
            state.sent_bytes = 0;
        }
    }

    /// Record a successful commit: sent count and backoff reset
    pub fn mark_committed(&self) {
        let mut state = self.lock();
        state.sent_bytes = 0;
        state.consecutive_errors = 0;
        state.backoff = MIN_FLUSH_INTERVAL;
    }

    /// Drop everything buffered
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.pending.len() + state.sent_bytes;
        state.pending.clear();
        state.sent_bytes = 0;
        if dropped > 0 {
            tracing::debug!(dropped_bytes = dropped, "uplink buffer cleared");
        }
    }

    /// Total buffered bytes (pending + sent since last commit)
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.sent_bytes
    }

    /// Total buffered duration in milliseconds
    #[must_use]
    pub fn buffered_ms(&self) -> f64 {
        audio::duration_ms(self.buffered_bytes())
    }

    /// Current backoff delay
    #[must_use]
    pub fn backoff_delay(&self) -> Duration {
        self.lock().backoff
    }

    /// Current consecutive-error count
    #[must_use]
    pub fn consecutive_errors(&self) -> u32 {
        self.lock().consecutive_errors
    }

    fn lock(&self) -> MutexGuard<'_, UplinkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
