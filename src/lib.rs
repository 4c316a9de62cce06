//! Parlance - Realtime voice conversation engine for AI assistants
//!
//! This library provides full-duplex voice conversations against a realtime
//! voice-model service:
//! - Microphone capture with RMS level metering
//! - A rate-limited uplink with backoff and commit semantics
//! - A duplex WebSocket connection with typed event dispatch
//! - Speaker playback with mute and drain semantics
//! - The turn state machine that makes interruptions feel natural
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    VoiceSession                      │
//! │   turn state  │  listener seam  │  transcript feed  │
//! └──────┬─────────────────┬─────────────────┬──────────┘
//!        │                 │                 │
//! ┌──────▼───────┐  ┌──────▼─────────┐  ┌────▼──────────┐
//! │ AudioCapture │─▶│ RateLimited    │  │ AudioPlayback │
//! │    (mic)     │  │ Uplink         │  │   (speaker)   │
//! └──────────────┘  └──────┬─────────┘  └────▲──────────┘
//!                          │                 │
//!                   ┌──────▼─────────────────┴──────────┐
//!                   │        RealtimeConnection          │
//!                   │   JSON commands ⇄ typed events     │
//!                   └────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;
pub mod uplink;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use realtime::{ConnectionEvent, ConnectionState, RealtimeConnection};
pub use session::{SessionListener, TranscriptEvent, VoiceSession};
pub use uplink::RateLimitedUplink;
