//! Audio capture and playback at the fixed realtime wire format
//!
//! Both directions run 24kHz 16-bit mono PCM. Capture assembles 1024-byte
//! frames with RMS metering; playback queues PCM with mute and drain
//! control. Each component owns its device stream on a dedicated worker
//! thread, so handles stay `Send`.

mod capture;
mod format;
mod playback;

pub use capture::AudioCapture;
pub use format::{
    AudioFrame, BITS_PER_SAMPLE, BYTES_PER_MS, CHANNELS, FRAME_BYTES, SAMPLE_RATE, bytes_for_ms,
    duration_ms, f32_to_pcm16, pcm16_to_f32, rms_level,
};
pub use playback::AudioPlayback;
