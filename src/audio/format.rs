//! Fixed wire audio format and PCM conversion helpers
//!
//! The realtime service speaks 24kHz 16-bit signed little-endian mono PCM
//! in both directions. Devices run f32 streams; conversion happens at the
//! component boundary.

/// Sample rate for both capture and playback
pub const SAMPLE_RATE: u32 = 24_000;

/// Channel count (mono)
pub const CHANNELS: u16 = 1;

/// Bits per PCM sample
pub const BITS_PER_SAMPLE: u16 = 16;

/// Capture frame granularity in bytes
pub const FRAME_BYTES: usize = 1024;

/// PCM bytes per millisecond at the fixed format (24000 * 1 * 16 / 8 / 1000)
pub const BYTES_PER_MS: usize = 48;

/// A captured audio frame at the fixed wire format
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pcm: Vec<u8>,
}

impl AudioFrame {
    /// Wrap raw PCM16 bytes
    #[must_use]
    pub const fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    /// The PCM payload
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.pcm
    }

    /// Payload length in bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.pcm.len()
    }

    /// Whether the frame is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Duration of this frame in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_ms(self.pcm.len())
    }

    /// Consume the frame, returning the PCM payload
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.pcm
    }
}

/// Duration in milliseconds of a PCM byte run at the fixed format
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn duration_ms(byte_len: usize) -> f64 {
    (byte_len * 8 * 1000) as f64
        / f64::from(SAMPLE_RATE * u32::from(CHANNELS) * u32::from(BITS_PER_SAMPLE))
}

/// PCM byte count for a whole-millisecond duration (exact at this format)
#[must_use]
pub const fn bytes_for_ms(ms: usize) -> usize {
    ms * BYTES_PER_MS
}

/// RMS level of a PCM16 byte run, scaled 0-100
///
/// The divisor is tuned so ordinary speech reads near mid-scale.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn rms_level(pcm: &[u8]) -> f32 {
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for chunk in pcm.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([chunk[0], chunk[1]]));
        sum += sample * sample;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    let rms = (sum / count as f64).sqrt();
    (rms / 8192.0 * 100.0).clamp(0.0, 100.0) as f32
}

/// Convert PCM16 little-endian bytes to f32 samples in [-1.0, 1.0]
#[must_use]
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|chunk| f32::from(i16::from_le_bytes([chunk[0], chunk[1]])) / 32768.0)
        .collect()
}

/// Convert f32 samples to PCM16 little-endian bytes
#[must_use]
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
