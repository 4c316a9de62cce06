//! Shared test utilities

use parlance::audio;

/// PCM16 silence covering `ms` milliseconds at the fixed wire format
pub fn silence_ms(ms: usize) -> Vec<u8> {
    vec![0_u8; audio::bytes_for_ms(ms)]
}

/// PCM16 sine tone covering `ms` milliseconds at the fixed wire format
pub fn tone_ms(frequency: f32, amplitude: f32, ms: usize) -> Vec<u8> {
    let sample_count = audio::bytes_for_ms(ms) / 2;
    let samples: Vec<f32> = (0..sample_count)
        .map(|i| {
            let t = i as f32 / audio::SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect();
    audio::f32_to_pcm16(&samples)
}
