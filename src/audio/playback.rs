//! Speaker playback with mute control and drain semantics
//!
//! Inbound PCM is queued; a worker thread owns the cpal output stream and
//! the device callback pulls samples from the shared queue (silence when it
//! runs dry). `end()` drains what is queued before stopping, `abort()`
//! discards it and stops immediately. The mute flag is checked per write:
//! muted bytes are dropped silently but counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::format::{self, SAMPLE_RATE};
use crate::{Error, Result};

/// How often the worker checks for a stop request
const PARK_INTERVAL: Duration = Duration::from_millis(50);

/// Polling step while draining
const DRAIN_POLL: Duration = Duration::from_millis(25);

/// Extra wait after the queue empties so the device plays out its buffer
const DRAIN_MARGIN: Duration = Duration::from_millis(100);

/// Hard cap added to the queued duration when draining
const DRAIN_TIMEOUT_MARGIN: Duration = Duration::from_millis(500);

/// How long `begin()` waits for the worker to open the device stream
const START_TIMEOUT: Duration = Duration::from_secs(3);

/// State shared between the handle, the worker, and the device callback
struct PlaybackShared {
    /// Samples waiting to be played
    queue: Mutex<VecDeque<f32>>,
    /// Drop writes without queueing when set
    muted: AtomicBool,
    /// Bytes dropped while muted
    muted_bytes: AtomicU64,
    /// Worker exit request
    stop: AtomicBool,
}

/// Plays PCM16 audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    channels: usize,
    shared: Arc<PlaybackShared>,
    worker: Option<JoinHandle<()>>,
}

impl AudioPlayback {
    /// Create a new playback instance, probing the default output device
    ///
    /// Prefers a mono configuration; falls back to stereo with sample
    /// duplication.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no output device supports the fixed rate.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .or_else(|| {
                // fallback: stereo, duplicating the mono stream
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            channels: usize::from(config.channels),
            config,
            shared: Arc::new(PlaybackShared {
                queue: Mutex::new(VecDeque::new()),
                muted: AtomicBool::new(false),
                muted_bytes: AtomicU64::new(0),
                stop: AtomicBool::new(false),
            }),
            worker: None,
        })
    }

    /// Start the output stream
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device stream cannot be opened.
    pub fn begin(&mut self) -> Result<()> {
        if self.worker.is_some() {
            tracing::warn!("playback already active");
            return Ok(());
        }

        self.shared.stop.store(false, Ordering::Release);
        self.lock_queue().clear();

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let channels = self.channels;
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let handle = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || playback_loop(&config, channels, &shared, &ready_tx))
            .map_err(|e| Error::Device(format!("failed to spawn playback worker: {e}")))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                tracing::debug!("audio playback started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared.stop.store(true, Ordering::Release);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.shared.stop.store(true, Ordering::Release);
                let _ = handle.join();
                Err(Error::Device(
                    "timed out waiting for playback stream".to_string(),
                ))
            }
        }
    }

    /// Queue PCM16 bytes for playback
    ///
    /// Muted writes are dropped silently but counted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if playback is not active.
    pub fn write(&mut self, pcm: &[u8]) -> Result<()> {
        if self.worker.is_none() {
            return Err(Error::Device("playback not active".to_string()));
        }

        if self.shared.muted.load(Ordering::Acquire) {
            self.shared
                .muted_bytes
                .fetch_add(pcm.len() as u64, Ordering::Relaxed);
            tracing::trace!(bytes = pcm.len(), "dropping muted playback write");
            return Ok(());
        }

        self.lock_queue().extend(format::pcm16_to_f32(pcm));
        Ok(())
    }

    /// Drain queued audio, then stop the output stream
    ///
    /// Blocks until the queue empties or the queued duration plus a fixed
    /// margin elapses. No-op when not active.
    pub fn end(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };

        let queued = self.lock_queue().len();
        let deadline = Instant::now() + queued_duration(queued) + DRAIN_TIMEOUT_MARGIN;
        while !self.lock_queue().is_empty() {
            if Instant::now() >= deadline {
                tracing::warn!("playback drain timed out");
                break;
            }
            std::thread::sleep(DRAIN_POLL);
        }
        std::thread::sleep(DRAIN_MARGIN);

        self.shared.stop.store(true, Ordering::Release);
        let _ = handle.join();
        self.lock_queue().clear();
        tracing::debug!("audio playback ended");
    }

    /// Discard queued audio and stop immediately
    ///
    /// No-op when not active.
    pub fn abort(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.lock_queue().clear();
        self.shared.stop.store(true, Ordering::Release);
        let _ = handle.join();
        tracing::debug!("audio playback aborted");
    }

    /// Set the mute flag; takes effect on the next write
    pub fn set_muted(&mut self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Release);
        tracing::info!(muted, "audio output mute changed");
    }

    /// Whether the mute flag is set
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Acquire)
    }

    /// Bytes dropped by muted writes since construction
    #[must_use]
    pub fn muted_bytes(&self) -> u64 {
        self.shared.muted_bytes.load(Ordering::Relaxed)
    }

    /// Whether the output stream is active
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.worker.is_some()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Duration represented by a queued sample count
fn queued_duration(samples: usize) -> Duration {
    Duration::from_millis((samples as u64 * 1000) / u64::from(SAMPLE_RATE))
}

/// Worker body: owns the output stream and parks until stopped
fn playback_loop(
    config: &StreamConfig,
    channels: usize,
    shared: &Arc<PlaybackShared>,
    ready: &SyncSender<Result<()>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(Error::Device("no output device".to_string())));
        return;
    };

    let queue_shared = Arc::clone(shared);
    let stream = match device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut queue = queue_shared.queue.lock().unwrap_or_else(|e| e.into_inner());
            for frame in data.chunks_mut(channels) {
                let sample = queue.pop_front().unwrap_or(0.0);
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
        },
        |err| {
            tracing::error!(error = %err, "audio playback stream error");
        },
        None,
    ) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(Error::Device(e.to_string())));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(Error::Device(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    while !shared.stop.load(Ordering::Acquire) {
        std::thread::sleep(PARK_INTERVAL);
    }

    drop(stream);
    tracing::debug!("playback loop exited");
}
