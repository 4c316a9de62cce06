//! Microphone capture with frame assembly and level metering
//!
//! The device callback stays minimal: it hands raw samples to a bounded
//! channel and never blocks. A dedicated worker thread owns the cpal stream,
//! assembles fixed-size PCM16 frames, computes the RMS level, and invokes
//! the frame handler. The worker re-checks the stop flag at least every
//! 100ms, so `stop()` completes promptly even with a silent device.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::format::{self, AudioFrame, FRAME_BYTES, SAMPLE_RATE};
use crate::{Error, Result};

/// Handler invoked for each assembled frame with its RMS level (0-100)
type FrameHandler = Box<dyn Fn(AudioFrame, f32) + Send>;

/// How long the assembler waits for samples before re-checking the stop flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `start()` waits for the worker to open the device stream
const START_TIMEOUT: Duration = Duration::from_secs(3);

/// Captures microphone audio as fixed-size PCM16 frames
pub struct AudioCapture {
    config: StreamConfig,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AudioCapture {
    /// Create a new capture instance, probing the default input device
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if no input device supports the fixed format.
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Device("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Device("no suitable input config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        })
    }

    /// Start the capture worker
    ///
    /// The handler runs on the worker thread and must not block for long;
    /// hand heavy work to a channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Device` if the device stream cannot be opened.
    pub fn start<F>(&mut self, on_frame: F) -> Result<()>
    where
        F: Fn(AudioFrame, f32) + Send + 'static,
    {
        if self.worker.is_some() {
            tracing::warn!("capture already running");
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        let running = Arc::clone(&self.running);
        let config = self.config.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        let handle = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || capture_loop(&config, &running, &ready_tx, Box::new(on_frame)))
            .map_err(|e| Error::Device(format!("failed to spawn capture worker: {e}")))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(())) => {
                self.worker = Some(handle);
                tracing::debug!("audio capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::Release);
                let _ = handle.join();
                Err(Error::Device(
                    "timed out waiting for capture stream".to_string(),
                ))
            }
        }
    }

    /// Stop the capture worker and wait for its exit
    ///
    /// A partial trailing frame is flushed through the handler before the
    /// worker exits. No-op when not capturing.
    pub fn stop(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        self.running.store(false, Ordering::Release);
        let _ = handle.join();
        tracing::debug!("audio capture stopped");
    }

    /// Whether the capture worker is running
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: owns the device stream, assembles frames from the callback
/// channel, and flushes the partial tail on exit.
fn capture_loop(
    config: &StreamConfig,
    running: &Arc<AtomicBool>,
    ready: &SyncSender<Result<()>>,
    on_frame: FrameHandler,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_input_device() else {
        let _ = ready.send(Err(Error::Device("no input device".to_string())));
        return;
    };

    let (sample_tx, sample_rx) = std::sync::mpsc::sync_channel::<Vec<f32>>(64);

    let stream = match device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // never block the device callback
            if let Err(TrySendError::Full(_)) = sample_tx.try_send(data.to_vec()) {
                tracing::trace!("frame assembler behind, dropping samples");
            }
        },
        |err| {
            tracing::error!(error = %err, "audio capture stream error");
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

    let mut pending: Vec<u8> = Vec::with_capacity(FRAME_BYTES * 2);
    while running.load(Ordering::Acquire) {
        match sample_rx.recv_timeout(POLL_INTERVAL) {
            Ok(samples) => {
                pending.extend_from_slice(&format::f32_to_pcm16(&samples));
                while pending.len() >= FRAME_BYTES {
                    let frame: Vec<u8> = pending.drain(..FRAME_BYTES).collect();
                    let level = format::rms_level(&frame);
                    on_frame(AudioFrame::new(frame), level);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // flush the partial tail so trailing audio is not lost on stop
    if !pending.is_empty() {
        let level = format::rms_level(&pending);
        on_frame(AudioFrame::new(pending), level);
    }

    drop(stream);
    tracing::debug!("capture loop exited");
}
