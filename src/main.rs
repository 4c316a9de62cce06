use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use parlance::{Error, SessionConfig, SessionListener, TranscriptEvent, VoiceSession};

/// Parlance - Realtime voice conversations with an AI assistant
#[derive(Parser)]
#[command(name = "parlance", version, about)]
struct Cli {
    /// API key for the realtime service
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Realtime model to connect to
    #[arg(short, long)]
    model: Option<String>,

    /// Voice used for audio responses
    #[arg(long)]
    voice: Option<String>,

    /// System instructions for the assistant
    #[arg(long)]
    instructions: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Write the captured audio to a WAV file
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parlance=info",
        1 => "info,parlance=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, wav } => test_mic(duration, wav).await,
            Command::TestSpeaker => test_speaker(),
        };
    }

    let api_key = cli
        .api_key
        .ok_or_else(|| anyhow::anyhow!("no API key: pass --api-key or set OPENAI_API_KEY"))?;

    let mut config = SessionConfig::new(api_key);
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(voice) = cli.voice {
        config = config.with_voice(voice);
    }
    if let Some(instructions) = cli.instructions {
        config = config.with_instructions(instructions);
    }

    tracing::info!(model = %config.model, voice = %config.voice, "starting parlance");

    converse(config).await
}

/// Prints conversation output to the terminal
struct ConsoleListener;

impl SessionListener for ConsoleListener {
    fn on_connected(&self) {
        println!("connected - press Enter to talk, /quit to exit");
    }

    fn on_disconnected(&self) {
        println!("disconnected");
    }

    fn on_voice_session_started(&self) {
        println!("listening... (press Enter to stop)");
    }

    fn on_audio_response_started(&self, _mic_was_idle: bool) {
        println!("assistant speaking...");
    }

    fn on_user_transcript(&self, text: &str) {
        println!("you: {text}");
    }

    fn on_agent_transcript(&self, text: &str) {
        println!("assistant: {text}");
    }

    fn on_response(&self, text: &str) {
        // raw service events start with a brace; keep those out of the console
        if text.starts_with('{') {
            tracing::debug!(raw = %text, "unhandled service message");
        } else {
            println!("assistant: {text}");
        }
    }

    fn on_error(&self, error: &Error) {
        eprintln!("error: {error}");
    }
}

/// Interactive voice console
#[allow(clippy::future_not_send)]
async fn converse(config: SessionConfig) -> anyhow::Result<()> {
    println!("Connecting to {}...", config.endpoint);

    let (session, mut transcripts) =
        VoiceSession::connect(config, Arc::new(ConsoleListener)).await?;

    // The console listener already prints; drain the feed so it never backs up
    tokio::spawn(async move {
        while let Some(event) = transcripts.recv().await {
            if let TranscriptEvent::RequestLogged {
                kind,
                detail,
                status,
            } = event
            {
                tracing::debug!(%kind, %detail, %status, "request log");
            }
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "" => {
                        if session.is_recording() {
                            session.stop_voice_session().await;
                        } else if let Err(e) = session.start_voice_session() {
                            eprintln!("could not start recording: {e}");
                        }
                    }
                    "/quit" | "/q" => break,
                    "/mute" => {
                        let muted = !session.is_speaker_muted();
                        session.set_speaker_muted(muted);
                        println!("speaker {}", if muted { "muted" } else { "unmuted" });
                    }
                    text => {
                        if let Err(e) = session.send_text(text).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    session.shutdown().await;

    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, wav: Option<PathBuf>) -> anyhow::Result<()> {
    use parlance::audio::{self, AudioCapture};

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let level = Arc::new(AtomicU32::new(0));
    let captured: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));

    let mut capture = AudioCapture::new()?;
    let meter_level = Arc::clone(&level);
    let sink = Arc::clone(&captured);
    capture.start(move |frame, rms| {
        meter_level.store(rms.to_bits(), Ordering::Relaxed);
        sink.lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(frame.bytes());
    })?;

    println!("Sample rate: {} Hz", audio::SAMPLE_RATE);
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let rms = f32::from_bits(level.load(Ordering::Relaxed));

        // Visual meter; RMS is scaled 0-100
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (rms / 2.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] level: {:5.1} | [{}]", i + 1, rms, meter);
    }

    capture.stop();

    let pcm = captured.lock().unwrap_or_else(|e| e.into_inner()).clone();
    println!(
        "\nCaptured {} bytes ({:.0} ms)",
        pcm.len(),
        audio::duration_ms(pcm.len())
    );

    if let Some(path) = wav {
        let spec = hound::WavSpec {
            channels: audio::CHANNELS,
            sample_rate: audio::SAMPLE_RATE,
            bits_per_sample: audio::BITS_PER_SAMPLE,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for sample in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([sample[0], sample[1]]))?;
        }
        writer.finalize()?;
        println!("Wrote {}", path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
fn test_speaker() -> anyhow::Result<()> {
    use parlance::audio::{self, AudioPlayback};

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;
    playback.begin()?;

    // Generate 2 seconds of 440Hz sine wave at the fixed 24kHz rate
    let frequency = 440.0_f32;
    let num_samples = audio::SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / audio::SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();
    let pcm = audio::f32_to_pcm16(&samples);

    println!("Playing {} bytes...", pcm.len());

    playback.write(&pcm)?;
    playback.end();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
