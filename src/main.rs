use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use voxrelay::audio::{AudioCapture, OutputStream, PlaybackScheduler, PLAYBACK_RATE};
use voxrelay::audio::codec::PlaybackBuffer;
use voxrelay::{Config, VoiceSession};

/// Voxrelay - real-time voice persona relay
#[derive(Parser)]
#[command(name = "voxrelay", version, about)]
struct Cli {
    /// Config file path (defaults to the platform config dir)
    #[arg(short, long, env = "VOXRELAY_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Persona voice identifier (e.g. "Zephyr")
    #[arg(long, env = "VOXRELAY_VOICE")]
    voice: Option<String>,

    /// Input device name (defaults to the host default)
    #[arg(long)]
    input_device: Option<String>,

    /// Output sink name (e.g. a virtual cable; defaults to the host default)
    #[arg(long)]
    output_device: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input and output devices
    ListDevices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test the playback path with a tone
    TestTone,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,voxrelay=info",
        1 => "info,voxrelay=debug",
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
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::ListDevices => list_devices(),
            Command::TestMic { duration } => test_mic(cli.input_device.as_deref(), duration).await,
            Command::TestTone => test_tone(cli.output_device.as_deref()).await,
        };
    }

    let config_path = cli.config.or_else(Config::default_path);
    let mut config = Config::load_from(config_path.as_deref())?;

    // CLI overrides
    if let Some(voice) = cli.voice {
        config.persona.voice = voice;
    }
    if cli.input_device.is_some() {
        config.audio.input_device = cli.input_device;
    }
    if cli.output_device.is_some() {
        config.audio.output_device = cli.output_device;
    }

    tracing::info!(
        voice = %config.persona.voice,
        model = %config.model.id,
        "starting voxrelay"
    );

    let mut session = VoiceSession::new(config);
    session.start().await?;
    tracing::info!("relay live - press Ctrl-C to stop");

    tokio::select! {
        result = session.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
    }

    session.stop();
    Ok(())
}

/// List audio devices by name
fn list_devices() -> anyhow::Result<()> {
    let host = cpal::default_host();

    println!("Input devices:");
    for device in host.input_devices()? {
        println!("  {}", device.name().unwrap_or_else(|_| "unknown".to_string()));
    }

    println!("\nOutput devices:");
    for device in host.output_devices()? {
        println!("  {}", device.name().unwrap_or_else(|_| "unknown".to_string()));
    }

    Ok(())
}

/// Test microphone input with an RMS meter
#[allow(clippy::future_not_send)]
async fn test_mic(device: Option<&str>, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<f32>>(64);
    let capture = AudioCapture::open(device, 512, frame_tx)?;
    println!("Capturing from: {}", capture.device_name());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let mut samples = Vec::new();
        while let Ok(frame) = frame_rx.try_recv() {
            samples.extend(frame);
        }

        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working.");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test the scheduler and output path with a 440Hz tone
#[allow(clippy::future_not_send)]
async fn test_tone(sink: Option<&str>) -> anyhow::Result<()> {
    println!("Testing playback output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
    let output = OutputStream::open(sink, finished_tx)?;
    println!("Output bound to: {}", output.device_name());

    let mut scheduler = PlaybackScheduler::new(0.010);

    // Feed the tone through the real scheduling path in 100ms buffers
    let chunk_samples = (PLAYBACK_RATE / 10) as usize;
    for chunk_index in 0..20u32 {
        #[allow(clippy::cast_precision_loss)]
        let samples: Vec<f32> = (0..chunk_samples)
            .map(|i| {
                let n = chunk_index as usize * chunk_samples + i;
                let t = n as f32 / PLAYBACK_RATE as f32;
                (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3
            })
            .collect();

        let buffer = PlaybackBuffer {
            samples,
            duration: 0.1,
        };
        let source = scheduler.schedule(&buffer, output.now());
        output.start_at(&source, buffer);
    }

    // Wait for every scheduled buffer to finish
    let mut remaining = 20;
    while remaining > 0 {
        match tokio::time::timeout(Duration::from_secs(5), finished_rx.recv()).await {
            Ok(Some(id)) => {
                scheduler.complete(id);
                remaining -= 1;
            }
            _ => break,
        }
    }

    output.close();

    println!("\n---");
    println!("If you heard the tone, your output sink is working.");

    Ok(())
}
