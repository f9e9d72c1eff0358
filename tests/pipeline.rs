//! Relay pipeline integration tests
//!
//! Exercises the codec, scheduler, and session lifecycle without
//! requiring audio hardware or network access.

use voxrelay::audio::codec::{decode_chunk, encode_frame, CAPTURE_RATE};
use voxrelay::audio::{PlaybackBuffer, PlaybackScheduler};
use voxrelay::config::PersonaConfig;
use voxrelay::{Config, ConnectionState, Error, VoiceSession};

/// Generate sine wave audio samples
fn generate_sine_samples(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (CAPTURE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / CAPTURE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

fn buffer_of(duration: f64) -> PlaybackBuffer {
    let n = (duration * 24_000.0) as usize;
    PlaybackBuffer {
        samples: vec![0.1; n],
        duration,
    }
}

#[test]
fn test_codec_roundtrip_is_transparent() {
    let frame = generate_sine_samples(440.0, 0.032, 0.5);
    let encoded = encode_frame(&frame);

    assert_eq!(encoded.data.len(), frame.len() * 2);
    assert_eq!(encoded.mime_type, "audio/pcm;rate=16000");

    let decoded = decode_chunk(&encoded.data).unwrap();
    for (original, recovered) in frame.iter().zip(&decoded.samples) {
        assert!((original - recovered).abs() <= 1.0 / 32768.0);
    }
}

#[test]
fn test_scheduler_accumulates_buffer_durations() {
    let mut scheduler = PlaybackScheduler::new(0.010);
    let durations = [0.04, 0.08, 0.02, 0.06, 0.10];

    let first = scheduler.schedule(&buffer_of(durations[0]), 0.0);
    for d in &durations[1..] {
        scheduler.schedule(&buffer_of(*d), 0.0);
    }

    let total: f64 = durations.iter().sum();
    assert!((scheduler.cursor() - (first.start + total)).abs() < 1e-9);
}

#[test]
fn test_scheduled_sources_are_disjoint() {
    let mut scheduler = PlaybackScheduler::new(0.010);
    let mut sources: Vec<_> = [0.03, 0.05, 0.02, 0.04]
        .iter()
        .map(|d| scheduler.schedule(&buffer_of(*d), 0.0))
        .collect();

    sources.sort_by(|a, b| a.start.total_cmp(&b.start));
    for pair in sources.windows(2) {
        assert!(pair[0].start + pair[0].duration <= pair[1].start + 1e-9);
    }
}

#[test]
fn test_interruption_discards_all_pending_audio() {
    let mut scheduler = PlaybackScheduler::new(0.010);
    for _ in 0..10 {
        scheduler.schedule(&buffer_of(0.05), 0.0);
    }

    let stopped = scheduler.interrupt(0.37);
    assert_eq!(stopped.len(), 10);
    assert!(scheduler.is_idle());
    assert!((scheduler.cursor() - 0.37).abs() < 1e-9);
}

#[test]
fn test_buffer_after_gap_starts_at_arrival_plus_lookahead() {
    let mut scheduler = PlaybackScheduler::new(0.015);

    // One buffer scheduled at the start of the session, ends at 0.05
    scheduler.schedule(&buffer_of(0.05), 0.0);

    // The next arrival comes long after that buffer played out
    let late = scheduler.schedule(&buffer_of(0.05), 2.0);
    assert!((late.start - 2.015).abs() < 1e-9);
}

#[test]
fn test_malformed_payload_does_not_disturb_scheduling() {
    let mut scheduler = PlaybackScheduler::new(0.010);

    let good = encode_frame(&generate_sine_samples(200.0, 0.02, 0.3));
    let buffer = decode_chunk(&good.data).unwrap();
    scheduler.schedule(&buffer, 0.0);
    let cursor_before = scheduler.cursor();

    // Odd-length payload: rejected, nothing scheduled
    let mut corrupt = good.data.clone();
    corrupt.pop();
    assert!(matches!(decode_chunk(&corrupt), Err(Error::Format(_))));
    assert!((scheduler.cursor() - cursor_before).abs() < f64::EPSILON);

    // The next well-formed payload schedules normally
    let buffer = decode_chunk(&good.data).unwrap();
    let source = scheduler.schedule(&buffer, 0.0);
    assert!((source.start - cursor_before).abs() < 1e-9);
}

#[tokio::test]
async fn test_start_without_credential_is_config_error() {
    let config = Config {
        persona: PersonaConfig {
            voice: "Zephyr".to_string(),
            instruction: "Repeat the user.".to_string(),
        },
        ..Config::default()
    };

    let mut session = VoiceSession::new(config);
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_stop_is_idempotent_across_failed_restarts() {
    let config = Config {
        persona: PersonaConfig {
            voice: "Zephyr".to_string(),
            instruction: String::new(),
        },
        ..Config::default()
    };
    let mut session = VoiceSession::new(config);

    // stop before any start
    session.stop();
    session.stop();
    assert_eq!(session.status().state(), ConnectionState::Disconnected);

    // failed start (no credential), then double stop again
    assert!(session.start().await.is_err());
    session.stop();
    session.stop();
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_status_log_reflects_session_events() {
    let mut session = VoiceSession::new(Config::default());
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    // The persona rejection happens before any status mutation
    let snapshot = session.status().snapshot();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.last_error.is_none());
}

#[test]
fn test_cursor_reset_then_resume() {
    let mut scheduler = PlaybackScheduler::new(0.010);
    scheduler.schedule(&buffer_of(0.5), 0.0);
    scheduler.interrupt(0.1);

    // Resumes from the present instant, not the discarded cursor
    let resumed = scheduler.schedule(&buffer_of(0.05), 0.1);
    assert!(resumed.start >= 0.1);
    assert!(resumed.start < 0.5);
}
