//! PCM conversion between float frames and the wire format
//!
//! The remote protocol fixes the format: 16-bit signed little-endian PCM,
//! mono, 16kHz outbound and 24kHz inbound. Both directions are pure
//! per-chunk transforms with no cross-frame state.

use crate::{Error, Result};

/// Outbound capture sample rate (fixed by the remote protocol)
pub const CAPTURE_RATE: u32 = 16_000;

/// Inbound playback sample rate (fixed by the remote protocol)
pub const PLAYBACK_RATE: u32 = 24_000;

/// Encoded outbound audio: PCM bytes plus format tag
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    /// 16-bit little-endian PCM payload
    pub data: Vec<u8>,
    /// Format tag sent alongside the payload
    pub mime_type: String,
}

/// Decoded inbound audio ready for scheduling
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    /// Normalized float samples
    pub samples: Vec<f32>,
    /// Playback duration in seconds
    pub duration: f64,
}

/// Encode one float frame as 16-bit little-endian PCM
///
/// Samples are clamped to [-1, 1] and scaled asymmetrically (32767 for
/// positive, 32768 for negative) to match the signed integer range.
/// Output is always exactly twice the input length in bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_frame(samples: &[f32]) -> EncodedChunk {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
        let value = scaled.round() as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }

    EncodedChunk {
        data,
        mime_type: format!("audio/pcm;rate={CAPTURE_RATE}"),
    }
}

/// Decode an inbound 16-bit little-endian PCM payload
///
/// # Errors
///
/// Returns `Error::Format` if the payload is not a whole number of
/// samples. The caller drops the chunk; the session continues.
pub fn decode_chunk(data: &[u8]) -> Result<PlaybackBuffer> {
    if data.len() % 2 != 0 {
        return Err(Error::Format(format!(
            "payload length {} is not a whole number of 16-bit samples",
            data.len()
        )));
    }

    let samples: Vec<f32> = data
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / 32768.0)
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let duration = samples.len() as f64 / f64::from(PLAYBACK_RATE);

    Ok(PlaybackBuffer { samples, duration })
}
