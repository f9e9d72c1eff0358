//! Audio capture from the microphone
//!
//! Claims an input device (named or host default) as a 16kHz mono f32
//! stream and slices the callback data into fixed-size frames. Frames are
//! delivered through a bounded channel with `try_send`: a full channel
//! drops the frame rather than blocking the audio callback — a live
//! low-latency pipeline has no use for stale audio.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::CAPTURE_RATE;
use crate::error::DeviceError;
use crate::Result;

/// Accumulates callback data into fixed-size frames
///
/// Pure and stateless across sessions: leftover samples smaller than one
/// frame stay buffered until the next callback.
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker emitting frames of `frame_size` samples
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Push callback data, returning every completed frame
    pub fn push(&mut self, data: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(data);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending.drain(..self.frame_size).collect();
            frames.push(frame);
        }
        frames
    }

    /// Samples buffered below one frame
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

/// Captures fixed-size mono frames from an input device
pub struct AudioCapture {
    stream: Stream,
    device_name: String,
}

impl AudioCapture {
    /// Claim an input device and start delivering frames
    ///
    /// `device_name` of `None` uses the host default. The stream runs
    /// until the returned handle is dropped or [`stop`](Self::stop) is
    /// called; the device handle is held for that entire lifetime.
    ///
    /// # Errors
    ///
    /// Returns a distinct [`DeviceError`] when the device is missing,
    /// busy, or cannot satisfy 16kHz mono f32 capture.
    pub fn open(
        device_name: Option<&str>,
        frame_size: usize,
        frames: mpsc::Sender<Vec<f32>>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device_name)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = input_config(&device)?;
        let mut chunker = FrameChunker::new(frame_size);
        let channels = usize::from(config.channels);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Mono pipeline: take the first channel if the device
                    // only opens multi-channel
                    let mono: Vec<f32> = if channels == 1 {
                        data.to_vec()
                    } else {
                        data.iter().step_by(channels).copied().collect()
                    };

                    for frame in chunker.push(&mono) {
                        // Fire-and-forget: drop the frame when the
                        // consumer lags, never block the callback
                        let _ = frames.try_send(frame);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        tracing::debug!(
            device = %name,
            sample_rate = CAPTURE_RATE,
            frame_size,
            "audio capture started"
        );

        Ok(Self {
            stream,
            device_name: name,
        })
    }

    /// Name of the claimed device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Release the device
    pub fn stop(self) {
        drop(self.stream);
        tracing::debug!("audio capture stopped");
    }
}

/// Locate an input device by name, or the host default
fn find_input_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    match name {
        Some(wanted) => {
            let mut devices = host
                .input_devices()
                .map_err(|e| DeviceError::Backend(e.to_string()))?;
            devices
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| DeviceError::NotFound(wanted.to_string()).into())
        }
        None => host
            .default_input_device()
            .ok_or_else(|| DeviceError::Unavailable("no default input device".to_string()).into()),
    }
}

/// Negotiate a mono (or first-channel) f32 config at the capture rate
fn input_config(device: &Device) -> Result<StreamConfig> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(CAPTURE_RATE)
                && c.max_sample_rate() >= SampleRate(CAPTURE_RATE)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| {
            DeviceError::UnsupportedConfig(format!("no f32 input config at {CAPTURE_RATE} Hz"))
        })?;

    Ok(supported.with_sample_rate(SampleRate(CAPTURE_RATE)).config())
}

/// Map cpal build errors onto the device taxonomy
fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            DeviceError::Unavailable("device busy or disconnected".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::UnsupportedConfig("requested stream config rejected".to_string())
        }
        other => DeviceError::Backend(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunker_emits_fixed_frames() {
        let mut chunker = FrameChunker::new(4);

        let frames = chunker.push(&[0.1, 0.2, 0.3]);
        assert!(frames.is_empty());
        assert_eq!(chunker.buffered(), 3);

        let frames = chunker.push(&[0.4, 0.5]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(chunker.buffered(), 1);
    }

    #[test]
    fn chunker_emits_multiple_frames_per_push() {
        let mut chunker = FrameChunker::new(2);
        let frames = chunker.push(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![1.0, 2.0]);
        assert_eq!(frames[1], vec![3.0, 4.0]);
        assert_eq!(chunker.buffered(), 1);
    }

    #[test]
    fn chunker_exact_boundary_leaves_nothing() {
        let mut chunker = FrameChunker::new(3);
        let frames = chunker.push(&[1.0, 2.0, 3.0]);
        assert_eq!(frames.len(), 1);
        assert_eq!(chunker.buffered(), 0);
    }
}
