//! Output sink binding and schedule realization
//!
//! The output stream owns the playback clock: a sample counter advanced
//! by the device callback. Scheduled buffers become timeline entries that
//! begin at their scheduled instant; finished entries are reported back
//! to the session loop so the scheduler can retire them. An unknown or
//! unbindable sink name is a recoverable condition — playback falls back
//! to the default sink with a warning, never a failure.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::codec::{PlaybackBuffer, PLAYBACK_RATE};
use super::scheduler::ScheduledSource;
use crate::error::DeviceError;
use crate::Result;

/// One buffer placed on the output timeline
struct TimelineEntry {
    id: u64,
    start_sample: u64,
    samples: Vec<f32>,
}

/// Shared state between the session and the device callback
struct Timeline {
    /// Samples rendered so far; the playback clock
    clock: u64,
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    /// Render one output block, retiring finished entries
    fn render(&mut self, data: &mut [f32], channels: usize, finished: &mpsc::UnboundedSender<u64>) {
        let frames = data.len() / channels;

        for (i, frame) in data.chunks_mut(channels).enumerate() {
            let t = self.clock + i as u64;
            let mut sample = 0.0f32;

            for entry in &self.entries {
                if t >= entry.start_sample {
                    #[allow(clippy::cast_possible_truncation)]
                    let offset = (t - entry.start_sample) as usize;
                    if let Some(&s) = entry.samples.get(offset) {
                        sample += s;
                    }
                }
            }

            for out in frame.iter_mut() {
                *out = sample;
            }
        }

        self.clock += frames as u64;

        // Retire entries fully behind the clock
        let clock = self.clock;
        self.entries.retain(|entry| {
            let done = entry.start_sample + entry.samples.len() as u64 <= clock;
            if done {
                // Session may already be gone; a dropped receiver is fine
                let _ = finished.send(entry.id);
            }
            !done
        });
    }
}

/// Plays scheduled buffers to an output sink
pub struct OutputStream {
    stream: Stream,
    timeline: Arc<Mutex<Timeline>>,
    device_name: String,
}

impl OutputStream {
    /// Bind the playback graph to a sink and start the stream
    ///
    /// `sink_name` of `None` uses the host default. A named sink that
    /// cannot be found or opened degrades to the default sink with a
    /// warning. Finished-entry ids are reported on `finished`.
    ///
    /// # Errors
    ///
    /// Returns a [`DeviceError`] only when no output sink at all can be
    /// opened at the playback rate.
    pub fn open(sink_name: Option<&str>, finished: mpsc::UnboundedSender<u64>) -> Result<Self> {
        let host = cpal::default_host();
        let device = bind_sink(&host, sink_name)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let config = output_config(&device)?;
        let channels = usize::from(config.channels);

        let timeline = Arc::new(Mutex::new(Timeline {
            clock: 0,
            entries: Vec::new(),
        }));
        let shared = Arc::clone(&timeline);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if let Ok(mut timeline) = shared.lock() {
                        timeline.render(data, channels, &finished);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        stream
            .play()
            .map_err(|e| DeviceError::Backend(e.to_string()))?;

        tracing::debug!(
            device = %name,
            sample_rate = PLAYBACK_RATE,
            channels,
            "audio output started"
        );

        Ok(Self {
            stream,
            timeline,
            device_name: name,
        })
    }

    /// Current playback clock reading in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn now(&self) -> f64 {
        let clock = self.timeline.lock().map(|t| t.clock).unwrap_or(0);
        clock as f64 / f64::from(PLAYBACK_RATE)
    }

    /// Place a scheduled buffer on the timeline
    pub fn start_at(&self, source: &ScheduledSource, buffer: PlaybackBuffer) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_sample = (source.start * f64::from(PLAYBACK_RATE)).round() as u64;

        if let Ok(mut timeline) = self.timeline.lock() {
            timeline.entries.push(TimelineEntry {
                id: source.id,
                start_sample,
                samples: buffer.samples,
            });
        }
    }

    /// Forcibly stop every entry still on the timeline
    ///
    /// Used on interruption and teardown; stopped entries produce no
    /// completion notifications.
    pub fn stop_all(&self) {
        if let Ok(mut timeline) = self.timeline.lock() {
            let discarded = timeline.entries.len();
            timeline.entries.clear();
            if discarded > 0 {
                tracing::debug!(discarded, "stopped scheduled playback");
            }
        }
    }

    /// Name of the bound sink
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Release the sink
    pub fn close(self) {
        self.stop_all();
        drop(self.stream);
        tracing::debug!("audio output stopped");
    }
}

/// Bind the requested sink, degrading to the default on failure
fn bind_sink(host: &cpal::Host, sink_name: Option<&str>) -> Result<Device> {
    if let Some(wanted) = sink_name {
        match host.output_devices() {
            Ok(mut devices) => {
                if let Some(device) = devices.find(|d| d.name().is_ok_and(|n| n == wanted)) {
                    return Ok(device);
                }
                tracing::warn!(sink = %wanted, "output sink not found, using default");
            }
            Err(e) => {
                tracing::warn!(sink = %wanted, error = %e, "cannot enumerate sinks, using default");
            }
        }
    }

    host.default_output_device()
        .ok_or_else(|| DeviceError::Unavailable("no default output device".to_string()).into())
}

/// Negotiate an f32 output config at the playback rate, mono preferred
fn output_config(device: &Device) -> Result<StreamConfig> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= SampleRate(PLAYBACK_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_RATE)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| {
            DeviceError::UnsupportedConfig(format!("no f32 output config at {PLAYBACK_RATE} Hz"))
        })?;

    Ok(supported
        .with_sample_rate(SampleRate(PLAYBACK_RATE))
        .config())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, start_sample: u64, samples: Vec<f32>) -> TimelineEntry {
        TimelineEntry {
            id,
            start_sample,
            samples,
        }
    }

    #[test]
    fn render_places_entries_at_scheduled_sample() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timeline = Timeline {
            clock: 0,
            entries: vec![entry(0, 2, vec![0.5, 0.5])],
        };

        let mut block = [0.0f32; 6];
        timeline.render(&mut block, 1, &tx);

        assert_eq!(block, [0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(timeline.clock, 6);
    }

    #[test]
    fn render_reports_finished_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timeline = Timeline {
            clock: 0,
            entries: vec![entry(7, 0, vec![0.1, 0.2])],
        };

        let mut block = [0.0f32; 4];
        timeline.render(&mut block, 1, &tx);

        assert!(timeline.entries.is_empty());
        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn render_keeps_unfinished_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timeline = Timeline {
            clock: 0,
            entries: vec![entry(1, 2, vec![0.1; 8])],
        };

        let mut block = [0.0f32; 4];
        timeline.render(&mut block, 1, &tx);

        assert_eq!(timeline.entries.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn render_duplicates_across_channels() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timeline = Timeline {
            clock: 0,
            entries: vec![entry(0, 0, vec![0.25, 0.75])],
        };

        let mut block = [0.0f32; 4];
        timeline.render(&mut block, 2, &tx);

        assert_eq!(block, [0.25, 0.25, 0.75, 0.75]);
        assert_eq!(timeline.clock, 2);
    }

    #[test]
    fn consecutive_entries_render_gapless() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timeline = Timeline {
            clock: 0,
            entries: vec![
                entry(0, 0, vec![0.1, 0.1]),
                entry(1, 2, vec![0.2, 0.2]),
            ],
        };

        let mut block = [0.0f32; 4];
        timeline.render(&mut block, 1, &tx);

        assert_eq!(block, [0.1, 0.1, 0.2, 0.2]);
    }
}
