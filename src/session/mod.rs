//! Session lifecycle: composition of capture, transport, and playback
//!
//! A [`VoiceSession`] owns every per-call resource (device handles, the
//! scheduler, the transport) so teardown is idempotent and late events
//! cannot resurrect torn-down state. The dispatch loop in [`run`] is the
//! single writer of scheduler state: capture frames, transport events,
//! and completion notifications all arrive over channels and are handled
//! one at a time.
//!
//! [`run`]: VoiceSession::run

mod status;
mod transport;

pub use status::{StatusFeed, StatusSnapshot};
pub use transport::{ConnectionState, LiveTransport, ServerEvent};

use tokio::sync::mpsc;

use crate::audio::{
    decode_chunk, encode_frame, AudioCapture, OutputStream, PlaybackScheduler,
};
use crate::auth;
use crate::{Config, Error, Result};

/// Capture channel depth in frames; overflowing frames are dropped
const FRAME_CHANNEL_DEPTH: usize = 32;

/// Everything held only while a call is live
struct ActivePipeline {
    capture: AudioCapture,
    output: OutputStream,
    transport: LiveTransport,
    scheduler: PlaybackScheduler,
    frames: mpsc::Receiver<Vec<f32>>,
    finished: mpsc::UnboundedReceiver<u64>,
}

/// How the dispatch loop ended
enum RunOutcome {
    /// Remote closed the session gracefully
    Closed,
    /// Transport or pipeline fault
    Faulted(String),
}

/// One relay session: microphone in, persona voice out
pub struct VoiceSession {
    config: Config,
    status: StatusFeed,
    active: Option<ActivePipeline>,
}

impl VoiceSession {
    /// Create an inactive session
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            status: StatusFeed::new(),
            active: None,
        }
    }

    /// Status observable for the UI layer
    #[must_use]
    pub fn status(&self) -> &StatusFeed {
        &self.status
    }

    /// Begin the pipeline
    ///
    /// Acquires resources in order: credential, output sink, input
    /// device, duplex session. A failure at any step releases everything
    /// already acquired and surfaces the cause verbatim.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when no persona voice is selected, when a
    /// session is already live, or when no credential can be obtained;
    /// `Error::Device` or `Error::Transport` for acquisition failures.
    pub async fn start(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::Config("session already started".to_string()));
        }
        if self.config.persona.voice.is_empty() {
            return Err(Error::Config(
                "no persona voice selected; set [persona] voice".to_string(),
            ));
        }

        self.status.clear_error();
        self.status.set_state(ConnectionState::Connecting);

        match self.acquire().await {
            Ok(pipeline) => {
                self.active = Some(pipeline);
                self.status.set_state(ConnectionState::Connected);
                self.status.log("session connected");
                Ok(())
            }
            Err(e) => {
                // Partially acquired resources were already released on drop
                self.status.set_error(e.to_string());
                Err(e)
            }
        }
    }

    async fn acquire(&self) -> Result<ActivePipeline> {
        let credential = auth::resolve_credential(&self.config.auth).await?;

        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let output = OutputStream::open(self.config.audio.output_device.as_deref(), finished_tx)?;
        self.status
            .log(format!("output bound to {}", output.device_name()));

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
        let capture = AudioCapture::open(
            self.config.audio.input_device.as_deref(),
            self.config.audio.frame_size,
            frame_tx,
        )?;
        self.status
            .log(format!("capturing from {}", capture.device_name()));

        let transport =
            LiveTransport::connect(&self.config.model, &self.config.persona, &credential).await?;

        Ok(ActivePipeline {
            capture,
            output,
            transport,
            scheduler: PlaybackScheduler::new(self.config.audio.lookahead_secs()),
            frames: frame_rx,
            finished: finished_rx,
        })
    }

    /// Drive the pipeline until the remote closes or a fault occurs
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the session was never started and
    /// `Error::Transport` when the session ends on a fault. A graceful
    /// remote close is not an error. Either way the session is fully torn
    /// down on return.
    pub async fn run(&mut self) -> Result<()> {
        let outcome = {
            let Self { status, active, .. } = self;
            let Some(pipeline) = active.as_mut() else {
                return Err(Error::Config("session not started".to_string()));
            };
            dispatch(pipeline, status).await
        };

        match outcome {
            RunOutcome::Closed => {
                self.status.log("session closed by remote");
                self.stop();
                Ok(())
            }
            RunOutcome::Faulted(message) => {
                self.status.set_error(message.clone());
                self.stop();
                Err(Error::Transport(message))
            }
        }
    }

    /// Full teardown: release the input device, stop and clear every
    /// scheduled source, close the output sink, close the transport
    ///
    /// Idempotent: safe to call repeatedly and safe after a partial or
    /// failed start. Resources never acquired are simply absent.
    pub fn stop(&mut self) {
        if let Some(pipeline) = self.active.take() {
            pipeline.capture.stop();
            pipeline.output.close();

            let mut transport = pipeline.transport;
            transport.begin_close();

            self.status.log("session stopped");
        }

        // A fault keeps the error state visible until the next start
        if self.status.state() != ConnectionState::Error {
            self.status.set_state(ConnectionState::Disconnected);
        }
    }

    /// Whether a pipeline is currently live
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single-writer dispatch loop
async fn dispatch(pipeline: &mut ActivePipeline, status: &StatusFeed) -> RunOutcome {
    loop {
        tokio::select! {
            frame = pipeline.frames.recv() => {
                let Some(frame) = frame else {
                    return RunOutcome::Faulted("capture stream ended".to_string());
                };
                // Best-effort send; dropped when the writer is saturated
                pipeline.transport.send(encode_frame(&frame));
            }

            id = pipeline.finished.recv() => {
                // Sender lives inside the output stream; it outlives us
                if let Some(id) = id {
                    pipeline.scheduler.complete(id);
                }
            }

            event = pipeline.transport.next_event() => {
                match event {
                    Some(ServerEvent::Audio(bytes)) => {
                        match decode_chunk(&bytes) {
                            Ok(buffer) => {
                                if buffer.samples.is_empty() {
                                    continue;
                                }
                                let now = pipeline.output.now();
                                let source = pipeline.scheduler.schedule(&buffer, now);
                                pipeline.output.start_at(&source, buffer);
                            }
                            Err(e) => {
                                // One corrupt chunk never ends the session
                                tracing::warn!(error = %e, "dropped malformed audio chunk");
                            }
                        }
                    }
                    Some(ServerEvent::Interrupted) => {
                        pipeline.output.stop_all();
                        pipeline.scheduler.interrupt(pipeline.output.now());
                        status.log("interrupted: queued audio discarded");
                    }
                    Some(ServerEvent::Closed) | None => {
                        return RunOutcome::Closed;
                    }
                    Some(ServerEvent::Error(message)) => {
                        return RunOutcome::Faulted(message);
                    }
                }
            }
        }
    }
}
