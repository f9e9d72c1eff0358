//! Audio pipeline: capture, PCM codec, scheduling, and output
//!
//! Capture and output each own one cpal stream; the codec and scheduler
//! are pure and hardware-free.

mod capture;
pub mod codec;
mod output;
mod scheduler;

pub use capture::{AudioCapture, FrameChunker};
pub use codec::{decode_chunk, encode_frame, EncodedChunk, PlaybackBuffer, CAPTURE_RATE, PLAYBACK_RATE};
pub use output::OutputStream;
pub use scheduler::{PlaybackScheduler, ScheduledSource};
