//! Voxrelay - real-time voice persona relay
//!
//! Captures microphone audio, streams it to a duplex speech model that
//! re-speaks it in a configured persona voice, and plays the returned
//! audio gaplessly to a local or virtual output sink — a voice disguise
//! usable inside any downstream communication app.
//!
//! # Architecture
//!
//! ```text
//! mic ──► Capture ──► Encoder ──► Transport (out)
//!                                     │  duplex WebSocket
//! sink ◄── Output ◄── Scheduler ◄── Decoder ◄── Transport (in)
//! ```
//!
//! The session object owns every per-call resource; its dispatch loop is
//! the single writer of scheduling state.

pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::{DeviceError, Error, Result};
pub use session::{ConnectionState, StatusFeed, StatusSnapshot, VoiceSession};
