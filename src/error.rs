//! Error types for the voxrelay pipeline

use thiserror::Error;

/// Result type alias for voxrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the relay pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing persona, unobtainable credential)
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Malformed inbound audio payload
    #[error("format error: {0}")]
    Format(String),

    /// Transport error (handshake failure, mid-session fault)
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Audio device failures, distinguished so callers can give actionable
/// guidance ("device busy" vs "not found" vs "unsupported settings").
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device with the requested identifier exists
    #[error("audio device not found: {0}")]
    NotFound(String),

    /// Device exists but cannot be opened (claimed elsewhere, unplugged)
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    /// Device cannot satisfy the requested stream configuration
    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    /// Host audio backend failure
    #[error("audio backend error: {0}")]
    Backend(String),
}
