//! Configuration management for the voxrelay pipeline
//!
//! Layered: built-in defaults, overlaid by an all-optional TOML file at
//! `~/.config/voxrelay/config.toml`, overlaid by environment variables.
//! CLI flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::Result;

/// Environment variable holding the long-lived API key
pub const API_KEY_ENV: &str = "VOXRELAY_API_KEY";

/// Default streaming model identifier
const DEFAULT_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

/// Default duplex endpoint
const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Voxrelay configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Persona applied by the remote model
    pub persona: PersonaConfig,

    /// Audio pipeline configuration
    pub audio: AudioConfig,

    /// Remote model configuration
    pub model: ModelConfig,

    /// Credential configuration
    pub auth: AuthConfig,
}

/// Persona applied by the remote model
#[derive(Debug, Clone, Default)]
pub struct PersonaConfig {
    /// Prebuilt voice identifier (e.g. "Zephyr"); empty means no persona
    /// has been selected and `start()` is rejected
    pub voice: String,

    /// System instruction shaping how the model re-speaks input
    pub instruction: String,
}

/// Audio pipeline configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Input device name; `None` uses the host default
    pub input_device: Option<String>,

    /// Output sink name; `None` uses the host default. Binding failures
    /// fall back to the default sink with a warning.
    pub output_device: Option<String>,

    /// Capture frame size in samples (512 = 32ms at 16kHz)
    pub frame_size: usize,

    /// Scheduling lookahead in milliseconds, absorbs host jitter when the
    /// playback cursor is re-anchored after an underrun
    pub lookahead_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            frame_size: 512,
            lookahead_ms: 10,
        }
    }
}

impl AudioConfig {
    /// Scheduling lookahead in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn lookahead_secs(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }
}

/// Remote model configuration
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier
    pub id: String,

    /// Duplex WebSocket endpoint
    pub endpoint: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// Credential configuration
///
/// An ephemeral single-use token from the exchange endpoint is preferred;
/// the long-lived key is the fallback.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Long-lived API key (from `VOXRELAY_API_KEY` or the config file)
    pub api_key: Option<SecretString>,

    /// Local token-exchange endpoint URL
    pub token_endpoint: Option<String>,

    /// Timeout for the token exchange in milliseconds
    pub token_timeout_ms: u64,
}

impl AuthConfig {
    /// Token-exchange timeout as a [`Duration`]
    #[must_use]
    pub const fn token_timeout(&self) -> Duration {
        Duration::from_millis(self.token_timeout_ms)
    }
}

/// Default token-exchange timeout: aggressive, the fallback key is local
const DEFAULT_TOKEN_TIMEOUT_MS: u64 = 1500;

// --- TOML file overlay ---

/// Top-level TOML configuration file schema; every field is optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    persona: PersonaFileConfig,

    #[serde(default)]
    audio: AudioFileConfig,

    #[serde(default)]
    model: ModelFileConfig,

    #[serde(default)]
    auth: AuthFileConfig,
}

#[derive(Debug, Default, Deserialize)]
struct PersonaFileConfig {
    voice: Option<String>,
    instruction: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AudioFileConfig {
    input_device: Option<String>,
    output_device: Option<String>,
    frame_size: Option<usize>,
    lookahead_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelFileConfig {
    id: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthFileConfig {
    api_key: Option<String>,
    token_endpoint: Option<String>,
    token_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            persona: PersonaConfig::default(),
            audio: AudioConfig::default(),
            model: ModelConfig::default(),
            auth: AuthConfig {
                api_key: None,
                token_endpoint: None,
                token_timeout_ms: DEFAULT_TOKEN_TIMEOUT_MS,
            },
        }
    }
}

impl Config {
    /// Load configuration from the default file location plus environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        Self::load_from(path.as_deref())
    }

    /// Load configuration from an explicit file path plus environment
    ///
    /// A missing file is not an error; the file is a partial overlay.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) if p.exists() => {
                let contents = std::fs::read_to_string(p)?;
                let parsed: ConfigFile = toml::from_str(&contents)?;
                tracing::debug!(path = %p.display(), "loaded config file");
                parsed
            }
            _ => ConfigFile::default(),
        };

        let mut config = Self::default();
        config.apply_file(file);
        config.apply_env();
        Ok(config)
    }

    /// Platform config file path (`~/.config/voxrelay/config.toml`)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voxrelay")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(voice) = file.persona.voice {
            self.persona.voice = voice;
        }
        if let Some(instruction) = file.persona.instruction {
            self.persona.instruction = instruction;
        }
        if file.audio.input_device.is_some() {
            self.audio.input_device = file.audio.input_device;
        }
        if file.audio.output_device.is_some() {
            self.audio.output_device = file.audio.output_device;
        }
        if let Some(frame_size) = file.audio.frame_size {
            self.audio.frame_size = frame_size;
        }
        if let Some(lookahead_ms) = file.audio.lookahead_ms {
            self.audio.lookahead_ms = lookahead_ms;
        }
        if let Some(id) = file.model.id {
            self.model.id = id;
        }
        if let Some(endpoint) = file.model.endpoint {
            self.model.endpoint = endpoint;
        }
        if let Some(key) = file.auth.api_key {
            self.auth.api_key = Some(SecretString::from(key));
        }
        if file.auth.token_endpoint.is_some() {
            self.auth.token_endpoint = file.auth.token_endpoint;
        }
        if let Some(timeout) = file.auth.token_timeout_ms {
            self.auth.token_timeout_ms = timeout;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.auth.api_key = Some(SecretString::from(key));
            }
        }
    }
}
