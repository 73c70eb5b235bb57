use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::audio_models::{AudioFormat, DEFAULT_BUFFER_SECONDS};
use super::error::ConfigError;

/// Default speech recognizer endpoint.
pub const DEFAULT_ENDPOINT: &str =
    "https://access-alexa-na.amazon.com/v1/avs/speechrecognizer/recognize";

/// Fixed upload timeout enforced by the transport.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Root configuration for a capture → upload pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub audio: AudioConfig,
    pub upload: UploadConfig,
    pub storage: StorageConfig,
}

/// Capture settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate in Hz (default: 16000).
    pub sample_rate: f64,

    /// Channel count (default: 1).
    pub channels: u16,

    /// Bits per channel (default: 16). Valid values: 8, 16, 24, 32.
    pub bits_per_channel: u16,

    /// Number of buffers cycled through the input queue (default: 1).
    pub buffer_count: usize,

    /// Seconds of audio per buffer (default: 0.5).
    pub buffer_seconds: f64,

    /// Deliver the partially filled buffer when stopping instead of discarding it.
    pub drain_on_stop: bool,

    /// Input device name, or None for the system default.
    pub device: Option<String>,
}

/// Upload settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub profile: String,
    pub locale: String,
    /// Environment variable holding the bearer token.
    pub token_env: String,
}

/// File locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub recording_path: PathBuf,
    pub response_dir: PathBuf,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000.0,
            channels: 1,
            bits_per_channel: 16,
            buffer_count: 1,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            drain_on_stop: true,
            device: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            profile: "doppler-scone".to_string(),
            locale: "en-us".to_string(),
            token_env: "AVS_ACCESS_TOKEN".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            recording_path: tmp.join("voice-uplink.wav"),
            response_dir: tmp.join("voice-uplink-responses"),
        }
    }
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, self.bits_per_channel)
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file. Missing fields use defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults only when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load(path) {
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                log::debug!("no config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides:
    /// - `VOICE_UPLINK_ENDPOINT` → upload.endpoint
    /// - `VOICE_UPLINK_DEVICE` → audio.device
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("VOICE_UPLINK_ENDPOINT") {
            if !endpoint.is_empty() {
                self.upload.endpoint = endpoint;
            }
        }
        if let Ok(device) = std::env::var("VOICE_UPLINK_DEVICE") {
            if !device.is_empty() {
                self.audio.device = Some(device);
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.audio
            .format()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.audio.buffer_count == 0 {
            return Err(ConfigError::Invalid("buffer_count must be at least 1".into()));
        }
        if !self.audio.buffer_seconds.is_finite() || self.audio.buffer_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "buffer_seconds must be positive and finite".into(),
            ));
        }
        self.audio
            .format()
            .buffer_byte_size(self.audio.buffer_seconds)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.upload.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be positive".into()));
        }
        if self.upload.endpoint.is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".into()));
        }
        Ok(())
    }
}
