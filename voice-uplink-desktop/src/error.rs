use thiserror::Error;

use voice_uplink_core::models::error::{CaptureError, ConfigError, UploadError};

/// Errors raised by the desktop backend and CLI.
#[derive(Debug, Error)]
pub enum DesktopError {
    #[error("no default input device available")]
    NoDefaultDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Enumerate(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
