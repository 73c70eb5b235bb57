use thiserror::Error;

/// Status code reported by the platform audio subsystem (0 = success).
pub type DeviceStatus = i32;

/// Generic I/O failure when the OS gives no error number.
pub const STATUS_IO_ERROR: DeviceStatus = -36;

/// A call received arguments it cannot act on.
pub const STATUS_PARAM_ERROR: DeviceStatus = -50;

/// The queue is not in a state that allows the call.
pub const STATUS_INVALID_STATE: DeviceStatus = -66;

/// Map an I/O error to a device status, preferring the OS error number.
pub fn io_status(error: &std::io::Error) -> DeviceStatus {
    error.raw_os_error().unwrap_or(STATUS_IO_ERROR)
}

/// Errors that can occur while configuring, running or tearing down capture.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture setup incomplete: configure was already called, reset first")]
    SetupIncomplete,

    #[error("capture engine is not configured")]
    NotConfigured,

    #[error("capture engine is not recording")]
    NotRecording,

    #[error("capture engine is busy recording")]
    Busy,

    #[error("invalid audio format: {0}")]
    InvalidFormat(String),

    #[error("failed to open sink: {0}")]
    SinkOpenFailed(String),

    #[error("audio device error (status {0})")]
    DeviceError(DeviceStatus),

    #[error("buffer pool violation: {0}")]
    BufferState(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CaptureError {
    /// The platform status code carried by `DeviceError`, if any.
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            Self::DeviceError(code) => Some(*code),
            _ => None,
        }
    }
}

/// Errors raised while decoding a multipart body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("boundary delimiter not found in body")]
    BoundaryNotFound,

    #[error("part {index} has no header terminator")]
    MissingHeaderTerminator { index: usize },
}

/// Network-level failure reported by an `HttpTransport`; no response was received.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Errors surfaced by an upload session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("upload options not set: {0} missing")]
    SetupIncomplete(&'static str),

    #[error("{0} handler already set")]
    HandlerAlreadySet(&'static str),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("API error: {status} - {message}")]
    ApiCall { status: u16, message: String },

    #[error("could not find boundary in response content type")]
    ResponseBoundaryMissing,

    #[error("malformed multipart response: {0}")]
    MalformedMultipart(#[from] MultipartError),

    #[error("upload worker failed: {0}")]
    Worker(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("io error: {0}")]
    Io(String),
}

/// Errors while loading pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
