//! # voice-uplink-core
//!
//! Platform-agnostic core for capturing speech and sending it to a
//! remote recognizer.
//!
//! Provides the buffer-recycling capture engine, WAV packet sink,
//! multipart codec, upload session and the pipeline that ties them
//! together. Platform backends implement `AudioInput` and `HttpTransport`
//! and plug into the generic `CaptureEngine` / `VoicePipeline`.
//!
//! ## Architecture
//!
//! ```text
//! voice-uplink-core (this crate)
//! ├── traits/       ← AudioInput, PacketSink, CaptureDelegate, HttpTransport,
//! │                   TokenProvider, PlaybackConsumer
//! ├── models/       ← CaptureError, CaptureState, AudioFormat, PipelineConfig,
//! │                   MultipartPart, etc.
//! ├── processing/   ← BufferPool, WAV header generation
//! ├── codec/        ← multipart encode / decode
//! ├── session/      ← CaptureEngine, VoicePipeline
//! ├── storage/      ← WavFileSink
//! └── upload/       ← UploadSession, recognize metadata
//! ```

pub mod codec;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;
pub mod upload;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioFormat, CaptureDiagnostics};
pub use models::config::PipelineConfig;
pub use models::error::{CaptureError, ConfigError, MultipartError, TransportError, UploadError};
pub use models::multipart::{MultipartPart, PartHeaders};
pub use models::recording_result::RecordingSummary;
pub use models::state::CaptureState;
pub use processing::buffer_pool::{BufferPool, CaptureBuffer, SlotState};
pub use session::capture_engine::{CaptureEngine, CaptureOptions};
pub use session::pipeline::{route_parts, UploadHandlers, VoicePipeline};
pub use storage::wav_sink::{WavFileSink, WavSinkProvider};
pub use traits::audio_input::{AudioInput, BufferQueue, EnqueueError, FillCallback};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::http_transport::{HttpRequest, HttpResponse, HttpTransport, ProgressFn};
pub use traits::packet_sink::{PacketSink, SinkProvider};
pub use traits::playback::PlaybackConsumer;
pub use traits::token_provider::{EnvToken, StaticToken, TokenProvider};
pub use upload::session::{UploadHandle, UploadResponse, UploadSession};
