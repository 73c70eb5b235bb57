use std::path::Path;

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::models::recording_result::SinkReport;

/// Persistent store that captured packets are written to as they arrive.
pub trait PacketSink: Send {
    /// Write `packet_count` packets from `bytes` starting at packet index `at_packet`.
    fn write_packets(
        &mut self,
        bytes: &[u8],
        packet_count: u32,
        at_packet: i64,
    ) -> Result<(), CaptureError>;

    /// Finalize the sink. Called exactly once.
    fn close(&mut self) -> Result<SinkReport, CaptureError>;
}

/// Opens sinks for the capture engine.
pub trait SinkProvider: Send + Sync {
    /// Create (or truncate) the sink at `path` for exclusive writing.
    ///
    /// Failures are reported as `CaptureError::SinkOpenFailed`.
    fn open(&self, path: &Path, format: &AudioFormat) -> Result<Box<dyn PacketSink>, CaptureError>;
}
