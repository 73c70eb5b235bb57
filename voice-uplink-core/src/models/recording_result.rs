use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio_models::AudioFormat;

/// Outcome of closing a packet sink.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SinkReport {
    /// Audio payload bytes written (container headers excluded).
    pub data_bytes: u64,
    /// SHA-256 hex digest of the finished file, when the sink produces one.
    pub checksum: Option<String>,
}

/// Summary of a finished recording, produced by `CaptureEngine::stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub file_path: PathBuf,
    pub format: AudioFormat,
    pub packets_written: i64,
    pub bytes_written: u64,
    pub duration_secs: f64,
    pub checksum: Option<String>,
    pub finished_at: String,
}

impl RecordingSummary {
    pub fn new(
        file_path: PathBuf,
        format: AudioFormat,
        packets_written: i64,
        checksum: Option<String>,
    ) -> Self {
        let packets = packets_written.max(0);
        Self {
            file_path,
            format,
            packets_written: packets,
            bytes_written: packets as u64 * format.bytes_per_packet() as u64,
            duration_secs: packets as f64 * format.frames_per_packet() as f64 / format.sample_rate,
            checksum,
            finished_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.packets_written == 0
    }
}
