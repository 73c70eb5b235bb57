use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::AudioFormat;
use crate::models::error::{io_status, CaptureError, STATUS_INVALID_STATE, STATUS_PARAM_ERROR};
use crate::models::recording_result::SinkReport;
use crate::processing::wav_format::{self, DATA_SIZE_OFFSET, RIFF_SIZE_OFFSET, WAV_HEADER_SIZE};
use crate::traits::packet_sink::{PacketSink, SinkProvider};

/// Packet sink writing a linear PCM WAV file.
///
/// ## File Format
/// ```text
/// [44-byte WAV header, sizes patched on close]
/// [packet 0][packet 1]...   (packet N at 44 + N * bytes_per_packet)
/// ```
///
/// Packets are placed by index, so out-of-order batches land where they belong.
/// I/O failures surface as `CaptureError::DeviceError` carrying the OS error number.
pub struct WavFileSink {
    file_path: PathBuf,
    format: AudioFormat,
    file: Option<File>,
    /// Current file cursor, to skip redundant seeks on sequential writes.
    position: u64,
    /// End of the furthest packet written, relative to the data chunk.
    data_end: u64,
}

impl WavFileSink {
    /// Create (or truncate) `path` and write a placeholder header.
    pub fn create(path: &Path, format: &AudioFormat) -> Result<Self, CaptureError> {
        format.validate()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                CaptureError::SinkOpenFailed(format!("failed to create directory: {}", e))
            })?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| CaptureError::SinkOpenFailed(format!("{}: {}", path.display(), e)))?;

        let header = wav_format::wav_header(format, 0)?;
        file.write_all(&header)
            .map_err(|e| CaptureError::SinkOpenFailed(format!("failed to write header: {}", e)))?;

        Ok(Self {
            file_path: path.to_path_buf(),
            format: *format,
            file: Some(file),
            position: WAV_HEADER_SIZE as u64,
            data_end: 0,
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// PCM bytes covered so far (highest packet end).
    pub fn data_bytes(&self) -> u64 {
        self.data_end
    }

    fn file_mut(&mut self) -> Result<&mut File, CaptureError> {
        self.file.as_mut().ok_or(CaptureError::DeviceError(STATUS_INVALID_STATE))
    }
}

impl PacketSink for WavFileSink {
    fn write_packets(
        &mut self,
        bytes: &[u8],
        packet_count: u32,
        at_packet: i64,
    ) -> Result<(), CaptureError> {
        let bytes_per_packet = self.format.bytes_per_packet() as u64;
        let len = packet_count as u64 * bytes_per_packet;
        if at_packet < 0 || (bytes.len() as u64) < len {
            return Err(CaptureError::DeviceError(STATUS_PARAM_ERROR));
        }

        let offset = WAV_HEADER_SIZE as u64 + at_packet as u64 * bytes_per_packet;
        let position = self.position;
        let file = self.file_mut()?;
        if position != offset {
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| CaptureError::DeviceError(io_status(&e)))?;
        }
        file.write_all(&bytes[..len as usize])
            .map_err(|e| CaptureError::DeviceError(io_status(&e)))?;

        self.position = offset + len;
        self.data_end = self.data_end.max(self.position - WAV_HEADER_SIZE as u64);
        Ok(())
    }

    /// Patch the RIFF and data sizes, flush, and checksum the finished file.
    fn close(&mut self) -> Result<SinkReport, CaptureError> {
        let data_size = self.data_end;
        let mut file = self
            .file
            .take()
            .ok_or(CaptureError::DeviceError(STATUS_INVALID_STATE))?;

        let patch = |file: &mut File, offset: u64, value: u32| -> std::io::Result<()> {
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&value.to_le_bytes())
        };
        patch(&mut file, RIFF_SIZE_OFFSET, wav_format::riff_size(data_size))
            .and_then(|_| patch(&mut file, DATA_SIZE_OFFSET, data_size.min(u32::MAX as u64) as u32))
            .and_then(|_| file.flush())
            .map_err(|e| CaptureError::DeviceError(io_status(&e)))?;

        let checksum = sha256_of(&mut file).map_err(|e| CaptureError::DeviceError(io_status(&e)))?;
        log::debug!(
            "closed {} ({} data bytes, sha256 {})",
            self.file_path.display(),
            data_size,
            checksum
        );

        Ok(SinkReport {
            data_bytes: data_size,
            checksum: Some(checksum),
        })
    }
}

/// Opens [`WavFileSink`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavSinkProvider;

impl SinkProvider for WavSinkProvider {
    fn open(&self, path: &Path, format: &AudioFormat) -> Result<Box<dyn PacketSink>, CaptureError> {
        let sink = WavFileSink::create(path, format).map_err(|e| match e {
            CaptureError::SinkOpenFailed(_) => e,
            other => CaptureError::SinkOpenFailed(other.to_string()),
        })?;
        Ok(Box::new(sink))
    }
}

/// Read a finished WAV recording and return its PCM data chunk.
pub fn read_pcm_payload(path: &Path) -> Result<Vec<u8>, CaptureError> {
    let bytes = fs::read(path)
        .map_err(|e| CaptureError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
    wav_format::pcm_payload(&bytes)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CaptureError::Storage(format!("{} is not a WAV recording", path.display())))
}

fn sha256_of(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect())
}
