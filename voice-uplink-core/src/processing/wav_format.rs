//! RIFF/WAVE container helpers for linear PCM recordings.
//!
//! Layout of the canonical 44-byte header:
//! ```text
//! [0-3]    "RIFF"
//! [4-7]    file size - 8
//! [8-11]   "WAVE"
//! [12-15]  "fmt "
//! [16-19]  16 (PCM format chunk size)
//! [20-21]  1 (PCM format code)
//! [22-23]  channels
//! [24-27]  sample rate
//! [28-31]  byte rate = sample_rate * bytes_per_frame
//! [32-33]  block align = bytes_per_frame
//! [34-35]  bits per channel
//! [36-39]  "data"
//! [40-43]  data size
//! ```

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;

/// Size of the canonical WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Offset of the RIFF chunk size field.
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the data chunk size field.
pub const DATA_SIZE_OFFSET: u64 = 40;

/// Build a WAV header for `format` with `data_size` bytes of PCM.
///
/// Fails when the byte rate or block align overflow their header fields.
pub fn wav_header(
    format: &AudioFormat,
    data_size: u32,
) -> Result<[u8; WAV_HEADER_SIZE], CaptureError> {
    let byte_rate = format.byte_rate().ok_or_else(|| {
        CaptureError::InvalidFormat(format!("byte rate overflows: {:?}", format))
    })?;
    let block_align = format.block_align().ok_or_else(|| {
        CaptureError::InvalidFormat(format!("block align overflows: {:?}", format))
    })?;
    let sample_rate = format.sample_rate as u32;

    let mut header = [0u8; WAV_HEADER_SIZE];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size(data_size as u64).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_channel.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
    Ok(header)
}

/// Value of the RIFF size field for a file carrying `data_size` PCM bytes.
pub fn riff_size(data_size: u64) -> u32 {
    (WAV_HEADER_SIZE as u64 - 8 + data_size).min(u32::MAX as u64) as u32
}

/// Locate the `data` chunk of a RIFF/WAVE file and return its bytes.
///
/// Walks the chunk list so files with extra chunks (LIST, fact, ...) work.
/// A data chunk whose declared size runs past the end of the file is
/// clamped to the bytes actually present. Returns None when `bytes` is not
/// a WAVE file or has no data chunk.
pub fn pcm_payload(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return None;
    }
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body = pos + 8;
        if id == b"data" {
            let end = body.saturating_add(size).min(bytes.len());
            return Some(&bytes[body..end]);
        }
        // Chunks are word aligned.
        pos = body.saturating_add(size).saturating_add(size & 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_u32(b: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
    }

    fn le_u16(b: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([b[at], b[at + 1]])
    }

    #[test]
    fn header_magic_and_pcm_code() {
        let header = wav_header(&AudioFormat::speech(), 0).unwrap();
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
        assert_eq!(le_u16(&header, 20), 1);
        assert_eq!(le_u32(&header, 16), 16);
    }

    #[test]
    fn header_speech_format_fields() {
        let header = wav_header(&AudioFormat::speech(), 32000).unwrap();
        assert_eq!(le_u16(&header, 22), 1);
        assert_eq!(le_u32(&header, 24), 16000);
        assert_eq!(le_u32(&header, 28), 32000);
        assert_eq!(le_u16(&header, 32), 2);
        assert_eq!(le_u16(&header, 34), 16);
        assert_eq!(le_u32(&header, 40), 32000);
        assert_eq!(le_u32(&header, 4), 36 + 32000);
    }

    #[test]
    fn header_stereo_24_bit() {
        let header = wav_header(&AudioFormat::new(48000.0, 2, 24), 0).unwrap();
        assert_eq!(le_u32(&header, 28), 288000);
        assert_eq!(le_u16(&header, 32), 6);
    }

    #[test]
    fn header_rejects_overflowing_formats() {
        assert!(matches!(
            wav_header(&AudioFormat::new(1.0e12, 1, 16), 0),
            Err(CaptureError::InvalidFormat(_))
        ));
        assert!(matches!(
            wav_header(&AudioFormat::new(48000.0, 40000, 32), 0),
            Err(CaptureError::InvalidFormat(_))
        ));
    }

    #[test]
    fn header_riff_size_saturates_for_huge_data() {
        let header = wav_header(&AudioFormat::speech(), u32::MAX).unwrap();
        assert_eq!(le_u32(&header, 4), u32::MAX);
    }

    #[test]
    fn pcm_payload_of_canonical_file() {
        let mut file = wav_header(&AudioFormat::speech(), 4).unwrap().to_vec();
        file.extend_from_slice(&[1, 2, 3, 4]);
        assert_eq!(pcm_payload(&file), Some(&[1u8, 2, 3, 4][..]));
    }

    #[test]
    fn pcm_payload_skips_extra_chunks() {
        let mut file = Vec::new();
        file.extend_from_slice(b"RIFF\0\0\0\0WAVE");
        file.extend_from_slice(b"LIST");
        file.extend_from_slice(&3u32.to_le_bytes());
        file.extend_from_slice(&[9, 9, 9, 0]); // odd size + pad byte
        file.extend_from_slice(b"data");
        file.extend_from_slice(&2u32.to_le_bytes());
        file.extend_from_slice(&[7, 8]);
        assert_eq!(pcm_payload(&file), Some(&[7u8, 8][..]));
    }

    #[test]
    fn pcm_payload_clamps_unpatched_size() {
        // A header still carrying the placeholder size from a crashed recording.
        let mut file = wav_header(&AudioFormat::speech(), u32::MAX).unwrap().to_vec();
        file.extend_from_slice(&[5, 6]);
        assert_eq!(pcm_payload(&file), Some(&[5u8, 6][..]));
    }

    #[test]
    fn pcm_payload_rejects_non_wave() {
        assert_eq!(pcm_payload(b"not a wav file at all"), None);
        assert_eq!(pcm_payload(b""), None);
    }

    #[test]
    fn riff_size_counts_header_remainder() {
        assert_eq!(riff_size(0), 36);
        assert_eq!(riff_size(16000), 16036);
    }
}
