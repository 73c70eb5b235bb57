use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Default duration of audio each capture buffer holds.
pub const DEFAULT_BUFFER_SECONDS: f64 = 0.5;

/// Largest capture buffer the engine will allocate.
pub const MAX_BUFFER_BYTES: usize = u32::MAX as usize;

/// Linear PCM stream description.
///
/// One frame per packet, so packet and frame sizes are always equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz.
    pub sample_rate: f64,
    pub channels: u16,
    /// Valid values: 8, 16, 24, 32.
    pub bits_per_channel: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: f64, channels: u16, bits_per_channel: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_channel,
        }
    }

    /// 16 kHz, mono, 16-bit: the format the recognizer expects.
    pub fn speech() -> Self {
        Self::new(16000.0, 1, 16)
    }

    pub fn frames_per_packet(&self) -> u32 {
        1
    }

    pub fn bytes_per_frame(&self) -> u32 {
        self.channels as u32 * (self.bits_per_channel as u32 / 8)
    }

    pub fn bytes_per_packet(&self) -> u32 {
        self.bytes_per_frame() * self.frames_per_packet()
    }

    /// Bytes per second, if it fits the 32-bit WAV header field.
    pub fn byte_rate(&self) -> Option<u32> {
        let rate = self.sample_rate;
        if !rate.is_finite() || rate < 0.0 || rate > u32::MAX as f64 {
            return None;
        }
        (self.sample_rate as u32).checked_mul(self.bytes_per_frame())
    }

    /// Bytes per frame, if it fits the 16-bit WAV header field.
    pub fn block_align(&self) -> Option<u16> {
        u16::try_from(self.bytes_per_frame()).ok()
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return Err(CaptureError::InvalidFormat(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if ![8, 16, 24, 32].contains(&self.bits_per_channel) {
            return Err(CaptureError::InvalidFormat(format!(
                "unsupported bits per channel: {}",
                self.bits_per_channel
            )));
        }
        if self.channels == 0 {
            return Err(CaptureError::InvalidFormat(
                "channel count must be at least 1".into(),
            ));
        }
        if self.block_align().is_none() {
            return Err(CaptureError::InvalidFormat(format!(
                "{} channels of {} bits exceed the maximum frame size",
                self.channels, self.bits_per_channel
            )));
        }
        if self.byte_rate().is_none() {
            return Err(CaptureError::InvalidFormat(format!(
                "byte rate of {} Hz x {} bytes does not fit in 32 bits",
                self.sample_rate,
                self.bytes_per_frame()
            )));
        }
        Ok(())
    }

    /// Byte size of a buffer holding `seconds` of audio.
    ///
    /// `ceil(seconds × sample_rate) × bytes_per_frame`, never smaller than one packet.
    /// Fails when `seconds` is not a positive finite number or the size
    /// exceeds `MAX_BUFFER_BYTES`.
    pub fn buffer_byte_size(&self, seconds: f64) -> Result<usize, CaptureError> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Err(CaptureError::InvalidFormat(format!(
                "buffer duration must be positive and finite, got {}",
                seconds
            )));
        }
        let frames = (seconds * self.sample_rate).ceil().max(1.0);
        let too_large = || {
            CaptureError::InvalidFormat(format!(
                "{} s buffer at {} Hz exceeds {} bytes",
                seconds, self.sample_rate, MAX_BUFFER_BYTES
            ))
        };
        if !frames.is_finite() || frames > MAX_BUFFER_BYTES as f64 {
            return Err(too_large());
        }
        (frames as usize)
            .checked_mul(self.bytes_per_frame() as usize)
            .filter(|&bytes| bytes <= MAX_BUFFER_BYTES)
            .ok_or_else(too_large)
    }

    /// MIME type for raw little-endian PCM in this format,
    /// e.g. `audio/L16; rate=16000; channels=1`.
    pub fn l16_content_type(&self) -> String {
        format!(
            "audio/L{}; rate={}; channels={}",
            self.bits_per_channel, self.sample_rate as u32, self.channels
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::speech()
    }
}

/// Counters collected by the capture callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureDiagnostics {
    pub callback_count: u64,
    pub packets_written: u64,
    pub write_errors: u64,
    pub requeue_errors: u64,
}
