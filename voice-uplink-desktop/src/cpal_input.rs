//! Microphone input via cpal.
//!
//! cpal pushes samples on its own stream thread; [`CpalInput`] converts them
//! to little-endian PCM in the requested format, copies them into the oldest
//! enqueued buffer and hands each buffer back through the fill callback as
//! soon as it is full.

use std::collections::VecDeque;
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;

use voice_uplink_core::models::audio_models::AudioFormat;
use voice_uplink_core::models::error::{
    DeviceStatus, STATUS_INVALID_STATE, STATUS_IO_ERROR, STATUS_PARAM_ERROR,
};
use voice_uplink_core::processing::buffer_pool::CaptureBuffer;
use voice_uplink_core::traits::audio_input::{AudioInput, BufferQueue, EnqueueError, FillCallback};

use crate::error::DesktopError;

/// An input device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    /// Whether the device accepts 16 kHz mono capture directly.
    pub supports_speech: bool,
}

/// List input devices of the default host.
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, DesktopError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| DesktopError::Enumerate(e.to_string()))?;

    let speech = AudioFormat::speech();
    let mut infos = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else { continue };
        infos.push(InputDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            supports_speech: matching_config(&device, &speech).is_ok(),
            name,
        });
    }
    Ok(infos)
}

/// Wrapper making `cpal::Stream` Send.
///
/// SAFETY: the stream is created, played, paused and dropped only through
/// `&mut CpalInput`, so it is never touched from two threads at once.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Buffers waiting to be filled plus the callback that receives them.
#[derive(Default)]
struct QueueState {
    buffers: VecDeque<CaptureBuffer>,
    callback: Option<FillCallback>,
    bytes_per_packet: usize,
    /// Accepting buffers (between open and dispose).
    open: bool,
    /// Copying samples into buffers (between start and stop).
    active: bool,
    /// Bytes captured while no buffer was enqueued.
    overrun_bytes: u64,
}

/// Queue shared with the cpal stream thread.
#[derive(Default)]
struct InputQueue {
    state: Mutex<QueueState>,
}

impl InputQueue {
    fn reset(&self, callback: Option<FillCallback>, bytes_per_packet: usize, open: bool) {
        let mut s = self.state.lock();
        s.buffers.clear();
        s.callback = callback;
        s.bytes_per_packet = bytes_per_packet.max(1);
        s.open = open;
        s.active = false;
        s.overrun_bytes = 0;
    }

    fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    /// Copy captured bytes into enqueued buffers, delivering every buffer that fills up.
    fn push_bytes(&self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let full = {
                let mut s = self.state.lock();
                if !s.active {
                    return;
                }
                let Some(front) = s.buffers.front_mut() else {
                    s.overrun_bytes += bytes.len() as u64;
                    return;
                };
                let taken = front.append(bytes);
                bytes = &bytes[taken..];
                if front.is_full() {
                    s.buffers.pop_front().zip(s.callback.clone())
                } else {
                    None
                }
            };
            if let Some((buffer, callback)) = full {
                self.deliver(buffer, &callback);
            }
        }
    }

    /// Hand every held buffer back, partial ones included.
    fn drain(&self) {
        let (buffers, callback) = {
            let mut s = self.state.lock();
            s.active = false;
            (std::mem::take(&mut s.buffers), s.callback.clone())
        };
        let Some(callback) = callback else { return };
        for buffer in buffers {
            self.deliver(buffer, &callback);
        }
    }

    fn deliver(&self, mut buffer: CaptureBuffer, callback: &FillCallback) {
        let bytes_per_packet = self.state.lock().bytes_per_packet;
        let packets = buffer.len() / bytes_per_packet;
        buffer.truncate(packets * bytes_per_packet);
        callback(buffer, packets as u32, self);
    }

    fn overrun_bytes(&self) -> u64 {
        self.state.lock().overrun_bytes
    }
}

impl BufferQueue for InputQueue {
    fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError> {
        let mut s = self.state.lock();
        if !s.open {
            return Err(EnqueueError {
                buffer,
                status: STATUS_INVALID_STATE,
            });
        }
        s.buffers.push_back(buffer);
        Ok(())
    }
}

/// Microphone input on a cpal device.
///
/// The stream is opened at exactly the requested rate and channel count;
/// devices that cannot do that are rejected with `STATUS_PARAM_ERROR`.
pub struct CpalInput {
    device: cpal::Device,
    device_name: String,
    queue: Arc<InputQueue>,
    stream: Option<SendableStream>,
}

impl CpalInput {
    /// Input on the host's default capture device.
    pub fn default_device() -> Result<Self, DesktopError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(DesktopError::NoDefaultDevice)?;
        Ok(Self::from_device(device))
    }

    /// Input on the capture device called `name`.
    pub fn with_device_name(name: &str) -> Result<Self, DesktopError> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| DesktopError::Enumerate(e.to_string()))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(Self::from_device(device));
            }
        }
        Err(DesktopError::DeviceNotFound(name.to_string()))
    }

    /// Named device if given, else the default.
    pub fn from_config(device: Option<&str>) -> Result<Self, DesktopError> {
        match device {
            Some(name) => Self::with_device_name(name),
            None => Self::default_device(),
        }
    }

    fn from_device(device: cpal::Device) -> Self {
        let device_name = device.name().unwrap_or_else(|_| "Unknown Device".into());
        Self {
            device,
            device_name,
            queue: Arc::new(InputQueue::default()),
            stream: None,
        }
    }

    /// Bytes dropped because no buffer was enqueued when they arrived.
    pub fn overrun_bytes(&self) -> u64 {
        self.queue.overrun_bytes()
    }
}

impl BufferQueue for CpalInput {
    fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError> {
        self.queue.enqueue(buffer)
    }
}

impl AudioInput for CpalInput {
    fn open(&mut self, format: &AudioFormat, callback: FillCallback) -> Result<(), DeviceStatus> {
        if self.stream.is_some() {
            return Err(STATUS_INVALID_STATE);
        }
        let supported = matching_config(&self.device, format)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();

        self.queue
            .reset(Some(callback), format.bytes_per_packet() as usize, true);

        let bits = format.bits_per_channel;
        let queue = Arc::clone(&self.queue);
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&self.device, &config, bits, queue),
            SampleFormat::I32 => build_stream::<i32>(&self.device, &config, bits, queue),
            SampleFormat::F32 => build_stream::<f32>(&self.device, &config, bits, queue),
            SampleFormat::U8 => build_stream::<u8>(&self.device, &config, bits, queue),
            other => {
                log::error!("unsupported sample format {:?} on {}", other, self.device_name);
                self.queue.reset(None, 1, false);
                return Err(STATUS_PARAM_ERROR);
            }
        };

        match stream {
            Ok(stream) => {
                log::debug!(
                    "opened {} at {} Hz / {} ch ({:?})",
                    self.device_name,
                    config.sample_rate.0,
                    config.channels,
                    sample_format
                );
                self.stream = Some(SendableStream(stream));
                Ok(())
            }
            Err(e) => {
                log::error!("failed to build input stream on {}: {}", self.device_name, e);
                self.queue.reset(None, 1, false);
                Err(STATUS_IO_ERROR)
            }
        }
    }

    fn start(&mut self) -> Result<(), DeviceStatus> {
        let stream = self.stream.as_ref().ok_or(STATUS_INVALID_STATE)?;
        self.queue.set_active(true);
        stream.0.play().map_err(|e| {
            log::error!("failed to start input stream: {}", e);
            self.queue.set_active(false);
            STATUS_IO_ERROR
        })
    }

    fn stop(&mut self, drain: bool) -> Result<(), DeviceStatus> {
        let mut status = Ok(());
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.0.pause() {
                log::warn!("failed to pause input stream: {}", e);
                status = Err(STATUS_IO_ERROR);
            }
            // No callbacks run once the stream is dropped.
            drop(stream);
        }
        if drain {
            self.queue.drain();
        } else {
            self.queue.set_active(false);
        }
        status
    }

    fn dispose(&mut self) -> Result<(), DeviceStatus> {
        self.stream = None;
        let overrun = self.queue.overrun_bytes();
        if overrun > 0 {
            log::warn!("{} captured bytes dropped with no buffer enqueued", overrun);
        }
        self.queue.reset(None, 1, false);
        Ok(())
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }
}

/// Pick a supported config with the exact rate and channel count of `format`.
///
/// Sample formats are preferred in the order i16, i32, f32, u8.
fn matching_config(
    device: &cpal::Device,
    format: &AudioFormat,
) -> Result<cpal::SupportedStreamConfig, DeviceStatus> {
    let rate = cpal::SampleRate(format.sample_rate as u32);
    let ranges = device.supported_input_configs().map_err(|e| {
        log::error!("failed to query input configs: {}", e);
        STATUS_IO_ERROR
    })?;

    ranges
        .filter(|r| {
            r.channels() == format.channels
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
        })
        .filter_map(|r| format_rank(r.sample_format()).map(|rank| (rank, r)))
        .min_by_key(|(rank, _)| *rank)
        .map(|(_, r)| r.with_sample_rate(rate))
        .ok_or(STATUS_PARAM_ERROR)
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::I32 => Some(1),
        SampleFormat::F32 => Some(2),
        SampleFormat::U8 => Some(3),
        _ => None,
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bits: u16,
    queue: Arc<InputQueue>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + Send + 'static,
    u8: FromSample<T>,
    i16: FromSample<T>,
    i32: FromSample<T>,
{
    let mut scratch = Vec::new();
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            encode_samples(data, bits, &mut scratch);
            queue.push_bytes(&scratch);
        },
        |err| log::error!("input stream error: {}", err),
        None,
    )
}

/// Convert device samples to little-endian PCM with `bits` per sample.
///
/// 8-bit output is unsigned (WAV convention); wider output is signed.
fn encode_samples<T>(data: &[T], bits: u16, out: &mut Vec<u8>)
where
    T: Sample,
    u8: FromSample<T>,
    i16: FromSample<T>,
    i32: FromSample<T>,
{
    out.clear();
    out.reserve(data.len() * (bits as usize / 8));
    for &sample in data {
        match bits {
            8 => out.push(u8::from_sample(sample)),
            16 => out.extend_from_slice(&i16::from_sample(sample).to_le_bytes()),
            24 => out.extend_from_slice(&(i32::from_sample(sample) >> 8).to_le_bytes()[..3]),
            _ => out.extend_from_slice(&i32::from_sample(sample).to_le_bytes()),
        }
    }
}
