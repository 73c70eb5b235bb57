use std::sync::Arc;

use crate::models::audio_models::AudioFormat;
use crate::models::error::DeviceStatus;
use crate::processing::buffer_pool::CaptureBuffer;

/// Callback invoked by the platform input when a buffer has been filled.
///
/// Parameters:
/// - `buffer`: the buffer that was filled; ownership returns to the caller.
/// - `packets`: number of complete packets in `buffer.filled()`.
/// - `queue`: the queue the buffer came from, for re-submitting it.
///
/// Runs on the platform's audio thread. Keep the work minimal.
pub type FillCallback = Arc<dyn Fn(CaptureBuffer, u32, &dyn BufferQueue) + Send + Sync + 'static>;

/// A buffer the input queue refused, handed back together with the status.
#[derive(Debug)]
pub struct EnqueueError {
    pub buffer: CaptureBuffer,
    pub status: DeviceStatus,
}

/// Submission side of a platform input queue.
pub trait BufferQueue {
    /// Hand `buffer` to the platform for filling.
    ///
    /// On failure the buffer is returned inside the error so it is never lost.
    fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError>;
}

/// Platform audio input queue that fills caller-provided buffers.
///
/// Lifecycle: `open` → `enqueue`* → `start` → `stop` → `dispose`.
/// Every buffer enqueued is delivered back exactly once through the
/// `FillCallback`, unless the queue is disposed while holding it.
pub trait AudioInput: BufferQueue + Send {
    /// Create the queue for `format`, registering the fill callback.
    fn open(&mut self, format: &AudioFormat, callback: FillCallback) -> Result<(), DeviceStatus>;

    /// Begin capturing into enqueued buffers.
    fn start(&mut self) -> Result<(), DeviceStatus>;

    /// Halt capture. With `drain`, a partially filled buffer is delivered
    /// through the callback before this returns; otherwise it is discarded.
    fn stop(&mut self, drain: bool) -> Result<(), DeviceStatus>;

    /// Release the queue and any buffers it still holds.
    fn dispose(&mut self) -> Result<(), DeviceStatus>;

    /// Human-readable name of the backing device.
    fn device_name(&self) -> String;
}
