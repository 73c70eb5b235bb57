use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioFormat, CaptureDiagnostics, DEFAULT_BUFFER_SECONDS};
use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::CaptureState;
use crate::processing::buffer_pool::{BufferPool, CaptureBuffer, SlotState};
use crate::storage::wav_sink::WavSinkProvider;
use crate::traits::audio_input::{AudioInput, BufferQueue, EnqueueError, FillCallback};
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::packet_sink::{PacketSink, SinkProvider};

/// Tunables for the capture buffer pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    /// Number of buffers kept in flight with the input queue.
    pub buffer_count: usize,
    /// Seconds of audio each buffer holds.
    pub buffer_seconds: f64,
    /// Deliver the partially filled buffer when stopping instead of discarding it.
    pub drain_on_stop: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            buffer_count: 1,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            drain_on_stop: true,
        }
    }
}

impl CaptureOptions {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.buffer_count == 0 {
            return Err(CaptureError::InvalidFormat("buffer count must be at least 1".into()));
        }
        if !self.buffer_seconds.is_finite() || self.buffer_seconds <= 0.0 {
            return Err(CaptureError::InvalidFormat(format!(
                "buffer duration must be positive and finite, got {}",
                self.buffer_seconds
            )));
        }
        Ok(())
    }
}

/// State shared between the controller and the platform capture thread.
struct CaptureShared {
    /// Sole control signal: read before every re-submit, cleared first on stop.
    running: AtomicBool,
    packet_cursor: AtomicI64,
    bytes_per_packet: usize,
    sink: Mutex<Option<Box<dyn PacketSink>>>,
    pool: Mutex<BufferPool>,
    delegate: Option<Arc<dyn CaptureDelegate>>,

    callback_count: AtomicU64,
    packets_written: AtomicU64,
    write_errors: AtomicU64,
    requeue_errors: AtomicU64,
}

impl CaptureShared {
    fn new(
        format: &AudioFormat,
        sink: Box<dyn PacketSink>,
        pool: BufferPool,
        delegate: Option<Arc<dyn CaptureDelegate>>,
    ) -> Self {
        Self {
            running: AtomicBool::new(false),
            packet_cursor: AtomicI64::new(0),
            bytes_per_packet: format.bytes_per_packet() as usize,
            sink: Mutex::new(Some(sink)),
            pool: Mutex::new(pool),
            delegate,
            callback_count: AtomicU64::new(0),
            packets_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            requeue_errors: AtomicU64::new(0),
        }
    }

    /// Capture callback body. Runs on the platform audio thread.
    fn on_buffer_filled(&self, mut buffer: CaptureBuffer, packets: u32, queue: &dyn BufferQueue) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
        let slot = buffer.slot();
        if let Err(e) = self.pool.lock().mark_filled(slot) {
            log::error!("capture callback: {}", e);
        }

        let sink_closed = {
            let mut guard = self.sink.lock();
            match guard.as_mut() {
                None => true,
                Some(sink) => {
                    self.write(sink.as_mut(), &buffer, packets);
                    false
                }
            }
        };
        if sink_closed {
            // The recording is over and the cursor stays put.
            log::debug!("late buffer for slot {} after sink close", slot);
            self.return_to_pool(buffer);
            return;
        }

        if !self.running.load(Ordering::SeqCst) {
            self.return_to_pool(buffer);
            return;
        }

        buffer.clear();
        if let Err(e) = self.pool.lock().mark_requeued(slot) {
            log::error!("capture callback: {}", e);
        }
        if let Err(EnqueueError { buffer, status }) = queue.enqueue(buffer) {
            self.requeue_errors.fetch_add(1, Ordering::Relaxed);
            log::error!("failed to re-submit buffer {} (status {})", slot, status);
            self.report(&CaptureError::DeviceError(status));
            self.return_to_pool(buffer);
        }
    }

    /// Append `packets` from `buffer` at the cursor, advancing it on success.
    fn write(&self, sink: &mut dyn PacketSink, buffer: &CaptureBuffer, packets: u32) {
        if packets == 0 {
            return;
        }
        let at = self.packet_cursor.load(Ordering::SeqCst);
        match sink.write_packets(buffer.filled(), packets, at) {
            Ok(()) => {
                self.packet_cursor.fetch_add(packets as i64, Ordering::SeqCst);
                self.packets_written.fetch_add(packets as u64, Ordering::Relaxed);
            }
            Err(e) => {
                self.write_errors.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "failed to write {} packets ({} bytes) at packet {}: {}",
                    packets,
                    packets as usize * self.bytes_per_packet,
                    at,
                    e
                );
                self.report(&e);
            }
        }
    }

    fn return_to_pool(&self, buffer: CaptureBuffer) {
        if let Err(e) = self.pool.lock().restore(buffer) {
            log::error!("capture callback: {}", e);
        }
    }

    fn report(&self, error: &CaptureError) {
        if let Some(ref delegate) = self.delegate {
            delegate.on_error(error);
        }
    }

    fn diagnostics(&self) -> CaptureDiagnostics {
        CaptureDiagnostics {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            packets_written: self.packets_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            requeue_errors: self.requeue_errors.load(Ordering::Relaxed),
        }
    }
}

/// Streaming capture engine.
///
/// Keeps a small pool of buffers cycling through the platform input queue
/// and appends every delivered packet to a sink at a monotonically advancing
/// packet cursor.
///
/// ```text
/// [AudioInput] ──fill──→ callback ──write_packets──→ [PacketSink]
///      ↑                    │
///      └──── re-submit ─────┘   (only while running)
/// ```
pub struct CaptureEngine<I: AudioInput> {
    input: I,
    sinks: Box<dyn SinkProvider>,
    options: CaptureOptions,
    delegate: Option<Arc<dyn CaptureDelegate>>,

    state: CaptureState,
    format: Option<AudioFormat>,
    sink_path: Option<PathBuf>,
    buffer_byte_size: usize,

    /// Sink opened by `configure`, handed to the session on `start`.
    pending_sink: Option<Box<dyn PacketSink>>,
    shared: Option<Arc<CaptureShared>>,
    last_recording: Option<RecordingSummary>,
}

impl<I: AudioInput> CaptureEngine<I> {
    /// Engine recording to WAV files.
    pub fn new(input: I) -> Self {
        Self::with_sink_provider(input, Box::new(WavSinkProvider))
    }

    pub fn with_sink_provider(input: I, sinks: Box<dyn SinkProvider>) -> Self {
        Self {
            input,
            sinks,
            options: CaptureOptions::default(),
            delegate: None,
            state: CaptureState::Unconfigured,
            format: None,
            sink_path: None,
            buffer_byte_size: 0,
            pending_sink: None,
            shared: None,
            last_recording: None,
        }
    }

    pub fn with_options(mut self, options: CaptureOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace buffer tunables. Takes effect on the next `configure`.
    pub fn set_options(&mut self, options: CaptureOptions) {
        self.options = options;
    }

    /// Set the delegate. The capture callback uses the one present at `start`.
    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn format(&self) -> Option<&AudioFormat> {
        self.format.as_ref()
    }

    pub fn sink_path(&self) -> Option<&Path> {
        self.sink_path.as_deref()
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    /// Packets written so far in the current (or last) recording.
    pub fn packet_cursor(&self) -> i64 {
        self.shared
            .as_ref()
            .map(|s| s.packet_cursor.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Capacity of each capture buffer, fixed by `configure`.
    pub fn buffer_byte_size(&self) -> usize {
        self.buffer_byte_size
    }

    pub fn last_recording(&self) -> Option<&RecordingSummary> {
        self.last_recording.as_ref()
    }

    pub fn diagnostics(&self) -> CaptureDiagnostics {
        self.shared.as_ref().map(|s| s.diagnostics()).unwrap_or_default()
    }

    /// Slot states of the live pool; empty before the first `start`.
    pub fn pool_states(&self) -> Vec<SlotState> {
        self.shared
            .as_ref()
            .map(|s| s.pool.lock().states())
            .unwrap_or_default()
    }

    /// Prepare a recording. Transitions: unconfigured/stopped → configured.
    ///
    /// Opens (truncating) the sink at `sink_path` and sizes the buffers.
    pub fn configure(
        &mut self,
        format: AudioFormat,
        sink_path: impl AsRef<Path>,
    ) -> Result<(), CaptureError> {
        if !self.state.accepts_configure() {
            return Err(match self.state {
                CaptureState::Recording => CaptureError::Busy,
                _ => CaptureError::SetupIncomplete,
            });
        }

        format.validate()?;
        self.options.validate()?;

        let buffer_byte_size = format.buffer_byte_size(self.options.buffer_seconds)?;

        let sink_path = sink_path.as_ref().to_path_buf();
        let sink = self.sinks.open(&sink_path, &format)?;

        self.buffer_byte_size = buffer_byte_size;
        self.format = Some(format);
        self.sink_path = Some(sink_path);
        self.pending_sink = Some(sink);
        self.shared = None;
        self.last_recording = None;

        log::debug!(
            "configured {} Hz / {} ch / {} bit, {} x {} byte buffers",
            format.sample_rate,
            format.channels,
            format.bits_per_channel,
            self.options.buffer_count,
            self.buffer_byte_size
        );
        self.set_state(CaptureState::Configured);
        Ok(())
    }

    /// Discard configuration. Transitions: configured/stopped → unconfigured.
    ///
    /// An unused sink is closed, leaving an empty recording on disk.
    pub fn reset(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::Recording => return Err(CaptureError::Busy),
            CaptureState::Unconfigured => return Ok(()),
            CaptureState::Configured | CaptureState::Stopped => {}
        }

        if let Some(mut sink) = self.pending_sink.take() {
            if let Err(e) = sink.close() {
                log::warn!("failed to close unused sink: {}", e);
            }
        }
        self.format = None;
        self.sink_path = None;
        self.buffer_byte_size = 0;
        self.shared = None;
        self.last_recording = None;
        self.set_state(CaptureState::Unconfigured);
        Ok(())
    }

    /// Begin capturing. Transitions: configured → recording.
    ///
    /// On failure every step taken so far is undone and the engine stays configured.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Configured {
            return Err(CaptureError::NotConfigured);
        }
        let format = self.format.ok_or(CaptureError::NotConfigured)?;
        let sink = self.pending_sink.take().ok_or(CaptureError::NotConfigured)?;

        let pool = BufferPool::new(self.options.buffer_count, self.buffer_byte_size);
        let shared = Arc::new(CaptureShared::new(&format, sink, pool, self.delegate.clone()));

        let callback: FillCallback = {
            let shared = Arc::clone(&shared);
            Arc::new(move |buffer: CaptureBuffer, packets: u32, queue: &dyn BufferQueue| {
                shared.on_buffer_filled(buffer, packets, queue)
            })
        };

        if let Err(status) = self.input.open(&format, callback) {
            self.pending_sink = shared.sink.lock().take();
            return Err(CaptureError::DeviceError(status));
        }

        // Running before submission, so the first delivery already re-submits.
        shared.running.store(true, Ordering::SeqCst);

        let lent = shared.pool.lock().lend_all();
        let buffers = match lent {
            Ok(buffers) => buffers,
            Err(e) => {
                self.roll_back(&shared);
                return Err(e);
            }
        };

        let mut buffers = buffers.into_iter();
        while let Some(buffer) = buffers.next() {
            if let Err(EnqueueError { buffer, status }) = self.input.enqueue(buffer) {
                {
                    let mut pool = shared.pool.lock();
                    for b in std::iter::once(buffer).chain(buffers.by_ref()) {
                        if let Err(e) = pool.restore(b) {
                            log::warn!("rollback: {}", e);
                        }
                    }
                }
                self.roll_back(&shared);
                return Err(CaptureError::DeviceError(status));
            }
        }

        if let Err(status) = self.input.start() {
            self.roll_back(&shared);
            return Err(CaptureError::DeviceError(status));
        }

        log::debug!("capture started on {}", self.input.device_name());
        self.shared = Some(shared);
        self.set_state(CaptureState::Recording);
        Ok(())
    }

    /// Stop capturing and finalize the sink. Transitions: recording → stopped.
    ///
    /// Every teardown step runs even if an earlier one fails; the first
    /// failure is returned and the engine ends up stopped either way.
    /// Calling again once stopped returns the same summary.
    pub fn stop(&mut self) -> Result<RecordingSummary, CaptureError> {
        match self.state {
            CaptureState::Stopped => {
                return self.last_recording.clone().ok_or(CaptureError::NotRecording);
            }
            CaptureState::Recording => {}
            CaptureState::Unconfigured | CaptureState::Configured => {
                return Err(CaptureError::NotRecording);
            }
        }
        let shared = self.shared.clone().ok_or(CaptureError::NotRecording)?;
        let format = self.format.ok_or(CaptureError::NotRecording)?;

        shared.running.store(false, Ordering::SeqCst);

        let mut first_error: Option<CaptureError> = None;

        if let Err(status) = self.input.stop(self.options.drain_on_stop) {
            log::warn!("input stop failed (status {})", status);
            first_error.get_or_insert(CaptureError::DeviceError(status));
        }
        if let Err(status) = self.input.dispose() {
            log::warn!("input dispose failed (status {})", status);
            first_error.get_or_insert(CaptureError::DeviceError(status));
        }

        let sink = shared.sink.lock().take();
        let checksum = match sink {
            Some(mut sink) => match sink.close() {
                Ok(report) => report.checksum,
                Err(e) => {
                    log::warn!("sink close failed: {}", e);
                    first_error.get_or_insert(e);
                    None
                }
            },
            None => None,
        };

        let summary = RecordingSummary::new(
            self.sink_path.clone().unwrap_or_default(),
            format,
            shared.packet_cursor.load(Ordering::SeqCst),
            checksum,
        );
        log::debug!(
            "capture stopped: {} packets, {:.2}s, {:?}",
            summary.packets_written,
            summary.duration_secs,
            shared.diagnostics()
        );

        self.last_recording = Some(summary.clone());
        self.set_state(CaptureState::Stopped);

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn roll_back(&mut self, shared: &CaptureShared) {
        shared.running.store(false, Ordering::SeqCst);
        if let Err(status) = self.input.stop(false) {
            log::warn!("rollback: input stop failed (status {})", status);
        }
        if let Err(status) = self.input.dispose() {
            log::warn!("rollback: input dispose failed (status {})", status);
        }
        self.pending_sink = shared.sink.lock().take();
    }

    fn set_state(&mut self, state: CaptureState) {
        log::debug!("capture state: {} → {}", self.state, state);
        self.state = state;
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(state);
        }
    }
}

impl<I: AudioInput> Drop for CaptureEngine<I> {
    fn drop(&mut self) {
        if self.state.is_recording() {
            if let Err(e) = self.stop() {
                log::warn!("stop on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::error::{DeviceStatus, STATUS_INVALID_STATE, STATUS_IO_ERROR};
    use crate::models::recording_result::SinkReport;
    use std::collections::VecDeque;

    // --- Scripted input queue ---

    #[derive(Default)]
    struct Script {
        queue: VecDeque<CaptureBuffer>,
        callback: Option<FillCallback>,
        bytes_per_packet: usize,
        /// Captured bytes not yet delivered, flushed by a draining stop.
        pending: Vec<u8>,
        open_status: Option<DeviceStatus>,
        reject_enqueue: Option<DeviceStatus>,
        stop_status: Option<DeviceStatus>,
        started: bool,
        disposed: bool,
    }

    #[derive(Clone, Default)]
    struct ScriptedInput {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedInput {
        /// Fill the oldest enqueued buffer with `bytes` and deliver it.
        fn deliver(&self, bytes: &[u8]) -> bool {
            let (mut buffer, callback, bpp) = {
                let mut s = self.script.lock();
                match (s.queue.pop_front(), s.callback.clone()) {
                    (Some(buffer), Some(callback)) => (buffer, callback, s.bytes_per_packet),
                    _ => return false,
                }
            };
            buffer.append(bytes);
            let packets = buffer.len() / bpp;
            buffer.truncate(packets * bpp);
            callback(buffer, packets as u32, self);
            true
        }

        fn queued(&self) -> usize {
            self.script.lock().queue.len()
        }
    }

    impl BufferQueue for ScriptedInput {
        fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError> {
            let mut s = self.script.lock();
            if let Some(status) = s.reject_enqueue {
                return Err(EnqueueError { buffer, status });
            }
            s.queue.push_back(buffer);
            Ok(())
        }
    }

    impl AudioInput for ScriptedInput {
        fn open(
            &mut self,
            format: &AudioFormat,
            callback: FillCallback,
        ) -> Result<(), DeviceStatus> {
            let mut s = self.script.lock();
            if let Some(status) = s.open_status {
                return Err(status);
            }
            s.callback = Some(callback);
            s.bytes_per_packet = format.bytes_per_packet() as usize;
            s.disposed = false;
            Ok(())
        }

        fn start(&mut self) -> Result<(), DeviceStatus> {
            self.script.lock().started = true;
            Ok(())
        }

        fn stop(&mut self, drain: bool) -> Result<(), DeviceStatus> {
            let (pending, status) = {
                let mut s = self.script.lock();
                s.started = false;
                (std::mem::take(&mut s.pending), s.stop_status)
            };
            if drain && !pending.is_empty() {
                self.deliver(&pending);
            }
            status.map_or(Ok(()), Err)
        }

        fn dispose(&mut self) -> Result<(), DeviceStatus> {
            let mut s = self.script.lock();
            s.disposed = true;
            s.queue.clear();
            s.callback = None;
            Ok(())
        }

        fn device_name(&self) -> String {
            "scripted".into()
        }
    }

    // --- In-memory sink ---

    #[derive(Default)]
    struct SinkLog {
        writes: Vec<(i64, u32, Vec<u8>)>,
        closed: usize,
        fail_writes: bool,
    }

    struct MemorySink {
        log: Arc<Mutex<SinkLog>>,
    }

    impl PacketSink for MemorySink {
        fn write_packets(
            &mut self,
            bytes: &[u8],
            packet_count: u32,
            at_packet: i64,
        ) -> Result<(), CaptureError> {
            let mut log = self.log.lock();
            if log.fail_writes {
                return Err(CaptureError::DeviceError(STATUS_IO_ERROR));
            }
            log.writes.push((at_packet, packet_count, bytes.to_vec()));
            Ok(())
        }

        fn close(&mut self) -> Result<SinkReport, CaptureError> {
            let mut log = self.log.lock();
            log.closed += 1;
            let data_bytes = log.writes.iter().map(|(_, _, b)| b.len() as u64).sum();
            Ok(SinkReport {
                data_bytes,
                checksum: Some("memory".into()),
            })
        }
    }

    #[derive(Default)]
    struct MemorySinks {
        log: Arc<Mutex<SinkLog>>,
        fail_open: bool,
    }

    impl SinkProvider for MemorySinks {
        fn open(
            &self,
            path: &Path,
            _format: &AudioFormat,
        ) -> Result<Box<dyn PacketSink>, CaptureError> {
            if self.fail_open {
                return Err(CaptureError::SinkOpenFailed(path.display().to_string()));
            }
            Ok(Box::new(MemorySink {
                log: Arc::clone(&self.log),
            }))
        }
    }

    #[derive(Default)]
    struct RecordingDelegate {
        states: Mutex<Vec<CaptureState>>,
        errors: Mutex<Vec<CaptureError>>,
    }

    impl CaptureDelegate for RecordingDelegate {
        fn on_state_changed(&self, state: CaptureState) {
            self.states.lock().push(state);
        }

        fn on_error(&self, error: &CaptureError) {
            self.errors.lock().push(error.clone());
        }
    }

    /// 16 frames of speech audio per buffer = 32 bytes.
    fn small_buffers(count: usize) -> CaptureOptions {
        CaptureOptions {
            buffer_count: count,
            buffer_seconds: 0.001,
            drain_on_stop: true,
        }
    }

    struct Harness {
        engine: CaptureEngine<ScriptedInput>,
        input: ScriptedInput,
        sink_log: Arc<Mutex<SinkLog>>,
        delegate: Arc<RecordingDelegate>,
    }

    fn harness(options: CaptureOptions) -> Harness {
        let input = ScriptedInput::default();
        let sinks = MemorySinks::default();
        let sink_log = Arc::clone(&sinks.log);
        let delegate = Arc::new(RecordingDelegate::default());
        let mut engine =
            CaptureEngine::with_sink_provider(input.clone(), Box::new(sinks)).with_options(options);
        engine.set_delegate(delegate.clone());
        Harness {
            engine,
            input,
            sink_log,
            delegate,
        }
    }

    fn recording(options: CaptureOptions) -> Harness {
        let mut h = harness(options);
        h.engine.configure(AudioFormat::speech(), "take.wav").unwrap();
        h.engine.start().unwrap();
        h
    }

    #[test]
    fn start_before_configure_is_not_configured() {
        let mut h = harness(small_buffers(1));
        assert_eq!(h.engine.start(), Err(CaptureError::NotConfigured));
        assert_eq!(h.engine.state(), CaptureState::Unconfigured);
    }

    #[test]
    fn configure_twice_requires_reset() {
        let mut h = harness(small_buffers(1));
        h.engine.configure(AudioFormat::speech(), "a.wav").unwrap();
        assert_eq!(
            h.engine.configure(AudioFormat::speech(), "b.wav"),
            Err(CaptureError::SetupIncomplete)
        );

        h.engine.reset().unwrap();
        assert_eq!(h.sink_log.lock().closed, 1);
        assert_eq!(h.engine.state(), CaptureState::Unconfigured);
        h.engine.configure(AudioFormat::speech(), "b.wav").unwrap();
    }

    #[test]
    fn configure_while_recording_is_busy() {
        let mut h = recording(small_buffers(1));
        assert_eq!(h.engine.configure(AudioFormat::speech(), "x.wav"), Err(CaptureError::Busy));
        assert_eq!(h.engine.reset(), Err(CaptureError::Busy));
        assert!(h.engine.state().is_recording());
    }

    #[test]
    fn configure_rejects_invalid_format_and_sink_failures() {
        let mut h = harness(small_buffers(1));
        assert!(matches!(
            h.engine.configure(AudioFormat::new(16000.0, 1, 12), "a.wav"),
            Err(CaptureError::InvalidFormat(_))
        ));

        let sinks = MemorySinks {
            fail_open: true,
            ..Default::default()
        };
        let mut engine =
            CaptureEngine::with_sink_provider(ScriptedInput::default(), Box::new(sinks));
        assert!(matches!(
            engine.configure(AudioFormat::speech(), "a.wav"),
            Err(CaptureError::SinkOpenFailed(_))
        ));
        assert_eq!(engine.state(), CaptureState::Unconfigured);
    }

    #[test]
    fn configure_rejects_buffers_that_cannot_be_allocated() {
        for seconds in [f64::INFINITY, 1.0e300] {
            let mut h = harness(CaptureOptions {
                buffer_seconds: seconds,
                ..small_buffers(1)
            });
            assert!(matches!(
                h.engine.configure(AudioFormat::speech(), "a.wav"),
                Err(CaptureError::InvalidFormat(_))
            ));
            assert_eq!(h.engine.state(), CaptureState::Unconfigured);
        }

        let mut h = harness(small_buffers(1));
        assert!(matches!(
            h.engine.configure(AudioFormat::new(1.0e12, 1, 16), "a.wav"),
            Err(CaptureError::InvalidFormat(_))
        ));
    }

    #[test]
    fn default_buffers_hold_half_a_second() {
        let sinks = MemorySinks::default();
        let mut engine =
            CaptureEngine::with_sink_provider(ScriptedInput::default(), Box::new(sinks));
        engine.configure(AudioFormat::speech(), "a.wav").unwrap();
        assert_eq!(engine.buffer_byte_size(), 16000);
    }

    #[test]
    fn start_enqueues_every_buffer() {
        let h = recording(small_buffers(3));
        assert_eq!(h.engine.buffer_byte_size(), 32);
        assert_eq!(h.input.queued(), 3);
        assert_eq!(h.engine.pool_states(), vec![SlotState::Enqueued; 3]);
        assert!(h.input.script.lock().started);
    }

    #[test]
    fn delivered_packets_advance_cursor_and_buffer_is_resubmitted() {
        let h = recording(small_buffers(1));

        assert!(h.input.deliver(&[1u8; 32]));
        assert_eq!(h.engine.packet_cursor(), 16);
        assert_eq!(h.input.queued(), 1);
        assert_eq!(h.engine.pool_states(), vec![SlotState::Enqueued]);

        assert!(h.input.deliver(&[2u8; 10]));
        assert_eq!(h.engine.packet_cursor(), 21);

        let log = h.sink_log.lock();
        assert_eq!(log.writes.len(), 2);
        assert_eq!(log.writes[0].0, 0);
        assert_eq!(log.writes[0].1, 16);
        assert_eq!(log.writes[1].0, 16);
        assert_eq!(log.writes[1].2, vec![2u8; 10]);
    }

    #[test]
    fn resubmitted_buffers_come_back_empty() {
        let h = recording(small_buffers(1));
        h.input.deliver(&[7u8; 32]);
        assert!(h.input.script.lock().queue[0].is_empty());
    }

    #[test]
    fn empty_delivery_writes_nothing_but_requeues() {
        let h = recording(small_buffers(1));
        assert!(h.input.deliver(&[]));
        assert_eq!(h.engine.packet_cursor(), 0);
        assert!(h.sink_log.lock().writes.is_empty());
        assert_eq!(h.input.queued(), 1);
        assert_eq!(h.engine.diagnostics().callback_count, 1);
    }

    #[test]
    fn stop_drains_partial_buffer_and_returns_pool_home() {
        let mut h = recording(small_buffers(1));
        h.input.deliver(&[1u8; 32]);
        h.input.script.lock().pending = vec![3, 0, 4, 0];

        let summary = h.engine.stop().unwrap();
        assert_eq!(summary.packets_written, 18);
        assert_eq!(summary.bytes_written, 36);
        assert_eq!(summary.checksum.as_deref(), Some("memory"));
        assert_eq!(summary.file_path, PathBuf::from("take.wav"));

        assert_eq!(h.engine.state(), CaptureState::Stopped);
        assert_eq!(h.engine.pool_states(), vec![SlotState::Free]);
        assert!(h.input.script.lock().disposed);
        assert_eq!(h.sink_log.lock().closed, 1);
        assert_eq!(
            *h.delegate.states.lock(),
            vec![CaptureState::Configured, CaptureState::Recording, CaptureState::Stopped]
        );
    }

    #[test]
    fn stop_without_drain_discards_partial_buffer() {
        let mut h = recording(CaptureOptions {
            drain_on_stop: false,
            ..small_buffers(1)
        });
        h.input.deliver(&[1u8; 32]);
        h.input.script.lock().pending = vec![3, 0, 4, 0];

        let summary = h.engine.stop().unwrap();
        assert_eq!(summary.packets_written, 16);
        assert_eq!(h.sink_log.lock().writes.len(), 1);
    }

    #[test]
    fn cursor_is_frozen_after_stop() {
        let mut h = recording(small_buffers(1));
        h.input.deliver(&[1u8; 32]);
        let callback = h.input.script.lock().callback.clone().unwrap();
        h.engine.stop().unwrap();
        let frozen = h.engine.packet_cursor();

        // A late delivery from the platform after teardown.
        let mut stray = BufferPool::new(1, 32).lend(0).unwrap();
        stray.append(&[9u8; 32]);
        callback(stray, 16, &h.input);

        assert_eq!(h.engine.packet_cursor(), frozen);
        assert_eq!(h.sink_log.lock().writes.len(), 1);
        assert_eq!(h.input.queued(), 0);
    }

    #[test]
    fn stop_twice_returns_the_same_summary() {
        let mut h = recording(small_buffers(1));
        h.input.deliver(&[1u8; 32]);

        let first = h.engine.stop().unwrap();
        let second = h.engine.stop().unwrap();
        assert_eq!(first, second);
        assert_eq!(h.sink_log.lock().closed, 1);
        assert_eq!(h.engine.last_recording(), Some(&first));
    }

    #[test]
    fn stop_when_not_recording_fails() {
        let mut h = harness(small_buffers(1));
        assert_eq!(h.engine.stop(), Err(CaptureError::NotRecording));
        h.engine.configure(AudioFormat::speech(), "a.wav").unwrap();
        assert_eq!(h.engine.stop(), Err(CaptureError::NotRecording));
    }

    #[test]
    fn teardown_failure_still_stops_and_closes() {
        let mut h = recording(small_buffers(1));
        h.input.script.lock().stop_status = Some(STATUS_IO_ERROR);

        assert_eq!(h.engine.stop(), Err(CaptureError::DeviceError(STATUS_IO_ERROR)));
        assert_eq!(h.engine.state(), CaptureState::Stopped);
        assert!(h.input.script.lock().disposed);
        assert_eq!(h.sink_log.lock().closed, 1);
        assert!(h.engine.last_recording().is_some());
    }

    #[test]
    fn write_failure_is_reported_and_capture_continues() {
        let h = recording(small_buffers(1));
        h.sink_log.lock().fail_writes = true;
        h.input.deliver(&[1u8; 32]);

        assert_eq!(h.engine.packet_cursor(), 0);
        assert_eq!(
            *h.delegate.errors.lock(),
            vec![CaptureError::DeviceError(STATUS_IO_ERROR)]
        );
        assert_eq!(h.engine.diagnostics().write_errors, 1);
        assert_eq!(h.input.queued(), 1);
        assert!(h.engine.state().is_recording());
    }

    #[test]
    fn resubmit_failure_returns_buffer_to_pool() {
        let h = recording(small_buffers(1));
        h.input.script.lock().reject_enqueue = Some(STATUS_INVALID_STATE);
        h.input.deliver(&[1u8; 32]);

        assert_eq!(h.engine.packet_cursor(), 16);
        assert_eq!(
            *h.delegate.errors.lock(),
            vec![CaptureError::DeviceError(STATUS_INVALID_STATE)]
        );
        assert_eq!(h.engine.pool_states(), vec![SlotState::Free]);
        assert_eq!(h.engine.diagnostics().requeue_errors, 1);
    }

    #[test]
    fn open_failure_leaves_engine_configured() {
        let mut h = harness(small_buffers(1));
        h.engine.configure(AudioFormat::speech(), "a.wav").unwrap();
        h.input.script.lock().open_status = Some(-50);

        assert_eq!(h.engine.start(), Err(CaptureError::DeviceError(-50)));
        assert_eq!(h.engine.state(), CaptureState::Configured);

        h.input.script.lock().open_status = None;
        h.engine.start().unwrap();
        assert!(h.engine.state().is_recording());
    }

    #[test]
    fn enqueue_failure_during_start_rolls_back() {
        let mut h = harness(small_buffers(2));
        h.engine.configure(AudioFormat::speech(), "a.wav").unwrap();
        h.input.script.lock().reject_enqueue = Some(STATUS_INVALID_STATE);

        assert_eq!(h.engine.start(), Err(CaptureError::DeviceError(STATUS_INVALID_STATE)));
        assert_eq!(h.engine.state(), CaptureState::Configured);
        assert!(h.input.script.lock().disposed);
        assert!(h.engine.pool_states().is_empty());
        assert_eq!(h.sink_log.lock().closed, 0);

        h.input.script.lock().reject_enqueue = None;
        h.engine.start().unwrap();
        assert_eq!(h.input.queued(), 2);
    }

    #[test]
    fn reconfigure_after_stop_starts_a_fresh_recording() {
        let mut h = recording(small_buffers(1));
        h.input.deliver(&[1u8; 32]);
        h.engine.stop().unwrap();

        h.engine.configure(AudioFormat::speech(), "second.wav").unwrap();
        assert_eq!(h.engine.packet_cursor(), 0);
        assert!(h.engine.last_recording().is_none());
        h.engine.start().unwrap();
        h.input.deliver(&[2u8; 4]);
        assert_eq!(h.engine.stop().unwrap().packets_written, 2);
    }

    #[test]
    fn records_to_wav_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let input = ScriptedInput::default();
        let mut engine = CaptureEngine::new(input.clone()).with_options(small_buffers(2));

        engine.configure(AudioFormat::speech(), &path).unwrap();
        engine.start().unwrap();
        input.deliver(&[1, 0, 2, 0]);
        input.deliver(&[3, 0]);
        let summary = engine.stop().unwrap();

        assert_eq!(summary.packets_written, 3);
        assert_eq!(summary.checksum.as_ref().map(String::len), Some(64));
        let payload = crate::storage::wav_sink::read_pcm_payload(&path).unwrap();
        assert_eq!(payload, vec![1, 0, 2, 0, 3, 0]);
    }

    #[test]
    fn dropping_a_recording_engine_finalizes_the_sink() {
        let h = recording(small_buffers(1));
        let sink_log = Arc::clone(&h.sink_log);
        drop(h);
        assert_eq!(sink_log.lock().closed, 1);
    }

    // --- Input delivering from its own thread ---

    /// Queue shared between the controller and the delivery thread.
    #[derive(Default)]
    struct Feed {
        queue: Mutex<VecDeque<CaptureBuffer>>,
        callback: Mutex<Option<FillCallback>>,
        bytes_per_packet: AtomicU64,
        halt: AtomicBool,
        deliveries: AtomicU64,
    }

    impl Feed {
        fn deliver(&self, mut buffer: CaptureBuffer, fill: bool) {
            let Some(callback) = self.callback.lock().clone() else { return };
            let bpp = self.bytes_per_packet.load(Ordering::SeqCst) as usize;
            if fill {
                while !buffer.is_full() {
                    buffer.append(&[5, 0]);
                }
            }
            let packets = buffer.len() / bpp;
            self.deliveries.fetch_add(1, Ordering::SeqCst);
            callback(buffer, packets as u32, self);
        }
    }

    impl BufferQueue for Feed {
        fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError> {
            self.queue.lock().push_back(buffer);
            Ok(())
        }
    }

    /// Fills buffers on a spawned thread as fast as they are submitted.
    #[derive(Default)]
    struct ThreadedInput {
        feed: Arc<Feed>,
        worker: Option<std::thread::JoinHandle<()>>,
    }

    impl BufferQueue for ThreadedInput {
        fn enqueue(&self, buffer: CaptureBuffer) -> Result<(), EnqueueError> {
            self.feed.enqueue(buffer)
        }
    }

    impl AudioInput for ThreadedInput {
        fn open(
            &mut self,
            format: &AudioFormat,
            callback: FillCallback,
        ) -> Result<(), DeviceStatus> {
            *self.feed.callback.lock() = Some(callback);
            self.feed
                .bytes_per_packet
                .store(format.bytes_per_packet() as u64, Ordering::SeqCst);
            self.feed.halt.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn start(&mut self) -> Result<(), DeviceStatus> {
            let feed = Arc::clone(&self.feed);
            self.worker = Some(std::thread::spawn(move || {
                while !feed.halt.load(Ordering::SeqCst) {
                    let next = feed.queue.lock().pop_front();
                    match next {
                        Some(buffer) => feed.deliver(buffer, true),
                        None => std::thread::yield_now(),
                    }
                }
            }));
            Ok(())
        }

        fn stop(&mut self, drain: bool) -> Result<(), DeviceStatus> {
            self.feed.halt.store(true, Ordering::SeqCst);
            if let Some(worker) = self.worker.take() {
                worker.join().map_err(|_| STATUS_IO_ERROR)?;
            }
            if drain {
                let held: Vec<_> = self.feed.queue.lock().drain(..).collect();
                for buffer in held {
                    self.feed.deliver(buffer, false);
                }
            }
            Ok(())
        }

        fn dispose(&mut self) -> Result<(), DeviceStatus> {
            self.feed.queue.lock().clear();
            *self.feed.callback.lock() = None;
            Ok(())
        }

        fn device_name(&self) -> String {
            "threaded".into()
        }
    }

    #[test]
    fn stop_races_callbacks_from_the_capture_thread() {
        let dir = tempfile::tempdir().unwrap();
        for round in 0..25u64 {
            let path = dir.path().join(format!("race-{}.wav", round));
            let input = ThreadedInput::default();
            let feed = Arc::clone(&input.feed);
            let mut engine = CaptureEngine::new(input).with_options(small_buffers(3));

            engine.configure(AudioFormat::speech(), &path).unwrap();
            engine.start().unwrap();
            while feed.deliveries.load(Ordering::SeqCst) < 3 + round {
                std::thread::yield_now();
            }

            let summary = engine.stop().unwrap();
            let frozen = engine.packet_cursor();
            assert_eq!(frozen, summary.packets_written);
            assert_eq!(engine.diagnostics().packets_written, summary.packets_written as u64);
            assert_eq!(engine.pool_states(), vec![SlotState::Free; 3]);

            std::thread::sleep(std::time::Duration::from_millis(1));
            assert_eq!(engine.packet_cursor(), frozen);

            let payload = crate::storage::wav_sink::read_pcm_payload(&path).unwrap();
            assert_eq!(payload.len() as i64, summary.packets_written * 2);
            assert!(payload.chunks(2).all(|p| p == [5, 0]));
            assert!(summary.packets_written >= 16 * 3);
        }
    }
}
