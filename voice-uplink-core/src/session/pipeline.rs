use std::sync::Arc;

use crate::models::audio_models::AudioFormat;
use crate::models::config::PipelineConfig;
use crate::models::error::{CaptureError, UploadError};
use crate::models::multipart::MultipartPart;
use crate::models::recording_result::RecordingSummary;
use crate::models::state::CaptureState;
use crate::session::capture_engine::{CaptureEngine, CaptureOptions};
use crate::storage::wav_sink;
use crate::traits::audio_input::AudioInput;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::http_transport::HttpTransport;
use crate::traits::playback::PlaybackConsumer;
use crate::traits::token_provider::TokenProvider;
use crate::upload::metadata::RecognizeMetadata;
use crate::upload::session::{
    ErrorHandler, ProgressHandler, SuccessHandler, UploadHandle, UploadSession, AUDIO_CONTENT_TYPE,
};

/// Optional observers for one upload.
#[derive(Default)]
pub struct UploadHandlers {
    pub progress: Option<ProgressHandler>,
    pub error: Option<ErrorHandler>,
    pub success: Option<SuccessHandler>,
}

/// Record → upload → route, driven from a single controller thread.
///
/// ```text
/// [AudioInput] → [CaptureEngine] → WAV file
///                                     ↓ data chunk
///                 [UploadSession] → [HttpTransport] → multipart parts → [PlaybackConsumer]
/// ```
pub struct VoicePipeline<I: AudioInput, T: HttpTransport> {
    engine: CaptureEngine<I>,
    transport: Arc<T>,
    tokens: Box<dyn TokenProvider>,
    config: PipelineConfig,
}

impl<I: AudioInput, T: HttpTransport> VoicePipeline<I, T> {
    pub fn new(
        input: I,
        transport: T,
        tokens: Box<dyn TokenProvider>,
        config: PipelineConfig,
    ) -> Self {
        let options = CaptureOptions {
            buffer_count: config.audio.buffer_count,
            buffer_seconds: config.audio.buffer_seconds,
            drain_on_stop: config.audio.drain_on_stop,
        };
        Self {
            engine: CaptureEngine::new(input).with_options(options),
            transport: Arc::new(transport),
            tokens,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn engine(&self) -> &CaptureEngine<I> {
        &self.engine
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn CaptureDelegate>) {
        self.engine.set_delegate(delegate);
    }

    pub fn is_recording(&self) -> bool {
        self.engine.state().is_recording()
    }

    /// Open and close the input once so the first real recording starts quickly.
    ///
    /// Leaves the engine unconfigured.
    pub fn warm_up(&mut self) -> Result<(), CaptureError> {
        self.begin_recording()?;
        let stopped = self.engine.stop();
        let reset = self.engine.reset();
        stopped?;
        reset?;
        log::debug!("input warmed up on {}", self.engine.input().device_name());
        Ok(())
    }

    /// Configure the engine for the configured recording path and start capturing.
    pub fn begin_recording(&mut self) -> Result<(), CaptureError> {
        match self.engine.state() {
            CaptureState::Recording => return Err(CaptureError::Busy),
            CaptureState::Configured => self.engine.reset()?,
            CaptureState::Unconfigured | CaptureState::Stopped => {}
        }

        let format = self.config.audio.format();
        self.engine.configure(format, &self.config.storage.recording_path)?;
        if let Err(e) = self.engine.start() {
            if let Err(reset) = self.engine.reset() {
                log::warn!("reset after failed start: {}", reset);
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn finish_recording(&mut self) -> Result<RecordingSummary, CaptureError> {
        self.engine.stop()
    }

    /// Send the last recording to the recognizer.
    ///
    /// Only the PCM data chunk of the WAV file is uploaded.
    pub fn upload(&self, handlers: UploadHandlers) -> Result<UploadHandle, UploadError> {
        let summary = self
            .engine
            .last_recording()
            .ok_or(UploadError::Capture(CaptureError::NotRecording))?;
        if summary.format != AudioFormat::speech() {
            log::warn!(
                "recording is {}, the recognizer expects {}",
                summary.format.l16_content_type(),
                AUDIO_CONTENT_TYPE
            );
        }
        let audio = wav_sink::read_pcm_payload(&summary.file_path)?;
        let token = self
            .tokens
            .bearer_token()
            .ok_or(UploadError::SetupIncomplete("auth token"))?;

        let upload = &self.config.upload;
        let metadata =
            RecognizeMetadata::new(&upload.profile, &upload.locale, &summary.format).to_json()?;

        log::debug!(
            "uploading {:.2}s recording ({} bytes) from {}",
            summary.duration_secs,
            audio.len(),
            summary.file_path.display()
        );

        let mut session = UploadSession::new(Arc::clone(&self.transport));
        session
            .set_endpoint(upload.endpoint.as_str())
            .set_timeout(upload.timeout())
            .set_token(token)
            .set_metadata(metadata)
            .set_audio(audio);
        if let Some(progress) = handlers.progress {
            session.on_progress(move |pct| progress(pct))?;
        }
        if let Some(error) = handlers.error {
            session.on_error(error)?;
        }
        if let Some(success) = handlers.success {
            session.on_success(success)?;
        }
        session.start()
    }
}

/// Hand every audio part to `consumer`; returns how many were routed.
pub fn route_parts(parts: &[MultipartPart], consumer: &dyn PlaybackConsumer) -> usize {
    let mut routed = 0;
    for (index, part) in parts.iter().enumerate() {
        if part.is_audio() {
            consumer.consume(&part.headers, &part.body);
            routed += 1;
        } else if part.is_json() {
            log::debug!("part {}: {}", index, String::from_utf8_lossy(&part.body));
        } else {
            log::debug!("part {}: skipped {:?}", index, part.content_type());
        }
    }
    routed
}
