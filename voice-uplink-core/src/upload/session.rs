use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::multipart;
use crate::models::config::{DEFAULT_ENDPOINT, DEFAULT_TIMEOUT_SECS};
use crate::models::error::{TransportError, UploadError};
use crate::models::multipart::MultipartPart;
use crate::traits::http_transport::{HttpRequest, HttpResponse, HttpTransport, ProgressFn};

/// Content type of the `metadata` request part.
pub const METADATA_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Content type of the `audio` request part.
pub const AUDIO_CONTENT_TYPE: &str = "audio/L16; rate=16000; channels=1";

/// Receives upload progress as a percentage in `0.0..=100.0`.
pub type ProgressHandler = Arc<dyn Fn(f64) + Send + Sync + 'static>;

/// Receives the failure of an upload. Called at most once.
pub type ErrorHandler = Box<dyn FnOnce(&UploadError) + Send + 'static>;

/// Receives the decoded response of a successful upload. Called at most once.
pub type SuccessHandler = Box<dyn FnOnce(&UploadResponse) + Send + 'static>;

/// A successful recognize response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResponse {
    pub status: u16,
    /// Raw multipart body as received.
    pub body: Vec<u8>,
    /// Decoded parts, in body order.
    pub parts: Vec<MultipartPart>,
}

impl UploadResponse {
    pub fn json_parts(&self) -> impl Iterator<Item = &MultipartPart> {
        self.parts.iter().filter(|p| p.is_json())
    }

    pub fn audio_parts(&self) -> impl Iterator<Item = &MultipartPart> {
        self.parts.iter().filter(|p| p.is_audio())
    }
}

/// Error body returned by the service on non-2xx responses.
#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// One recognize request: a `metadata` JSON part plus an `audio` PCM part.
///
/// Handlers are optional and may each be set once. [`UploadSession::start`]
/// consumes the session, so a session carries exactly one request.
pub struct UploadSession<T: HttpTransport> {
    transport: T,
    endpoint: String,
    timeout: Duration,

    token: Option<String>,
    metadata: Option<String>,
    audio: Option<Vec<u8>>,

    progress: Option<ProgressHandler>,
    error: Option<ErrorHandler>,
    success: Option<SuccessHandler>,
}

impl<T: HttpTransport> UploadSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token: None,
            metadata: None,
            audio: None,
            progress: None,
            error: None,
            success: None,
        }
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) -> &mut Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn set_token(&mut self, token: impl Into<String>) -> &mut Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_metadata(&mut self, json: impl Into<String>) -> &mut Self {
        self.metadata = Some(json.into());
        self
    }

    pub fn set_audio(&mut self, pcm: impl Into<Vec<u8>>) -> &mut Self {
        self.audio = Some(pcm.into());
        self
    }

    pub fn on_progress(
        &mut self,
        handler: impl Fn(f64) + Send + Sync + 'static,
    ) -> Result<(), UploadError> {
        set_once(&mut self.progress, Arc::new(handler), "progress")
    }

    pub fn on_error(
        &mut self,
        handler: impl FnOnce(&UploadError) + Send + 'static,
    ) -> Result<(), UploadError> {
        set_once(&mut self.error, Box::new(handler), "error")
    }

    pub fn on_success(
        &mut self,
        handler: impl FnOnce(&UploadResponse) + Send + 'static,
    ) -> Result<(), UploadError> {
        set_once(&mut self.success, Box::new(handler), "success")
    }

    /// Validate, encode and send the request on a background thread.
    ///
    /// Fails synchronously with `SetupIncomplete` when the token, metadata
    /// or audio is missing. Everything after that is reported through the
    /// handlers and [`UploadHandle::wait`].
    pub fn start(self) -> Result<UploadHandle, UploadError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(UploadError::SetupIncomplete("auth token"))?;
        let metadata = self.metadata.ok_or(UploadError::SetupIncomplete("metadata"))?;
        let audio = self.audio.ok_or(UploadError::SetupIncomplete("audio"))?;

        let boundary = multipart::generate_boundary();
        let parts = [
            MultipartPart::form_data("metadata", METADATA_CONTENT_TYPE, metadata.into_bytes()),
            MultipartPart::form_data("audio", AUDIO_CONTENT_TYPE, audio),
        ];
        let request = HttpRequest {
            url: self.endpoint,
            headers: vec![
                ("Authorization".into(), format!("Bearer {}", token)),
                ("Content-Type".into(), multipart::form_data_content_type(&boundary)),
            ],
            body: multipart::encode(&boundary, &parts),
            timeout: self.timeout,
        };

        log::debug!(
            "uploading {} byte request to {} (boundary {})",
            request.body.len(),
            request.url,
            boundary
        );

        let transport = self.transport;
        let progress = self.progress;
        let on_error = self.error;
        let on_success = self.success;

        let worker = thread::Builder::new()
            .name("speech-upload".into())
            .spawn(move || {
                let reporter: ProgressFn = {
                    let progress = progress.clone();
                    Arc::new(move |sent: u64, total: u64| {
                        if let (Some(progress), true) = (&progress, total > 0) {
                            progress(sent as f64 / total as f64 * 100.0);
                        }
                    })
                };

                let outcome = interpret(transport.post(request, reporter));

                if let Some(ref progress) = progress {
                    progress(100.0);
                }
                match &outcome {
                    Ok(response) => {
                        log::debug!("upload finished: {} parts", response.parts.len());
                        if let Some(handler) = on_success {
                            handler(response);
                        }
                    }
                    Err(e) => {
                        log::warn!("upload failed: {}", e);
                        if let Some(handler) = on_error {
                            handler(e);
                        }
                    }
                }
                outcome
            })
            .map_err(|e| UploadError::Worker(format!("failed to spawn upload thread: {}", e)))?;

        Ok(UploadHandle { boundary, worker })
    }
}

/// The in-flight request started by [`UploadSession::start`].
pub struct UploadHandle {
    boundary: String,
    worker: thread::JoinHandle<Result<UploadResponse, UploadError>>,
}

impl UploadHandle {
    /// Boundary token used for the request body.
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Block until the request completes; returns what the handlers saw.
    pub fn wait(self) -> Result<UploadResponse, UploadError> {
        self.worker
            .join()
            .map_err(|_| UploadError::Worker("upload thread panicked".into()))?
    }
}

fn set_once<H>(slot: &mut Option<H>, handler: H, name: &'static str) -> Result<(), UploadError> {
    if slot.is_some() {
        return Err(UploadError::HandlerAlreadySet(name));
    }
    *slot = Some(handler);
    Ok(())
}

/// Turn a transport outcome into an upload outcome.
fn interpret(result: Result<HttpResponse, TransportError>) -> Result<UploadResponse, UploadError> {
    let response = result?;

    if !response.is_success() {
        return Err(UploadError::ApiCall {
            status: response.status,
            message: api_error_message(&response.body),
        });
    }

    let boundary = response
        .header("Content-Type")
        .and_then(multipart::boundary_from_content_type)
        .ok_or(UploadError::ResponseBoundaryMissing)?;
    let parts = multipart::decode(&response.body, &boundary)?;

    Ok(UploadResponse {
        status: response.status,
        body: response.body,
        parts,
    })
}

/// `error.message` from a JSON error body, else the body as text.
fn api_error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}
