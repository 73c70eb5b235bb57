//! Blocking HTTP transport on reqwest.

use std::io::{Cursor, Read};
use std::time::Duration;

use reqwest::blocking::{Body, Client};

use voice_uplink_core::models::error::TransportError;
use voice_uplink_core::traits::http_transport::{
    HttpRequest, HttpResponse, HttpTransport, ProgressFn,
};

use crate::error::DesktopError;

/// [`HttpTransport`] backed by a `reqwest::blocking::Client`.
///
/// The request body is streamed through a reader that reports progress as
/// reqwest pulls bytes off it.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, DesktopError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| DesktopError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn post(
        &self,
        request: HttpRequest,
        progress: ProgressFn,
    ) -> Result<HttpResponse, TransportError> {
        let total = request.body.len() as u64;
        let body = Body::sized(ProgressReader::new(request.body, progress), total);

        let mut builder = self.client.post(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        log::debug!("POST {} ({} bytes)", request.url, total);
        let response = builder.body(body).send().map_err(map_send_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    log::warn!("dropping non-ASCII response header {}", name);
                    None
                }
            })
            .collect();

        let body = response.bytes().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Body(e.to_string())
            }
        })?;

        log::debug!("response {} ({} bytes)", status, body.len());
        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn map_send_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Request(e.to_string())
    }
}

/// Reader over the request body that reports `(sent, total)` after each read.
struct ProgressReader {
    inner: Cursor<Vec<u8>>,
    total: u64,
    progress: ProgressFn,
}

impl ProgressReader {
    fn new(body: Vec<u8>, progress: ProgressFn) -> Self {
        Self {
            total: body.len() as u64,
            inner: Cursor::new(body),
            progress,
        }
    }
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            (self.progress)(self.inner.position(), self.total);
        }
        Ok(n)
    }
}
