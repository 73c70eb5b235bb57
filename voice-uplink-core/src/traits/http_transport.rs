use std::sync::Arc;
use std::time::Duration;

use crate::models::error::TransportError;

/// Progress side channel: `(bytes_sent, bytes_total)`, called while the body is sent.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync + 'static>;

/// An outgoing POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response that made it back over the wire, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Blocking HTTP client used by upload sessions.
///
/// Implementations enforce `request.timeout` and report send progress via
/// `progress`. Any response, including 4xx/5xx, is `Ok`; `Err` means no
/// response was received.
pub trait HttpTransport: Send + Sync + 'static {
    fn post(
        &self,
        request: HttpRequest,
        progress: ProgressFn,
    ) -> Result<HttpResponse, TransportError>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn post(
        &self,
        request: HttpRequest,
        progress: ProgressFn,
    ) -> Result<HttpResponse, TransportError> {
        (**self).post(request, progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("content-type".into(), "multipart/related; boundary=x".into())],
            body: Vec::new(),
        };
        assert_eq!(response.header("Content-Type"), Some("multipart/related; boundary=x"));
        assert!(response.is_success());
    }

    #[test]
    fn success_range_is_2xx() {
        let mut response = HttpResponse {
            status: 299,
            headers: Vec::new(),
            body: Vec::new(),
        };
        assert!(response.is_success());
        response.status = 300;
        assert!(!response.is_success());
        response.status = 199;
        assert!(!response.is_success());
    }
}
