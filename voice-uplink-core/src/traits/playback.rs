use crate::models::multipart::PartHeaders;

/// Receives audio parts from a recognizer response.
///
/// Playback itself belongs to the platform; the core only routes parts here.
pub trait PlaybackConsumer: Send + Sync {
    fn consume(&self, headers: &PartHeaders, payload: &[u8]);
}
