use serde::{Deserialize, Serialize};

use crate::models::audio_models::AudioFormat;
use crate::models::error::UploadError;

/// JSON document sent as the `metadata` part of a recognize request.
///
/// ```json
/// {
///   "messageHeader": { "deviceContext": [ { "name": "playbackState", ... } ] },
///   "messageBody": { "profile": "doppler-scone", "locale": "en-us",
///                    "format": "audio/L16; rate=16000; channels=1" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeMetadata {
    pub message_header: MessageHeader,
    pub message_body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub device_context: Vec<DeviceContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceContext {
    pub name: String,
    pub namespace: String,
    pub payload: PlaybackState,
}

/// Player state reported alongside the request. Offsets are strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub stream_id: String,
    pub offset_in_milliseconds: String,
    pub player_activity: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub profile: String,
    pub locale: String,
    pub format: String,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            offset_in_milliseconds: "0".into(),
            player_activity: "IDLE".into(),
        }
    }
}

impl RecognizeMetadata {
    /// Metadata for an idle player sending `format` audio.
    pub fn new(profile: &str, locale: &str, format: &AudioFormat) -> Self {
        Self {
            message_header: MessageHeader {
                device_context: vec![DeviceContext {
                    name: "playbackState".into(),
                    namespace: "AudioPlayer".into(),
                    payload: PlaybackState::default(),
                }],
            },
            message_body: MessageBody {
                profile: profile.into(),
                locale: locale.into(),
                format: format.l16_content_type(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, UploadError> {
        serde_json::to_string(self)
            .map_err(|e| UploadError::Io(format!("failed to serialize metadata: {}", e)))
    }
}

impl Default for RecognizeMetadata {
    fn default() -> Self {
        Self::new("doppler-scone", "en-us", &AudioFormat::speech())
    }
}
