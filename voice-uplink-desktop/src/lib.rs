//! # voice-uplink-desktop
//!
//! Desktop backend for voice-uplink-core.
//!
//! Provides:
//! - `CpalInput`: microphone capture through cpal, implementing `AudioInput`
//! - `ReqwestTransport`: blocking HTTPS client implementing `HttpTransport`
//! - `ResponseFileWriter`: saves audio reply parts to disk
//! - `list_input_devices`: capture device enumeration
//!
//! ## Usage
//! ```ignore
//! use voice_uplink_core::{PipelineConfig, EnvToken, VoicePipeline};
//! use voice_uplink_desktop::{CpalInput, ReqwestTransport};
//!
//! let config = PipelineConfig::default();
//! let input = CpalInput::default_device()?;
//! let transport = ReqwestTransport::new()?;
//! let tokens = Box::new(EnvToken::new(&config.upload.token_env));
//! let mut pipeline = VoicePipeline::new(input, transport, tokens, config);
//! pipeline.begin_recording()?;
//! ```

pub mod cpal_input;
pub mod error;
pub mod reqwest_transport;
pub mod response_writer;

pub use cpal_input::{list_input_devices, CpalInput, InputDeviceInfo};
pub use error::DesktopError;
pub use reqwest_transport::ReqwestTransport;
pub use response_writer::ResponseFileWriter;
