pub mod audio_input;
pub mod capture_delegate;
pub mod http_transport;
pub mod packet_sink;
pub mod playback;
pub mod token_provider;
