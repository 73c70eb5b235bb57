//! Record an utterance from the microphone and send it to the recognizer.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};

use voice_uplink_core::models::error::UploadError;
use voice_uplink_core::{
    route_parts, CaptureDelegate, CaptureError, CaptureState, EnvToken, PipelineConfig, StaticToken,
    TokenProvider, UploadHandlers, UploadResponse, VoicePipeline,
};
use voice_uplink_desktop::{
    list_input_devices, CpalInput, DesktopError, ReqwestTransport, ResponseFileWriter,
};

/// Push-to-talk speech uplink
#[derive(Parser, Debug)]
#[command(
    name = "voice-uplink",
    version,
    about = "Record speech and send it to a remote recognizer"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = "voice-uplink.toml")]
    config: PathBuf,

    /// Bearer token (default: read from the configured environment variable)
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record one utterance and upload it
    Record {
        /// Stop after this many seconds instead of waiting for Enter
        #[arg(long, short = 's', value_name = "SECONDS")]
        seconds: Option<f64>,
    },
    /// List audio input devices
    Devices,
}

/// Logs capture state changes and errors.
struct LogDelegate;

impl CaptureDelegate for LogDelegate {
    fn on_state_changed(&self, state: CaptureState) {
        log::debug!("capture state: {:?}", state);
    }

    fn on_error(&self, error: &CaptureError) {
        match error.device_status() {
            Some(status) => log::error!("audio device failed with status {}", status),
            None => log::error!("capture error: {}", error),
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Record { seconds } => record(&cli.config, cli.token, seconds),
        Commands::Devices => devices(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn devices() -> Result<(), DesktopError> {
    let devices = list_input_devices()?;
    if devices.is_empty() {
        println!("no input devices found");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        let speech = if device.supports_speech { "" } else { "  (no 16 kHz mono)" };
        println!("{} {}{}", marker, device.name, speech);
    }
    Ok(())
}

fn record(
    config_path: &Path,
    token: Option<String>,
    seconds: Option<f64>,
) -> Result<(), DesktopError> {
    let config = PipelineConfig::load_or_default(config_path)?.with_env_overrides();
    config.validate()?;

    let input = CpalInput::from_config(config.audio.device.as_deref())?;
    let transport = ReqwestTransport::new()?;
    let tokens: Box<dyn TokenProvider> = match token {
        Some(t) => Box::new(StaticToken(t)),
        None => Box::new(EnvToken::new(config.upload.token_env.clone())),
    };
    let response_dir = config.storage.response_dir.clone();

    log::info!("using input device: {}", config.audio.device.as_deref().unwrap_or("default"));
    let mut pipeline = VoicePipeline::new(input, transport, tokens, config);
    pipeline.set_delegate(Arc::new(LogDelegate));

    if let Err(e) = pipeline.warm_up() {
        log::warn!("warm-up failed: {}", e);
    }

    pipeline.begin_recording()?;
    match seconds {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            println!("recording for {:.1}s...", secs);
            thread::sleep(Duration::from_secs_f64(secs));
        }
        _ => {
            print!("recording, press Enter to stop... ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
        }
    }
    let summary = pipeline.finish_recording()?;
    println!(
        "captured {:.2}s ({} bytes) to {}",
        summary.duration_secs,
        summary.bytes_written,
        summary.file_path.display()
    );
    if summary.is_empty() {
        println!("nothing recorded, skipping upload");
        return Ok(());
    }

    let handlers = UploadHandlers {
        progress: Some(Arc::new(|pct: f64| {
            print!("\ruploading {:5.1}%", pct);
            let _ = io::stdout().flush();
        })),
        error: Some(Box::new(|_: &UploadError| println!())),
        success: Some(Box::new(|_: &UploadResponse| println!())),
    };
    let response = pipeline.upload(handlers)?.wait()?;

    for part in response.json_parts() {
        match serde_json::from_slice::<serde_json::Value>(&part.body) {
            Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
            Err(_) => println!("{}", String::from_utf8_lossy(&part.body)),
        }
    }
    let writer = ResponseFileWriter::new(response_dir);
    let routed = route_parts(&response.parts, &writer);
    for path in writer.written() {
        println!("reply audio: {}", path.display());
    }
    log::info!("{} of {} response parts were audio", routed, response.parts.len());
    Ok(())
}
