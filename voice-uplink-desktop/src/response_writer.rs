use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use voice_uplink_core::models::multipart::PartHeaders;
use voice_uplink_core::traits::playback::PlaybackConsumer;

/// Saves recognizer audio replies to numbered files for an external player.
///
/// Files are named `response-001.mp3`, `response-002.pcm`, ... in arrival order.
pub struct ResponseFileWriter {
    dir: PathBuf,
    next: AtomicUsize,
    written: Mutex<Vec<PathBuf>>,
}

impl ResponseFileWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: AtomicUsize::new(1),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, in order.
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().clone()
    }
}

impl PlaybackConsumer for ResponseFileWriter {
    fn consume(&self, headers: &PartHeaders, payload: &[u8]) {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let ext = extension_for(headers.get("Content-Type").unwrap_or(""));
        let path = self.dir.join(format!("response-{:03}.{}", n, ext));

        let result = fs::create_dir_all(&self.dir).and_then(|_| fs::write(&path, payload));
        match result {
            Ok(()) => {
                log::info!("saved {} byte reply to {}", payload.len(), path.display());
                self.written.lock().push(path);
            }
            Err(e) => log::error!("failed to save reply to {}: {}", path.display(), e),
        }
    }
}

fn extension_for(content_type: &str) -> &'static str {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    match media.as_str() {
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/l16" => "pcm",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}
