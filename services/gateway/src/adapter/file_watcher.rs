//! File-watcher adapter: a drop directory instead of a wire.
//!
//! Some instruments export results by writing a file per message into a
//! shared directory. Each fully-written file matching the configured glob
//! becomes one `RawMessage` with no byte-level framing; the file is
//! optionally deleted after consumption. `send` is unsupported.

use super::DeviceAdapter;
use crate::config::TransportConfig;
use crate::framing::{FrameEngine, FrameStats};
use async_trait::async_trait;
use gateway_types::{Device, FileParams, MessageIdGenerator, RawMessage};
use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause after a create event before reading, letting the writer finish.
const SETTLE_DELAY: Duration = Duration::from_millis(200);

pub struct FileWatcherAdapter {
    device: Device,
    params: FileParams,
    engine: Arc<FrameEngine>,
    ids: Arc<MessageIdGenerator>,
    config: TransportConfig,
    watching: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl FileWatcherAdapter {
    pub fn new(
        device: Device,
        params: FileParams,
        engine: Arc<FrameEngine>,
        ids: Arc<MessageIdGenerator>,
        config: TransportConfig,
    ) -> Self {
        Self {
            device,
            params,
            engine,
            ids,
            config,
            watching: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
        }
    }

    fn consume_file(
        path: &Path,
        pattern: &Pattern,
        device: &Device,
        params: &FileParams,
        engine: &FrameEngine,
        ids: &MessageIdGenerator,
    ) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if !pattern.matches(name) {
            return;
        }
        let content = match std::fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(err) => {
                warn!(device = %device.id, file = %path.display(), %err, "file read failed");
                return;
            }
        };
        if content.is_empty() {
            debug!(device = %device.id, file = %path.display(), "skipping empty file");
            return;
        }
        let mut message = RawMessage::new(
            ids.next_id(),
            device.id.clone(),
            device.model.clone(),
            content,
        );
        message.message_type = device.message_type.clone();
        info!(
            device = %device.id,
            file = %path.display(),
            message = %message.id,
            "file consumed"
        );
        engine.push_message(message);

        if params.delete_after_process {
            if let Err(err) = std::fs::remove_file(path) {
                warn!(device = %device.id, file = %path.display(), %err, "file delete failed");
            }
        }
    }

    /// Consume files already present in the directory.
    fn initial_scan(&self, pattern: &Pattern) {
        let entries = match std::fs::read_dir(&self.params.directory) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(device = %self.device.id, dir = %self.params.directory, %err, "scan failed");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                Self::consume_file(&path, pattern, &self.device, &self.params, &self.engine, &self.ids);
            }
        }
    }
}

#[async_trait]
impl DeviceAdapter for FileWatcherAdapter {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn connect(&self) -> bool {
        if self.watching.load(Ordering::Relaxed) {
            return true;
        }
        let directory = Path::new(&self.params.directory);
        if !directory.is_dir() {
            warn!(device = %self.device.id, dir = %self.params.directory, "watch directory missing");
            return false;
        }
        let pattern = match Pattern::new(&self.params.pattern) {
            Ok(pattern) => pattern,
            Err(err) => {
                warn!(device = %self.device.id, pattern = %self.params.pattern, %err, "bad glob pattern");
                return false;
            }
        };
        if !self.params.charset.eq_ignore_ascii_case("UTF-8") {
            // Non-UTF-8 content is read lossily; good enough for the ASCII
            // wire formats these instruments emit.
            warn!(device = %self.device.id, charset = %self.params.charset, "charset read as lossy UTF-8");
        }

        self.initial_scan(&pattern);

        let device = self.device.clone();
        let params = self.params.clone();
        let engine = Arc::clone(&self.engine);
        let ids = Arc::clone(&self.ids);
        let watching = Arc::clone(&self.watching);
        let handler = move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(err) => {
                    warn!(device = %device.id, %err, "watch error");
                    watching.store(false, Ordering::Relaxed);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_)) {
                return;
            }
            // Runs on the watcher's own thread, blocking is fine here.
            std::thread::sleep(SETTLE_DELAY);
            for path in &event.paths {
                Self::consume_file(path, &pattern, &device, &params, &engine, &ids);
            }
        };

        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(device = %self.device.id, %err, "watcher creation failed");
                return false;
            }
        };
        if let Err(err) = watcher.watch(directory, RecursiveMode::NonRecursive) {
            warn!(device = %self.device.id, dir = %self.params.directory, %err, "watch failed");
            return false;
        }
        info!(
            device = %self.device.id,
            dir = %self.params.directory,
            pattern = %self.params.pattern,
            "watching directory"
        );
        *self.watcher.lock() = Some(watcher);
        self.watching.store(true, Ordering::Relaxed);
        true
    }

    async fn disconnect(&self) {
        self.watcher.lock().take();
        self.watching.store(false, Ordering::Relaxed);
        self.engine.close();
        debug!(device = %self.device.id, "watch stopped");
    }

    async fn send(&self, _payload: &[u8]) -> bool {
        warn!(device = %self.device.id, "file adapter does not support send");
        false
    }

    async fn receive(&self) -> Option<RawMessage> {
        self.engine
            .wait_received(Duration::from_secs(self.config.file_receive_wait_secs))
            .await
    }

    async fn is_connected(&self) -> bool {
        self.watching.load(Ordering::Relaxed)
    }

    fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    fn stats(&self) -> FrameStats {
        self.engine.stats()
    }

    fn sweep_idle_buffer(&self) {
        self.engine.sweep_idle();
    }

    fn log_stats(&self) {
        self.engine.log_stats();
    }
}
