//! Frame buffer engine: per-adapter byte accumulation and message emission.

use crate::config::FramingConfig;
use crate::framing::StrategyRegistry;
use bytes::BytesMut;
use gateway_types::{CompletionVerdict, Device, MessageIdGenerator, RawMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Snapshot of an engine's running counters.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct FrameStats {
    pub bytes_received: u64,
    pub messages_received: u64,
    /// Buffer resets caused by exceeding the byte ceiling
    pub overflow_resets: u64,
    /// Buffer resets caused by the idle sweep
    pub stale_resets: u64,
    /// Completed messages dropped because the received queue was full
    pub dropped_received: u64,
    pub buffer_bytes: usize,
    pub queued: usize,
}

struct EngineBuffer {
    buffer: BytesMut,
    last_activity: Instant,
    received: VecDeque<RawMessage>,
}

/// Accumulates raw bytes for one adapter, consults the strategy registry on
/// every append, and emits completed [`RawMessage`]s into a bounded received
/// queue the adapter's `receive` drains.
///
/// Buffer state is adapter-scoped; engines are never shared across adapters.
pub struct FrameEngine {
    device: Device,
    registry: Arc<StrategyRegistry>,
    ids: Arc<MessageIdGenerator>,
    config: FramingConfig,
    inner: Mutex<EngineBuffer>,
    received_notify: Notify,
    closed: AtomicBool,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
    overflow_resets: AtomicU64,
    stale_resets: AtomicU64,
    dropped_received: AtomicU64,
}

impl FrameEngine {
    pub fn new(
        device: Device,
        registry: Arc<StrategyRegistry>,
        ids: Arc<MessageIdGenerator>,
        config: FramingConfig,
    ) -> Self {
        Self {
            device,
            registry,
            ids,
            config,
            inner: Mutex::new(EngineBuffer {
                buffer: BytesMut::new(),
                last_activity: Instant::now(),
                received: VecDeque::new(),
            }),
            received_notify: Notify::new(),
            closed: AtomicBool::new(false),
            bytes_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            overflow_resets: AtomicU64::new(0),
            stale_resets: AtomicU64::new(0),
            dropped_received: AtomicU64::new(0),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Append received bytes, consult the strategy, and emit on completion.
    ///
    /// Returns bytes the adapter must write back to the transport (mid-stream
    /// ACKs), if the strategy asked for any.
    pub fn on_bytes(&self, raw: &[u8]) -> Option<Vec<u8>> {
        if raw.is_empty() {
            return None;
        }
        self.bytes_received.fetch_add(raw.len() as u64, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        inner.last_activity = Instant::now();

        if inner.buffer.len() + raw.len() > self.config.max_buffer_bytes {
            let discarded = inner.buffer.len() + raw.len();
            inner.buffer.clear();
            self.overflow_resets.fetch_add(1, Ordering::Relaxed);
            warn!(
                device = %self.device.id,
                discarded_bytes = discarded,
                ceiling = self.config.max_buffer_bytes,
                "frame buffer overflow, discarding buffer"
            );
            return None;
        }
        inner.buffer.extend_from_slice(raw);

        let mut provisional = RawMessage::new(
            self.ids.next_id(),
            self.device.id.clone(),
            self.device.model.clone(),
            String::from_utf8_lossy(&inner.buffer).into_owned(),
        );
        provisional.message_type = self.device.message_type.clone();

        let strategy = self.registry.resolve(&self.device.model);
        match strategy.check(&provisional) {
            CompletionVerdict::Incomplete => None,
            CompletionVerdict::IncompleteWithResponse(response) => Some(response),
            CompletionVerdict::Complete => {
                inner.buffer.clear();
                self.messages_received.fetch_add(1, Ordering::Relaxed);
                debug!(
                    device = %self.device.id,
                    message = %provisional.id,
                    bytes = provisional.raw_content.len(),
                    "message framed"
                );
                self.push_received(&mut inner, provisional);
                drop(inner);
                self.received_notify.notify_one();
                None
            }
        }
    }

    /// Inject a message that bypasses byte framing (file adapter).
    pub fn push_message(&self, message: RawMessage) {
        let mut inner = self.inner.lock();
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.push_received(&mut inner, message);
        drop(inner);
        self.received_notify.notify_one();
    }

    fn push_received(&self, inner: &mut EngineBuffer, message: RawMessage) {
        if inner.received.len() >= self.config.received_queue_capacity {
            if let Some(evicted) = inner.received.pop_front() {
                self.dropped_received.fetch_add(1, Ordering::Relaxed);
                warn!(
                    device = %self.device.id,
                    evicted = %evicted.id,
                    capacity = self.config.received_queue_capacity,
                    "received queue full, dropping oldest message"
                );
            }
        }
        inner.received.push_back(message);
    }

    /// Pop the oldest completed message, if any.
    pub fn pop_received(&self) -> Option<RawMessage> {
        self.inner.lock().received.pop_front()
    }

    /// Wait up to `timeout` for a completed message.
    ///
    /// Returns `None` immediately once the engine is closed; consumers use
    /// that as their exit signal.
    pub async fn wait_received(&self, timeout: Duration) -> Option<RawMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(message) = self.pop_received() {
                return Some(message);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let notified = self.received_notify.notified();
            // Re-check after arming the waiter so a push between the pop and
            // the await is not missed.
            if let Some(message) = self.pop_received() {
                return Some(message);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return self.pop_received();
            }
        }
    }

    /// Clear a non-empty buffer that has been idle past the configured
    /// timeout. Timer-driven safety net against a partial frame never
    /// completing.
    pub fn sweep_idle(&self) {
        let mut inner = self.inner.lock();
        if inner.buffer.is_empty() {
            return;
        }
        if inner.last_activity.elapsed() >= self.config.buffer_timeout() {
            let discarded = inner.buffer.len();
            inner.buffer.clear();
            self.stale_resets.fetch_add(1, Ordering::Relaxed);
            warn!(
                device = %self.device.id,
                discarded_bytes = discarded,
                timeout_ms = self.config.buffer_timeout_ms,
                "stale frame buffer cleared"
            );
        }
    }

    /// Drop buffered bytes and queued messages.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.buffer.clear();
        inner.received.clear();
    }

    /// Terminal shutdown for adapter teardown: drops all buffered state and
    /// wakes every waiter with a final `None`. A closed engine never reopens;
    /// an evicted adapter's consumers must not linger on it.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.reset();
        self.received_notify.notify_waiters();
        self.received_notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> FrameStats {
        let inner = self.inner.lock();
        FrameStats {
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            overflow_resets: self.overflow_resets.load(Ordering::Relaxed),
            stale_resets: self.stale_resets.load(Ordering::Relaxed),
            dropped_received: self.dropped_received.load(Ordering::Relaxed),
            buffer_bytes: inner.buffer.len(),
            queued: inner.received.len(),
        }
    }

    /// Periodic stats emission, called from the hourly stats loop.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            device = %self.device.id,
            bytes = stats.bytes_received,
            messages = stats.messages_received,
            overflows = stats.overflow_resets,
            stale = stats.stale_resets,
            dropped = stats.dropped_received,
            "adapter frame stats"
        );
    }
}
