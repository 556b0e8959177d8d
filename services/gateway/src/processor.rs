//! Batch processor: drains the queue, parses and forwards asynchronously.

use crate::config::ProcessorConfig;
use crate::output::{ForwardOutcome, Forwarder};
use crate::parser::{self, MessageParser, ParseDisposition};
use crate::queue::MessageQueue;
use crate::retry::RetryRegistry;
use gateway_types::{MessageStatus, RawMessage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cumulative processing counters since the last stats reset.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProcessorStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub incomplete: u64,
    pub avg_latency_ms: u64,
}

/// Periodic batch job: drain up to `batch_size` messages per tick, fire each
/// as an independent task (parse then forward), wait a bounded time for the
/// batch, then move on. Slow tasks finish in the background and still update
/// the shared counters and registries.
pub struct BatchProcessor {
    queue: Arc<MessageQueue>,
    parser: Arc<dyn MessageParser>,
    forwarder: Arc<Forwarder>,
    retry: Arc<RetryRegistry>,
    config: ProcessorConfig,
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    incomplete: AtomicU64,
    latency_ms_total: AtomicU64,
}

impl BatchProcessor {
    pub fn new(
        queue: Arc<MessageQueue>,
        parser: Arc<dyn MessageParser>,
        forwarder: Arc<Forwarder>,
        retry: Arc<RetryRegistry>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            queue,
            parser,
            forwarder,
            retry,
            config,
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            incomplete: AtomicU64::new(0),
            latency_ms_total: AtomicU64::new(0),
        }
    }

    /// One batch tick. Returns the number of messages drained.
    pub async fn run_batch(self: &Arc<Self>) -> usize {
        let batch = self.queue.drain(self.config.batch_size);
        if batch.is_empty() {
            return 0;
        }
        debug!(size = batch.len(), "processing batch");

        let mut handles = Vec::with_capacity(batch.len());
        for message in batch {
            let processor = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                processor.process_one(message).await;
            }));
        }
        let count = handles.len();

        let wait = Duration::from_secs(self.config.batch_wait_secs);
        if tokio::time::timeout(wait, futures_util::future::join_all(handles))
            .await
            .is_err()
        {
            // Abandon the wait, not the work: spawned tasks keep running.
            warn!(wait_secs = self.config.batch_wait_secs, "batch wait elapsed, moving on");
        }
        count
    }

    /// Parse and forward one message, updating counters and the retry
    /// registry with the outcome.
    pub async fn process_one(&self, mut message: RawMessage) {
        let started = Instant::now();
        message.status = MessageStatus::Processing;
        self.processed.fetch_add(1, Ordering::Relaxed);

        let result = self.parser.parse(&message).await;
        match parser::classify(&result) {
            ParseDisposition::Incomplete => {
                message.status = MessageStatus::Incomplete;
                self.incomplete.fetch_add(1, Ordering::Relaxed);
                debug!(message = %message.id, "parser reports incomplete payload");
                return;
            }
            ParseDisposition::Failed => {
                let reason = parser::error_text(&result);
                message.fail(reason.clone());
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.retry.record_failure(message, reason);
                return;
            }
            ParseDisposition::Parsed => {
                message.process_result = Some(result);
            }
        }

        match self.forwarder.forward(&message).await {
            ForwardOutcome::Delivered => {
                message.status = MessageStatus::Processed;
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                self.latency_ms_total
                    .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
                self.retry.on_success(&message.id);
            }
            ForwardOutcome::Failed(reason) => {
                message.fail(reason.clone());
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.retry.record_failure(message, reason);
            }
        }
    }

    /// Move retry-eligible messages back onto the queue.
    pub fn run_retry_pass(&self) -> usize {
        let due = self.retry.take_due();
        let mut requeued = 0;
        for message in due {
            match self.queue.enqueue(message) {
                crate::queue::EnqueueOutcome::Accepted => requeued += 1,
                crate::queue::EnqueueOutcome::Rejected(deferred) => {
                    // Entry stays in the registry and becomes due again after
                    // its backoff.
                    warn!(message = %deferred.id, "queue full during retry pass, deferring");
                }
            }
        }
        if requeued > 0 {
            info!(requeued, "retry pass re-enqueued messages");
        }
        requeued
    }

    pub fn stats(&self) -> ProcessorStats {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let latency_total = self.latency_ms_total.load(Ordering::Relaxed);
        ProcessorStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            avg_latency_ms: if succeeded > 0 { latency_total / succeeded } else { 0 },
        }
    }

    /// Emit cumulative counters and reset them. Called from the stats loop.
    pub fn log_and_reset_stats(&self) {
        let stats = self.stats();
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            incomplete = stats.incomplete,
            avg_latency_ms = stats.avg_latency_ms,
            queue_len = self.queue.len(),
            queue_healthy = self.queue.is_healthy(),
            retry_entries = self.retry.len(),
            "processing stats"
        );
        self.processed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.incomplete.store(0, Ordering::Relaxed);
        self.latency_ms_total.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ForwardConfig, RetryConfig};
    use async_trait::async_trait;
    use gateway_types::{DeviceId, MessageId};
    use serde_json::{json, Value};

    struct FixedParser(Value);

    #[async_trait]
    impl MessageParser for FixedParser {
        async fn parse(&self, _message: &RawMessage) -> Value {
            self.0.clone()
        }
    }

    fn msg(id: &str) -> RawMessage {
        RawMessage::new(MessageId::from(id), DeviceId::from("d1"), "GENERIC", "X|\r")
    }

    fn processor(parser_result: Value) -> Arc<BatchProcessor> {
        // Unroutable address so forwards fail fast in tests that reach it.
        let forward = ForwardConfig {
            server_address: "http://127.0.0.1:1/unreachable".to_string(),
            request_timeout_secs: 1,
        };
        Arc::new(BatchProcessor::new(
            Arc::new(MessageQueue::new(10)),
            Arc::new(FixedParser(parser_result)),
            Arc::new(Forwarder::new(forward)),
            Arc::new(RetryRegistry::new(RetryConfig::default())),
            ProcessorConfig::default(),
        ))
    }

    #[tokio::test]
    async fn incomplete_parse_is_neither_forwarded_nor_retried() {
        let processor = processor(json!({"INCOMPLETE": true}));
        processor.process_one(msg("m1")).await;
        let stats = processor.stats();
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.failed, 0);
        assert!(processor.retry.is_empty());
    }

    #[tokio::test]
    async fn parse_error_lands_in_retry_registry() {
        let processor = processor(json!({"error": true, "errorMessage": "bad segment"}));
        processor.process_one(msg("m2")).await;
        assert_eq!(processor.stats().failed, 1);
        let entry = processor.retry.get(&MessageId::from("m2")).expect("entry");
        assert_eq!(entry.last_error, "bad segment");
        assert_eq!(entry.message.status, MessageStatus::Error);
    }

    #[tokio::test]
    async fn delivery_failure_lands_in_retry_registry() {
        let processor = processor(json!({"MSH": "ok"}));
        processor.process_one(msg("m3")).await;
        assert_eq!(processor.stats().failed, 1);
        assert!(processor.retry.get(&MessageId::from("m3")).is_some());
    }

    #[tokio::test]
    async fn batch_drains_up_to_batch_size() {
        let processor = processor(json!({"INCOMPLETE": true}));
        for n in 0..5 {
            processor.queue.enqueue(msg(&format!("b{n}")));
        }
        let drained = processor.run_batch().await;
        assert_eq!(drained, 5);
        assert_eq!(processor.stats().incomplete, 5);
        assert!(processor.queue.is_empty());
    }

    #[tokio::test]
    async fn empty_queue_is_a_no_op_tick() {
        let processor = processor(json!({}));
        assert_eq!(processor.run_batch().await, 0);
    }
}
