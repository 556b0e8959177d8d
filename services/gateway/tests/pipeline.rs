//! End-to-end pipeline behavior: file drop → framing → queue → processor →
//! retry registry.

use async_trait::async_trait;
use gateway_service::adapter::{build_adapter, DeviceAdapter};
use gateway_service::config::{ForwardConfig, GatewayConfig, ProcessorConfig, RetryConfig};
use gateway_service::framing::StrategyRegistry;
use gateway_service::intake;
use gateway_service::output::Forwarder;
use gateway_service::parser::MessageParser;
use gateway_service::processor::BatchProcessor;
use gateway_service::queue::MessageQueue;
use gateway_service::retry::RetryRegistry;
use gateway_types::{
    ConnectionKind, ConnectionState, Device, DeviceId, MessageIdGenerator, RawMessage,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct FixedParser(Value);

#[async_trait]
impl MessageParser for FixedParser {
    async fn parse(&self, _message: &RawMessage) -> Value {
        self.0.clone()
    }
}

fn file_device(dir: &TempDir) -> Device {
    Device {
        id: DeviceId::from("exporter-1"),
        name: "Result exporter".to_string(),
        model: "GENERIC".to_string(),
        manufacturer: None,
        connection_type: ConnectionKind::File,
        connection_params: format!("{}:*.hl7:UTF-8:false", dir.path().display()),
        status: ConnectionState::Disconnected,
        description: None,
        message_type: Some("HL7".to_string()),
    }
}

fn fast_gateway_config() -> GatewayConfig {
    let mut config = GatewayConfig::from_env();
    config.transport.file_receive_wait_secs = 1;
    config.transport.receive_wait_secs = 1;
    config
}

fn build_file_adapter(dir: &TempDir, config: &GatewayConfig) -> Arc<dyn DeviceAdapter> {
    build_adapter(
        file_device(dir),
        Arc::new(StrategyRegistry::with_defaults()),
        Arc::new(MessageIdGenerator::new(1)),
        config,
    )
    .expect("adapter builds")
}

fn processor_with(
    queue: Arc<MessageQueue>,
    parser_result: Value,
) -> (Arc<BatchProcessor>, Arc<RetryRegistry>) {
    let retry = Arc::new(RetryRegistry::new(RetryConfig::default()));
    // Unroutable endpoint: anything that reaches the forwarder fails fast.
    let forward = ForwardConfig {
        server_address: "http://127.0.0.1:1/unreachable".to_string(),
        request_timeout_secs: 1,
    };
    let processor = Arc::new(BatchProcessor::new(
        queue,
        Arc::new(FixedParser(parser_result)),
        Arc::new(Forwarder::new(forward)),
        Arc::clone(&retry),
        ProcessorConfig::default(),
    ));
    (processor, retry)
}

#[tokio::test]
async fn dropped_files_flow_to_the_queue_in_order() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.hl7"), "MSH|first|\r").unwrap();

    let config = fast_gateway_config();
    let adapter = build_file_adapter(&dir, &config);
    assert!(adapter.connect().await);

    let queue = Arc::new(MessageQueue::new(10));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pump = tokio::spawn(intake::pump(
        Arc::clone(&adapter),
        Arc::clone(&queue),
        shutdown_rx,
    ));

    std::fs::write(dir.path().join("b.hl7"), "MSH|second|\r").unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    shutdown_tx.send(true).unwrap();
    pump.await.unwrap();
    adapter.disconnect().await;

    let drained = queue.drain(10);
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].raw_content, "MSH|first|\r");
    assert_eq!(drained[1].raw_content, "MSH|second|\r");
    assert_eq!(drained[0].message_type.as_deref(), Some("HL7"));
}

#[tokio::test]
async fn queue_overflow_drops_with_error_and_keeps_size() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.hl7"), "MSH|one|\r").unwrap();
    std::fs::write(dir.path().join("b.hl7"), "MSH|two|\r").unwrap();

    let config = fast_gateway_config();
    let adapter = build_file_adapter(&dir, &config);
    assert!(adapter.connect().await);

    let queue = Arc::new(MessageQueue::new(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pump = tokio::spawn(intake::pump(
        Arc::clone(&adapter),
        Arc::clone(&queue),
        shutdown_rx,
    ));
    tokio::time::sleep(Duration::from_millis(600)).await;
    shutdown_tx.send(true).unwrap();
    pump.await.unwrap();
    adapter.disconnect().await;

    // Second message was rejected; the queue holds exactly the first.
    assert_eq!(queue.len(), 1);
    assert!(!queue.is_healthy());
}

#[tokio::test]
async fn forward_failures_accumulate_in_the_retry_registry() {
    let queue = Arc::new(MessageQueue::new(10));
    let (processor, retry) = processor_with(Arc::clone(&queue), json!({"OBX": "parsed"}));

    let message = RawMessage::new(
        gateway_types::MessageId::from("m1"),
        DeviceId::from("d1"),
        "GENERIC",
        "OBX|1|\r",
    );
    queue.enqueue(message);
    processor.run_batch().await;

    let entry = retry
        .get(&gateway_types::MessageId::from("m1"))
        .expect("failed forward recorded");
    assert_eq!(entry.retry_count, 1);
    assert!(entry.last_error.contains("request failed"));
}

#[tokio::test]
async fn incomplete_messages_bypass_forward_and_retry() {
    let queue = Arc::new(MessageQueue::new(10));
    let (processor, retry) = processor_with(Arc::clone(&queue), json!({"INCOMPLETE": true}));

    queue.enqueue(RawMessage::new(
        gateway_types::MessageId::from("m2"),
        DeviceId::from("d1"),
        "GENERIC",
        "partial",
    ));
    processor.run_batch().await;

    assert!(retry.is_empty());
    assert_eq!(processor.stats().incomplete, 1);
}

#[tokio::test]
async fn retry_pass_requeues_only_eligible_entries() {
    let queue = Arc::new(MessageQueue::new(10));
    let (processor, retry) = processor_with(Arc::clone(&queue), json!({"OBX": "parsed"}));

    retry.record_failure(
        RawMessage::new(
            gateway_types::MessageId::from("m3"),
            DeviceId::from("d1"),
            "GENERIC",
            "OBX|1|\r",
        ),
        "down",
    );
    // Freshly failed: backoff has not elapsed, nothing is requeued.
    assert_eq!(processor.run_retry_pass(), 0);
    assert!(queue.is_empty());
}
