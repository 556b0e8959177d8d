//! Intake loop: pumps completed messages from an adapter into the queue.

use crate::adapter::DeviceAdapter;
use crate::queue::{EnqueueOutcome, MessageQueue};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Drive one adapter's `receive` and enqueue everything it yields until the
/// shutdown signal flips or the adapter is torn down for good. A full queue
/// marks the message ERROR and drops it; the instrument re-delivers at the
/// protocol level.
pub async fn pump(
    adapter: Arc<dyn DeviceAdapter>,
    queue: Arc<MessageQueue>,
    mut shutdown: watch::Receiver<bool>,
) {
    let device_id = adapter.device().id.clone();
    info!(device = %device_id, "intake loop started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = adapter.receive() => {
                let Some(message) = received else {
                    // A closed adapter was evicted or replaced; its loop must
                    // not linger on the dead instance.
                    if adapter.is_closed() {
                        break;
                    }
                    continue;
                };
                if let EnqueueOutcome::Rejected(mut rejected) = queue.enqueue(message) {
                    rejected.fail("message queue at capacity");
                    warn!(
                        device = %device_id,
                        message = %rejected.id,
                        "queue full, message marked ERROR and dropped"
                    );
                }
            }
        }
    }
    info!(device = %device_id, "intake loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FramingConfig, GatewayConfig};
    use crate::framing::{FrameEngine, StrategyRegistry};
    use crate::adapter::FileWatcherAdapter;
    use gateway_types::{
        ConnectionKind, ConnectionState, Device, DeviceId, FileParams, MessageIdGenerator,
    };
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn pumped_messages_land_on_the_queue() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("r1.hl7"), "MSH|one|\r").unwrap();

        let device = Device {
            id: DeviceId::from("file-1"),
            name: "Exporter".to_string(),
            model: "GENERIC".to_string(),
            manufacturer: None,
            connection_type: ConnectionKind::File,
            connection_params: format!("{}:*.hl7:UTF-8:false", dir.path().display()),
            status: ConnectionState::Disconnected,
            description: None,
            message_type: None,
        };
        let engine = Arc::new(FrameEngine::new(
            device.clone(),
            Arc::new(StrategyRegistry::with_defaults()),
            Arc::new(MessageIdGenerator::new(1)),
            FramingConfig::default(),
        ));
        let params = FileParams {
            directory: dir.path().display().to_string(),
            pattern: "*.hl7".to_string(),
            charset: "UTF-8".to_string(),
            delete_after_process: false,
        };
        let mut transport = GatewayConfig::from_env().transport;
        transport.file_receive_wait_secs = 1;
        let adapter: Arc<dyn DeviceAdapter> = Arc::new(FileWatcherAdapter::new(
            device,
            params,
            engine,
            Arc::new(MessageIdGenerator::new(2)),
            transport,
        ));
        assert!(adapter.connect().await);

        let queue = Arc::new(MessageQueue::new(10));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pump(Arc::clone(&adapter), Arc::clone(&queue), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.len(), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn pump_exits_when_the_adapter_is_torn_down() {
        let dir = TempDir::new().unwrap();
        let device = Device {
            id: DeviceId::from("file-2"),
            name: "Exporter".to_string(),
            model: "GENERIC".to_string(),
            manufacturer: None,
            connection_type: ConnectionKind::File,
            connection_params: format!("{}:*.hl7:UTF-8:false", dir.path().display()),
            status: ConnectionState::Disconnected,
            description: None,
            message_type: None,
        };
        let engine = Arc::new(FrameEngine::new(
            device.clone(),
            Arc::new(StrategyRegistry::with_defaults()),
            Arc::new(MessageIdGenerator::new(1)),
            FramingConfig::default(),
        ));
        let params = FileParams {
            directory: dir.path().display().to_string(),
            pattern: "*.hl7".to_string(),
            charset: "UTF-8".to_string(),
            delete_after_process: false,
        };
        let mut transport = GatewayConfig::from_env().transport;
        transport.file_receive_wait_secs = 30;
        let adapter: Arc<dyn DeviceAdapter> = Arc::new(FileWatcherAdapter::new(
            device,
            params,
            engine,
            Arc::new(MessageIdGenerator::new(2)),
            transport,
        ));
        assert!(adapter.connect().await);

        let queue = Arc::new(MessageQueue::new(10));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pump(Arc::clone(&adapter), Arc::clone(&queue), shutdown_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No shutdown signal: teardown alone must stop the loop.
        adapter.disconnect().await;
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("intake loop exits after teardown")
            .unwrap();
    }
}
