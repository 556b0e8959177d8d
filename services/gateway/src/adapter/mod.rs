//! Device adapters: transport-specific connect/send/receive lifecycles.
//!
//! One adapter instance per device identity, owned by the [`cache`]. All
//! variants share a [`FrameEngine`] for byte accumulation; transport failures
//! are reported as `false`/`None` and logged, never raised as errors.

pub mod cache;
pub mod file_watcher;
pub mod network_client;
pub mod network_server;
pub mod serial;

pub use cache::AdapterCache;
pub use file_watcher::FileWatcherAdapter;
pub use network_client::NetworkClientAdapter;
pub use network_server::NetworkServerAdapter;
pub use serial::SerialPortAdapter;

use crate::config::GatewayConfig;
use crate::error::{AdapterError, Result};
use crate::framing::{FrameEngine, FrameStats, StrategyRegistry};
use async_trait::async_trait;
use gateway_types::{ConnectionParams, Device, MessageIdGenerator, RawMessage};
use std::sync::Arc;

/// Common adapter contract.
///
/// `connect` and `send` return `false` on any transport failure; `receive`
/// waits a bounded time and returns `None` when nothing arrived. Callers poll
/// and retry; nothing here is process-fatal.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// The device this adapter serves.
    fn device(&self) -> &Device;

    /// Establish the transport. Never errors; failures log and return false.
    async fn connect(&self) -> bool;

    /// Tear the transport down and drop buffered state.
    async fn disconnect(&self);

    /// Write a payload to the instrument. False on failure or when the
    /// transport does not support writes.
    async fn send(&self, payload: &[u8]) -> bool;

    /// Next completed message, waiting up to the configured bound.
    async fn receive(&self) -> Option<RawMessage>;

    /// Raw single-sample liveness reading. Only the connection state
    /// verifier should act on this; it is deliberately noisy.
    async fn is_connected(&self) -> bool;

    /// True once `disconnect` has torn this instance down for good. A closed
    /// adapter never yields another message; intake loops use this to exit.
    fn is_closed(&self) -> bool;

    /// Frame engine counters for this adapter.
    fn stats(&self) -> FrameStats;

    /// Run the idle-buffer safety sweep.
    fn sweep_idle_buffer(&self);

    /// Periodic stats emission hook.
    fn log_stats(&self);
}

/// Build the adapter variant matching the device's connection kind.
///
/// Parameter strings are parsed here; a malformed string is a configuration
/// error surfaced to the caller, not a runtime transport failure.
pub fn build_adapter(
    device: Device,
    registry: Arc<StrategyRegistry>,
    ids: Arc<MessageIdGenerator>,
    config: &GatewayConfig,
) -> Result<Arc<dyn DeviceAdapter>> {
    let params = ConnectionParams::parse(device.connection_type, &device.connection_params)
        .map_err(|source| AdapterError::InvalidParams {
            device: device.id.clone(),
            source,
        })?;
    let engine = Arc::new(FrameEngine::new(
        device.clone(),
        registry,
        Arc::clone(&ids),
        config.framing.clone(),
    ));

    let adapter: Arc<dyn DeviceAdapter> = match params {
        ConnectionParams::NetworkClient(p) => Arc::new(NetworkClientAdapter::new(
            device,
            p,
            engine,
            config.transport.clone(),
        )),
        ConnectionParams::NetworkListener(p) => Arc::new(NetworkServerAdapter::new(
            device,
            p,
            engine,
            config.transport.clone(),
        )),
        ConnectionParams::Serial(p) => Arc::new(SerialPortAdapter::new(
            device,
            p,
            engine,
            config.transport.clone(),
        )),
        ConnectionParams::File(p) => Arc::new(FileWatcherAdapter::new(
            device,
            p,
            engine,
            ids,
            config.transport.clone(),
        )),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_types::{ConnectionKind, ConnectionState, DeviceId};

    fn device(kind: ConnectionKind, params: &str) -> Device {
        Device {
            id: DeviceId::from("dev-1"),
            name: "Analyzer".to_string(),
            model: "GENERIC".to_string(),
            manufacturer: None,
            connection_type: kind,
            connection_params: params.to_string(),
            status: ConnectionState::Disconnected,
            description: None,
            message_type: None,
        }
    }

    fn deps() -> (Arc<StrategyRegistry>, Arc<MessageIdGenerator>, GatewayConfig) {
        (
            Arc::new(StrategyRegistry::with_defaults()),
            Arc::new(MessageIdGenerator::new(1)),
            GatewayConfig::from_env(),
        )
    }

    #[test]
    fn factory_builds_each_variant() {
        let (registry, ids, config) = deps();
        for (kind, params) in [
            (ConnectionKind::Network, "10.0.0.5:5100:TCP:CLIENT"),
            (ConnectionKind::Network, "5100:TCP:SERVER"),
            (ConnectionKind::Serial, "/dev/ttyS0:9600:8:1:0"),
            (ConnectionKind::File, "/tmp/inbox:*.hl7:UTF-8:false"),
        ] {
            let adapter = build_adapter(
                device(kind, params),
                Arc::clone(&registry),
                Arc::clone(&ids),
                &config,
            );
            assert!(adapter.is_ok(), "failed for {params}");
        }
    }

    #[test]
    fn factory_rejects_malformed_params() {
        let (registry, ids, config) = deps();
        let err = match build_adapter(device(ConnectionKind::Network, "nonsense"), registry, ids, &config)
        {
            Ok(_) => panic!("expected error"),
            Err(err) => err,
        };
        assert!(matches!(err, AdapterError::InvalidParams { .. }));
    }
}
