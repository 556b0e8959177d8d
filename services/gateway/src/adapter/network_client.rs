//! TCP client adapter: actively dials the instrument.

use super::DeviceAdapter;
use crate::config::TransportConfig;
use crate::framing::{FrameEngine, FrameStats};
use async_trait::async_trait;
use gateway_types::{Device, NetworkClientParams, RawMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Dials `host:port`, retrying a fixed number of times with linear pauses.
/// A background read loop feeds received bytes into the frame engine and
/// writes any handshake responses straight back to the socket.
pub struct NetworkClientAdapter {
    device: Device,
    params: NetworkClientParams,
    engine: Arc<FrameEngine>,
    config: TransportConfig,
    connected: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkClientAdapter {
    pub fn new(
        device: Device,
        params: NetworkClientParams,
        engine: Arc<FrameEngine>,
        config: TransportConfig,
    ) -> Self {
        Self {
            device,
            params,
            engine,
            config,
            connected: Arc::new(AtomicBool::new(false)),
            writer: Arc::new(Mutex::new(None)),
            read_task: Mutex::new(None),
        }
    }

    async fn dial(&self) -> Option<TcpStream> {
        let address = format!("{}:{}", self.params.host, self.params.port);
        for attempt in 1..=self.config.connect_attempts {
            match tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(&address))
                .await
            {
                Ok(Ok(stream)) => {
                    info!(device = %self.device.id, %address, attempt, "connected");
                    return Some(stream);
                }
                Ok(Err(err)) => {
                    warn!(device = %self.device.id, %address, attempt, %err, "connect failed");
                }
                Err(_) => {
                    warn!(
                        device = %self.device.id,
                        %address,
                        attempt,
                        timeout_secs = self.config.connect_timeout_secs,
                        "connect timed out"
                    );
                }
            }
            if attempt < self.config.connect_attempts {
                tokio::time::sleep(self.config.connect_pause()).await;
            }
        }
        None
    }
}

#[async_trait]
impl DeviceAdapter for NetworkClientAdapter {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn connect(&self) -> bool {
        if self.connected.load(Ordering::Relaxed) {
            return true;
        }
        let Some(stream) = self.dial().await else {
            return false;
        };
        let (mut read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Relaxed);

        let engine = Arc::clone(&self.engine);
        let writer = Arc::clone(&self.writer);
        let connected = Arc::clone(&self.connected);
        let device_id = self.device.id.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        info!(device = %device_id, "peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        if let Some(response) = engine.on_bytes(&buf[..n]) {
                            let mut guard = writer.lock().await;
                            if let Some(w) = guard.as_mut() {
                                if let Err(err) = w.write_all(&response).await {
                                    warn!(device = %device_id, %err, "handshake response write failed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(device = %device_id, %err, "read failed");
                        break;
                    }
                }
            }
            connected.store(false, Ordering::Relaxed);
        });
        *self.read_task.lock().await = Some(task);
        true
    }

    async fn disconnect(&self) {
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.connected.store(false, Ordering::Relaxed);
        self.engine.close();
        debug!(device = %self.device.id, "disconnected");
    }

    async fn send(&self, payload: &[u8]) -> bool {
        // Short-lived mode dials on demand instead of holding the socket open.
        if !self.params.long_connection
            && !self.connected.load(Ordering::Relaxed)
            && !self.connect().await
        {
            return false;
        }
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => match writer.write_all(payload).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(device = %self.device.id, %err, "send failed");
                    self.connected.store(false, Ordering::Relaxed);
                    false
                }
            },
            None => {
                warn!(device = %self.device.id, "send with no live connection");
                false
            }
        }
    }

    async fn receive(&self) -> Option<RawMessage> {
        self.engine.wait_received(self.config.receive_wait()).await
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FramingConfig, GatewayConfig};
    use crate::framing::StrategyRegistry;
    use gateway_types::{ConnectionKind, ConnectionState, DeviceId, MessageIdGenerator};
    use tokio::net::TcpListener;

    fn device(params: &str) -> Device {
        Device {
            id: DeviceId::from("net-1"),
            name: "Analyzer".to_string(),
            model: "GENERIC".to_string(),
            manufacturer: None,
            connection_type: ConnectionKind::Network,
            connection_params: params.to_string(),
            status: ConnectionState::Disconnected,
            description: None,
            message_type: None,
        }
    }

    fn adapter(host: &str, port: u16) -> NetworkClientAdapter {
        adapter_with(host, port, true)
    }

    fn adapter_with(host: &str, port: u16, long_connection: bool) -> NetworkClientAdapter {
        let device = device(&format!("{host}:{port}:TCP:CLIENT"));
        let engine = Arc::new(FrameEngine::new(
            device.clone(),
            Arc::new(StrategyRegistry::with_defaults()),
            Arc::new(MessageIdGenerator::new(1)),
            FramingConfig::default(),
        ));
        let params = NetworkClientParams {
            host: host.to_string(),
            port,
            protocol: "TCP".to_string(),
            long_connection,
        };
        let mut transport = GatewayConfig::from_env().transport;
        transport.connect_attempts = 1;
        transport.connect_timeout_secs = 1;
        transport.receive_wait_secs = 2;
        NetworkClientAdapter::new(device, params, engine, transport)
    }

    #[tokio::test]
    async fn connect_failure_returns_false() {
        // Port 1 on loopback: nothing listens there.
        let adapter = adapter("127.0.0.1", 1);
        assert!(!adapter.connect().await);
        assert!(!adapter.is_connected().await);
    }

    #[tokio::test]
    async fn receives_framed_message_from_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"MSH|test|\r").await.unwrap();
        });

        let adapter = adapter("127.0.0.1", port);
        assert!(adapter.connect().await);
        let message = adapter.receive().await.expect("framed message");
        assert_eq!(message.raw_content, "MSH|test|\r");
        server.await.unwrap();
        adapter.disconnect().await;
        assert!(!adapter.is_connected().await);
    }

    #[tokio::test]
    async fn send_without_connection_is_false() {
        let adapter = adapter("127.0.0.1", 1);
        assert!(!adapter.send(b"ping").await);
    }

    #[tokio::test]
    async fn short_lived_mode_dials_on_demand_for_send() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16];
            let n = socket.read(&mut buf).await.unwrap();
            buf.truncate(n);
            buf
        });

        // No prior connect: long_connection=false makes send establish one.
        let adapter = adapter_with("127.0.0.1", port, false);
        assert!(adapter.send(b"QRY|1|\r").await);
        assert_eq!(server.await.unwrap(), b"QRY|1|\r");
        adapter.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_closes_the_engine_and_unblocks_receive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _keep = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let adapter = Arc::new(adapter("127.0.0.1", port));
        assert!(adapter.connect().await);
        let receiver = {
            let adapter = Arc::clone(&adapter);
            tokio::spawn(async move { adapter.receive().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        adapter.disconnect().await;
        assert!(receiver.await.unwrap().is_none());
        assert!(adapter.is_closed());
    }
}
