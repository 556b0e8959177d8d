//! Serial-port adapter.

use super::DeviceAdapter;
use crate::config::TransportConfig;
use crate::framing::{FrameEngine, FrameStats};
use async_trait::async_trait;
use gateway_types::{Device, Parity, RawMessage, SerialParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Opens a named port with baud/data/stop/parity settings and runs a read
/// loop that feeds the frame engine, exactly like the network paths.
pub struct SerialPortAdapter {
    device: Device,
    params: SerialParams,
    engine: Arc<FrameEngine>,
    config: TransportConfig,
    connected: Arc<AtomicBool>,
    writer: Arc<Mutex<Option<WriteHalf<SerialStream>>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl SerialPortAdapter {
    pub fn new(
        device: Device,
        params: SerialParams,
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

    fn open_stream(&self) -> Option<SerialStream> {
        let data_bits = match self.params.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                warn!(device = %self.device.id, data_bits = other, "unsupported data bits");
                return None;
            }
        };
        let stop_bits = match self.params.stop_bits {
            1 => tokio_serial::StopBits::One,
            2 => tokio_serial::StopBits::Two,
            other => {
                warn!(device = %self.device.id, stop_bits = other, "unsupported stop bits");
                return None;
            }
        };
        let parity = match self.params.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
            other => {
                // The async serial stack has no mark/space support.
                warn!(device = %self.device.id, parity = ?other, "unsupported parity");
                return None;
            }
        };

        match tokio_serial::new(&self.params.port_name, self.params.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .timeout(self.config.connect_timeout())
            .open_native_async()
        {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(
                    device = %self.device.id,
                    port = %self.params.port_name,
                    %err,
                    "serial open failed"
                );
                None
            }
        }
    }
}

#[async_trait]
impl DeviceAdapter for SerialPortAdapter {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn connect(&self) -> bool {
        if self.connected.load(Ordering::Relaxed) {
            return true;
        }
        let Some(stream) = self.open_stream() else {
            return false;
        };
        info!(
            device = %self.device.id,
            port = %self.params.port_name,
            baud = self.params.baud_rate,
            "serial port opened"
        );
        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        self.connected.store(true, Ordering::Relaxed);

        let engine = Arc::clone(&self.engine);
        let writer = Arc::clone(&self.writer);
        let connected = Arc::clone(&self.connected);
        let device_id = self.device.id.clone();
        let task = tokio::spawn(async move {
            let mut read_half: ReadHalf<SerialStream> = read_half;
            let mut buf = vec![0u8; 1024];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) => {
                        info!(device = %device_id, "serial stream ended");
                        break;
                    }
                    Ok(n) => {
                        if let Some(response) = engine.on_bytes(&buf[..n]) {
                            let mut guard = writer.lock().await;
                            if let Some(w) = guard.as_mut() {
                                if let Err(err) = w.write_all(&response).await {
                                    warn!(device = %device_id, %err, "serial response write failed");
                                    break;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        warn!(device = %device_id, %err, "serial read failed");
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
        self.writer.lock().await.take();
        self.connected.store(false, Ordering::Relaxed);
        self.engine.close();
        debug!(device = %self.device.id, "serial port closed");
    }

    async fn send(&self, payload: &[u8]) -> bool {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => match writer.write_all(payload).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(device = %self.device.id, %err, "serial send failed");
                    self.connected.store(false, Ordering::Relaxed);
                    false
                }
            },
            None => {
                warn!(device = %self.device.id, "serial send with no open port");
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

    fn adapter(parity: Parity) -> SerialPortAdapter {
        let device = Device {
            id: DeviceId::from("ser-1"),
            name: "Analyzer".to_string(),
            model: "GENERIC".to_string(),
            manufacturer: None,
            connection_type: ConnectionKind::Serial,
            connection_params: "/dev/null-port:9600:8:1:0".to_string(),
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
        let params = SerialParams {
            port_name: "/dev/null-port".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity,
        };
        SerialPortAdapter::new(device, params, engine, GatewayConfig::from_env().transport)
    }

    #[tokio::test]
    async fn connect_to_missing_port_returns_false() {
        let adapter = adapter(Parity::None);
        assert!(!adapter.connect().await);
        assert!(!adapter.is_connected().await);
    }

    #[tokio::test]
    async fn mark_parity_is_refused_without_panicking() {
        let adapter = adapter(Parity::Mark);
        assert!(!adapter.connect().await);
    }

    #[tokio::test]
    async fn send_without_open_port_is_false() {
        let adapter = adapter(Parity::None);
        assert!(!adapter.send(b"ping").await);
    }
}
