//! TCP listener adapter: instruments dial in.

use super::DeviceAdapter;
use crate::config::TransportConfig;
use crate::framing::{FrameEngine, FrameStats};
use async_trait::async_trait;
use dashmap::DashMap;
use gateway_types::{Device, NetworkListenerParams, RawMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Binds a port and accepts any number of concurrent peers. Every peer's
/// bytes feed the shared frame engine; handshake responses go back on the
/// originating socket. `send` broadcasts and succeeds if at least one peer
/// accepted the write. `is_connected` reflects listener liveness, not peer
/// presence.
pub struct NetworkServerAdapter {
    device: Device,
    params: NetworkListenerParams,
    engine: Arc<FrameEngine>,
    config: TransportConfig,
    listening: Arc<AtomicBool>,
    peers: Arc<DashMap<SocketAddr, Arc<Mutex<OwnedWriteHalf>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    peer_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl NetworkServerAdapter {
    pub fn new(
        device: Device,
        params: NetworkListenerParams,
        engine: Arc<FrameEngine>,
        config: TransportConfig,
    ) -> Self {
        Self {
            device,
            params,
            engine,
            config,
            listening: Arc::new(AtomicBool::new(false)),
            peers: Arc::new(DashMap::new()),
            accept_task: Mutex::new(None),
            peer_tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Live peer count, for diagnostics.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

#[async_trait]
impl DeviceAdapter for NetworkServerAdapter {
    fn device(&self) -> &Device {
        &self.device
    }

    async fn connect(&self) -> bool {
        if self.listening.load(Ordering::Relaxed) {
            return true;
        }
        let bind = format!("0.0.0.0:{}", self.params.port);
        let listener = match TcpListener::bind(&bind).await {
            Ok(listener) => listener,
            Err(err) => {
                warn!(device = %self.device.id, %bind, %err, "bind failed");
                return false;
            }
        };
        info!(device = %self.device.id, %bind, "listening");
        self.listening.store(true, Ordering::Relaxed);

        let engine = Arc::clone(&self.engine);
        let peers = Arc::clone(&self.peers);
        let peer_tasks = Arc::clone(&self.peer_tasks);
        let listening = Arc::clone(&self.listening);
        let device_id = self.device.id.clone();
        let task = tokio::spawn(async move {
            loop {
                let (socket, addr) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(device = %device_id, %err, "accept failed");
                        listening.store(false, Ordering::Relaxed);
                        break;
                    }
                };
                info!(device = %device_id, peer = %addr, "peer connected");
                let (mut read_half, write_half) = socket.into_split();
                let writer = Arc::new(Mutex::new(write_half));
                peers.insert(addr, Arc::clone(&writer));

                let engine = Arc::clone(&engine);
                let peers = Arc::clone(&peers);
                let device_id = device_id.clone();
                let peer_task = tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        match read_half.read(&mut buf).await {
                            Ok(0) => {
                                info!(device = %device_id, peer = %addr, "peer disconnected");
                                break;
                            }
                            Ok(n) => {
                                if let Some(response) = engine.on_bytes(&buf[..n]) {
                                    let mut w = writer.lock().await;
                                    if let Err(err) = w.write_all(&response).await {
                                        warn!(device = %device_id, peer = %addr, %err, "response write failed");
                                        break;
                                    }
                                }
                            }
                            Err(err) => {
                                warn!(device = %device_id, peer = %addr, %err, "peer read failed");
                                break;
                            }
                        }
                    }
                    peers.remove(&addr);
                });
                peer_tasks.lock().await.push(peer_task);
            }
        });
        *self.accept_task.lock().await = Some(task);
        true
    }

    async fn disconnect(&self) {
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        for task in self.peer_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.peers.clear();
        self.listening.store(false, Ordering::Relaxed);
        self.engine.close();
        debug!(device = %self.device.id, "listener closed");
    }

    /// Broadcast to every live peer. Success means at least one accepted.
    async fn send(&self, payload: &[u8]) -> bool {
        // Snapshot the peer set first; awaiting a write while holding a
        // DashMap shard guard would block the read loops' removals.
        let targets: Vec<(SocketAddr, Arc<Mutex<OwnedWriteHalf>>)> = self
            .peers
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        let mut delivered = false;
        let mut dead = Vec::new();
        for (addr, writer) in targets {
            let mut writer = writer.lock().await;
            match writer.write_all(payload).await {
                Ok(()) => delivered = true,
                Err(err) => {
                    warn!(device = %self.device.id, peer = %addr, %err, "broadcast write failed");
                    dead.push(addr);
                }
            }
        }
        for addr in dead {
            self.peers.remove(&addr);
        }
        if !delivered {
            warn!(device = %self.device.id, "broadcast reached no peers");
        }
        delivered
    }

    async fn receive(&self) -> Option<RawMessage> {
        self.engine.wait_received(self.config.receive_wait()).await
    }

    async fn is_connected(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
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
