//! Instrument gateway composition root.
//!
//! Explicit wiring, no container: config from the environment, devices from a
//! TOML manifest, every periodic job an explicit `tokio::time::interval` loop.

use anyhow::{Context, Result};
use dashmap::DashMap;
use gateway_service::adapter::AdapterCache;
use gateway_service::config::GatewayConfig;
use gateway_service::framing::StrategyRegistry;
use gateway_service::intake;
use gateway_service::manifest;
use gateway_service::output::Forwarder;
use gateway_service::parser::PassthroughParser;
use gateway_service::processor::BatchProcessor;
use gateway_service::queue::MessageQueue;
use gateway_service::retry::RetryRegistry;
use gateway_service::verifier::{ConnectionStateVerifier, StateChangeEvent};
use gateway_types::{Device, DeviceId, MessageIdGenerator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    config
        .validate()
        .map_err(|reason| anyhow::anyhow!(reason))
        .context("invalid configuration")?;
    info!(devices_file = %config.devices_file, "starting instrument gateway");

    let device_list = manifest::load_devices(&config.devices_file)
        .context("loading device manifest")?;
    let devices: Arc<DashMap<DeviceId, Device>> = Arc::new(DashMap::new());
    for device in device_list {
        devices.insert(device.id.clone(), device);
    }

    let ids = Arc::new(MessageIdGenerator::new(config.node_id));
    let registry = Arc::new(StrategyRegistry::with_defaults());
    let cache = Arc::new(AdapterCache::new(
        Arc::clone(&registry),
        Arc::clone(&ids),
        config.clone(),
    ));

    let queue = Arc::new(MessageQueue::new(config.processor.queue_capacity));
    let retry = Arc::new(RetryRegistry::new(config.retry.clone()));
    let forwarder = Arc::new(Forwarder::new(config.forward.clone()));
    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&queue),
        Arc::new(PassthroughParser),
        forwarder,
        Arc::clone(&retry),
        config.processor.clone(),
    ));

    let (events_tx, mut events_rx) = mpsc::channel::<StateChangeEvent>(64);
    let verifier = Arc::new(ConnectionStateVerifier::new(
        config.verifier.clone(),
        events_tx,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // State-change consumer: commit to the device table, let the cache react.
    {
        let devices = Arc::clone(&devices);
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if let Some(mut device) = devices.get_mut(&event.device_id) {
                    device.status = event.to;
                }
                cache.handle_event(&event).await;
            }
        });
    }

    // Bring every device up and start its intake loop.
    for entry in devices.iter() {
        let device = entry.value().clone();
        let adapter = match cache.get_or_create(&device) {
            Ok(adapter) => adapter,
            Err(err) => {
                error!(device = %device.id, %err, "adapter construction failed, skipping");
                continue;
            }
        };
        if !adapter.connect().await {
            warn!(device = %device.id, "initial connect failed, verifier will keep trying");
        }
        tokio::spawn(intake::pump(
            adapter,
            Arc::clone(&queue),
            shutdown_rx.clone(),
        ));
    }

    // Batch processing tick, retry re-enqueue included.
    {
        let processor = Arc::clone(&processor);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_millis(config.processor.process_interval_ms);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        processor.run_retry_pass();
                        processor.run_batch().await;
                    }
                }
            }
        });
    }

    // Connection verification poll.
    {
        let devices = Arc::clone(&devices);
        let cache = Arc::clone(&cache);
        let verifier = Arc::clone(&verifier);
        let mut shutdown = shutdown_rx.clone();
        let queue_for_intake = Arc::clone(&queue);
        let intake_shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(config.verifier.poll_interval_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        for entry in devices.iter() {
                            let device = entry.value().clone();
                            let had_adapter = cache.get(&device.id).is_some();
                            let adapter = match cache.get_or_create(&device) {
                                Ok(adapter) => adapter,
                                Err(err) => {
                                    error!(device = %device.id, %err, "adapter rebuild failed");
                                    continue;
                                }
                            };
                            // An evicted adapter was rebuilt: redial and
                            // restart its intake loop.
                            if !had_adapter {
                                adapter.connect().await;
                                tokio::spawn(intake::pump(
                                    Arc::clone(&adapter),
                                    Arc::clone(&queue_for_intake),
                                    intake_shutdown.clone(),
                                ));
                            } else if !adapter.is_connected().await {
                                adapter.connect().await;
                            }
                            verifier.verify(&device, &adapter).await;
                        }
                    }
                }
            }
        });
    }

    // Idle-buffer sweep.
    {
        let cache = Arc::clone(&cache);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_millis(config.framing.buffer_timeout_ms.max(1_000) / 2);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        for (_, adapter) in cache.entries() {
                            adapter.sweep_idle_buffer();
                        }
                    }
                }
            }
        });
    }

    // Retry registry sweep.
    {
        let retry = Arc::clone(&retry);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(config.retry.sweep_interval_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        let removed = retry.sweep();
                        if removed > 0 {
                            info!(removed, "retry registry swept");
                        }
                    }
                }
            }
        });
    }

    // Periodic stats.
    {
        let processor = Arc::clone(&processor);
        let cache = Arc::clone(&cache);
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(config.processor.stats_interval_secs);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await; // skip the immediate first tick
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tick.tick() => {
                        processor.log_and_reset_stats();
                        for (_, adapter) in cache.entries() {
                            adapter.log_stats();
                        }
                    }
                }
            }
        });
    }

    info!(devices = devices.len(), "instrument gateway running");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    let _ = shutdown_tx.send(true);
    cache.disconnect_all().await;
    info!("all adapters disconnected, bye");
    Ok(())
}
