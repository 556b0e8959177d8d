//! Adapter cache: single owner of live adapter instances.
//!
//! At most one live transport exists per device identity; everything that
//! needs an adapter goes through here. Invalidation disconnects the
//! superseded adapter before removal so no transport is orphaned.

use super::{build_adapter, DeviceAdapter};
use crate::config::GatewayConfig;
use crate::error::Result;
use crate::framing::StrategyRegistry;
use crate::verifier::StateChangeEvent;
use dashmap::DashMap;
use gateway_types::{ConnectionState, Device, DeviceId, MessageIdGenerator};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AdapterCache {
    adapters: DashMap<DeviceId, Arc<dyn DeviceAdapter>>,
    registry: Arc<StrategyRegistry>,
    ids: Arc<MessageIdGenerator>,
    config: GatewayConfig,
}

impl AdapterCache {
    pub fn new(
        registry: Arc<StrategyRegistry>,
        ids: Arc<MessageIdGenerator>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            adapters: DashMap::new(),
            registry,
            ids,
            config,
        }
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<Arc<dyn DeviceAdapter>> {
        self.adapters.get(device_id).map(|a| Arc::clone(a.value()))
    }

    /// Existing adapter for the device, or a freshly built one.
    pub fn get_or_create(&self, device: &Device) -> Result<Arc<dyn DeviceAdapter>> {
        if let Some(existing) = self.get(&device.id) {
            return Ok(existing);
        }
        let adapter = build_adapter(
            device.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.ids),
            &self.config,
        )?;
        info!(device = %device.id, kind = %device.connection_type, "adapter created");
        self.adapters.insert(device.id.clone(), Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Disconnect and drop the device's adapter, if cached.
    pub async fn invalidate(&self, device_id: &DeviceId) {
        if let Some((_, adapter)) = self.adapters.remove(device_id) {
            adapter.disconnect().await;
            info!(device = %device_id, "adapter invalidated");
        }
    }

    /// Apply a device-config change: rebuild when the transport shape
    /// changed, otherwise keep the live adapter.
    pub async fn refresh(&self, device: &Device) -> Result<Arc<dyn DeviceAdapter>> {
        if let Some(existing) = self.get(&device.id) {
            let unchanged = existing.device().connection_type == device.connection_type
                && existing.device().connection_params == device.connection_params;
            if unchanged {
                return Ok(existing);
            }
            self.invalidate(&device.id).await;
        }
        self.get_or_create(device)
    }

    /// React to a committed state transition from the verifier.
    ///
    /// A confirmed disconnect evicts the adapter so the next use rebuilds and
    /// redials — except listener-mode devices whose listener is still up, as
    /// peers come and go without the listener ever being at fault.
    pub async fn handle_event(&self, event: &StateChangeEvent) {
        match event.to {
            ConnectionState::Connected => {
                debug!(device = %event.device_id, "confirmed connect");
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                if let Some(adapter) = self.get(&event.device_id) {
                    if adapter.device().is_network_server() && adapter.is_connected().await {
                        debug!(device = %event.device_id, "listener still live, keeping adapter");
                        return;
                    }
                }
                self.invalidate(&event.device_id).await;
            }
        }
    }

    /// Snapshot of all live adapters.
    pub fn entries(&self) -> Vec<(DeviceId, Arc<dyn DeviceAdapter>)> {
        self.adapters
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub async fn disconnect_all(&self) {
        for (_, adapter) in self.entries() {
            adapter.disconnect().await;
        }
        self.adapters.clear();
    }
}
