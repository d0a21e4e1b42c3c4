use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::notifications::{Notification, NotificationBus};
use crate::syncthing_client::api::{ConnectionsResponse, SyncthingApi, SyncthingConfig};
use crate::syncthing_client::Capabilities;
use crate::types::MonitorError;

use super::device::Device;

pub type DeviceMap = HashMap<String, Arc<Device>>;

/// Owns the published set of devices.
///
/// The map is copy-on-write: reconciliation builds a new map and swaps it in,
/// readers `load()` without locking. Event-driven changes mutate the
/// individual [`Device`] in place.
pub struct DeviceReconciler {
    api: Arc<dyn SyncthingApi>,
    bus: NotificationBus,
    devices: ArcSwap<DeviceMap>,
    write_lock: Mutex<()>,
    capabilities: Mutex<Capabilities>,
}

impl DeviceReconciler {
    pub fn new(api: Arc<dyn SyncthingApi>, bus: NotificationBus) -> Self {
        Self {
            api,
            bus,
            devices: ArcSwap::from_pointee(DeviceMap::new()),
            write_lock: Mutex::new(()),
            capabilities: Mutex::new(Capabilities::default()),
        }
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.lock() = capabilities;
    }

    pub fn capabilities(&self) -> Capabilities {
        *self.capabilities.lock()
    }

    pub fn try_fetch_device_by_id(&self, device_id: &str) -> Option<Arc<Device>> {
        self.devices.load().get(device_id).cloned()
    }

    pub fn fetch_all_devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<_> = self.devices.load().values().cloned().collect();
        devices.sort_by(|a, b| a.name().to_lowercase().cmp(&b.name().to_lowercase()));
        devices
    }

    /// Publishes the initial device set without emitting notifications.
    pub fn load_snapshot(
        &self,
        config: &SyncthingConfig,
        connections: &ConnectionsResponse,
        local_device_id: Option<&str>,
    ) {
        let _guard = self.write_lock.lock();
        let devices = build_devices(config, connections, local_device_id);
        info!(count = devices.len(), "Loaded devices");
        self.devices.store(Arc::new(devices));
    }

    /// Replaces the device set, announcing only devices whose connectedness changed.
    pub fn reload_snapshot(
        &self,
        config: &SyncthingConfig,
        connections: &ConnectionsResponse,
        local_device_id: Option<&str>,
    ) {
        let _guard = self.write_lock.lock();
        let previous = self.devices.load_full();
        let devices = build_devices(config, connections, local_device_id);

        let mut changes = Vec::new();
        for (id, device) in &devices {
            let was_connected = previous
                .get(id)
                .map(|old| old.is_connected())
                .unwrap_or(false);
            if device.is_connected() != was_connected {
                changes.push(connection_notification(device));
            }
        }
        for (id, old) in previous.iter() {
            if !devices.contains_key(id) && old.is_connected() {
                changes.push(Notification::DeviceDisconnected {
                    device_id: id.clone(),
                });
            }
        }

        debug!(count = devices.len(), changes = changes.len(), "Reloaded devices");
        self.devices.store(Arc::new(devices));
        for change in changes {
            self.bus.emit(change);
        }
    }

    pub fn on_device_connected(&self, device_id: &str, address: Option<String>) -> bool {
        let Some(device) = self.lookup(device_id, "DeviceConnected") else {
            return false;
        };
        device.set_connected(address.clone());
        self.bus.emit(Notification::DeviceConnected {
            device_id: device_id.to_string(),
            address,
        });
        true
    }

    pub fn on_device_disconnected(&self, device_id: &str) -> bool {
        let Some(device) = self.lookup(device_id, "DeviceDisconnected") else {
            return false;
        };
        device.set_disconnected();
        self.bus.emit(Notification::DeviceDisconnected {
            device_id: device_id.to_string(),
        });
        true
    }

    pub fn on_device_paused(&self, device_id: &str) -> bool {
        let Some(device) = self.lookup(device_id, "DevicePaused") else {
            return false;
        };
        device.set_paused(true);
        self.bus.emit(Notification::DevicePaused {
            device_id: device_id.to_string(),
        });
        true
    }

    pub fn on_device_resumed(&self, device_id: &str) -> bool {
        let Some(device) = self.lookup(device_id, "DeviceResumed") else {
            return false;
        };
        device.set_paused(false);
        self.bus.emit(Notification::DeviceResumed {
            device_id: device_id.to_string(),
        });
        true
    }

    /// Asks the daemon to pause a device. The local flag follows the resulting event.
    pub async fn pause(&self, device_id: &str) -> Result<(), MonitorError> {
        self.ensure_pause_supported(device_id)?;
        self.api.pause_device(device_id).await
    }

    pub async fn resume(&self, device_id: &str) -> Result<(), MonitorError> {
        self.ensure_pause_supported(device_id)?;
        self.api.resume_device(device_id).await
    }

    fn ensure_pause_supported(&self, device_id: &str) -> Result<(), MonitorError> {
        if !self.capabilities().supports_device_pause_resume {
            return Err(MonitorError::Unsupported(
                "device pause/resume requires Syncthing 0.12 or newer".to_string(),
            ));
        }
        if self.try_fetch_device_by_id(device_id).is_none() {
            return Err(MonitorError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, device_id: &str, event: &str) -> Option<Arc<Device>> {
        let device = self.try_fetch_device_by_id(device_id);
        if device.is_none() {
            warn!(device = %device_id, event, "Event for unknown device ignored");
        }
        device
    }
}

fn connection_notification(device: &Device) -> Notification {
    if device.is_connected() {
        Notification::DeviceConnected {
            device_id: device.id().to_string(),
            address: device.address(),
        }
    } else {
        Notification::DeviceDisconnected {
            device_id: device.id().to_string(),
        }
    }
}

/// Builds the device set from config plus live connections; the first entry of a duplicated ID wins.
fn build_devices(
    config: &SyncthingConfig,
    connections: &ConnectionsResponse,
    local_device_id: Option<&str>,
) -> DeviceMap {
    let mut devices = DeviceMap::new();
    for entry in &config.devices {
        if entry.device_id.is_empty() || local_device_id == Some(entry.device_id.as_str()) {
            continue;
        }
        if devices.contains_key(&entry.device_id) {
            debug!(device = %entry.device_id, "Duplicate device in config ignored");
            continue;
        }

        let connection = connections.connections.get(&entry.device_id);
        let connected = connection.map(|c| c.connected).unwrap_or(false);
        let address = connection
            .and_then(|c| c.address.clone())
            .filter(|addr| !addr.is_empty());
        let paused = entry.paused.unwrap_or(false) || connection.map(|c| c.paused).unwrap_or(false);
        let name = entry
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| entry.device_id.clone());

        devices.insert(
            entry.device_id.clone(),
            Arc::new(Device::new(entry.device_id.clone(), name, connected, address, paused)),
        );
    }
    devices
}
