use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::devices::{Device, DeviceReconciler};

use super::cost::NetworkCostProvider;
use super::state::DevicePauseState;

#[derive(Default)]
struct PauseBook {
    states: HashMap<String, DevicePauseState>,
    /// Endpoint a device had when the policy paused it. Pausing drops the
    /// connection, so this stands in for the live address afterwards.
    paused_addresses: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PauseAction {
    Pause,
    Resume,
}

/// Pauses peers reachable only over metered networks and resumes them afterwards,
/// backing off from devices someone else paused or resumed.
pub struct MeteredNetworkMonitor {
    devices: Arc<DeviceReconciler>,
    cost: Arc<dyn NetworkCostProvider>,
    enabled: AtomicBool,
    book: Mutex<PauseBook>,
}

impl MeteredNetworkMonitor {
    pub fn new(
        devices: Arc<DeviceReconciler>,
        cost: Arc<dyn NetworkCostProvider>,
        enabled: bool,
    ) -> Self {
        if enabled && !cost.is_supported() {
            info!("Network cost information unavailable, metered-network pausing disabled");
        }
        Self {
            devices,
            cost,
            enabled: AtomicBool::new(enabled),
            book: Mutex::new(PauseBook::default()),
        }
    }

    pub fn is_supported(&self) -> bool {
        self.cost.is_supported()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.is_supported() && self.is_enabled()
    }

    /// Devices currently paused by this policy.
    pub fn paused_device_ids(&self) -> Vec<String> {
        let book = self.book.lock();
        let mut ids: Vec<_> = book
            .states
            .iter()
            .filter(|(_, state)| **state == DevicePauseState::Paused)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn pause_state(&self, device_id: &str) -> Option<DevicePauseState> {
        self.book.lock().states.get(device_id).copied()
    }

    pub fn on_device_paused(&self, device_id: &str) {
        self.apply_event(device_id, DevicePauseState::on_paused);
    }

    pub fn on_device_resumed(&self, device_id: &str) {
        self.apply_event(device_id, DevicePauseState::on_resumed);
    }

    fn apply_event(&self, device_id: &str, transition: fn(DevicePauseState) -> DevicePauseState) {
        if !self.is_active() {
            return;
        }
        let mut book = self.book.lock();
        let state = book.states.entry(device_id.to_string()).or_default();
        let next = transition(*state);
        if next != *state {
            debug!(device = %device_id, from = ?*state, to = ?next, "Pause state changed");
            *state = next;
        }
        if !matches!(next, DevicePauseState::Paused) {
            book.paused_addresses.remove(device_id);
        }
    }

    /// Forgets manual overrides, e.g. after the network cost or the network list changed.
    pub fn reset_renegades(&self) {
        let mut book = self.book.lock();
        for state in book.states.values_mut() {
            *state = state.reset_renegade();
        }
    }

    /// Brings every non-renegade device's pause flag in line with the network cost.
    pub async fn update(&self) {
        if !self.is_active() {
            return;
        }
        if !self.devices.capabilities().supports_device_pause_resume {
            debug!("Daemon cannot pause devices, skipping metered-network update");
            return;
        }

        for device in self.devices.fetch_all_devices() {
            let Some((action, previous)) = self.decide(&device) else {
                continue;
            };

            let result = match action {
                PauseAction::Pause => {
                    info!(device = %device.id(), "Pausing device on metered network");
                    self.devices.pause(device.id()).await
                }
                PauseAction::Resume => {
                    info!(device = %device.id(), "Resuming device, network no longer metered");
                    self.devices.resume(device.id()).await
                }
            };

            if let Err(e) = result {
                warn!(device = %device.id(), error = %e, ?action, "Pause request failed");
                let mut book = self.book.lock();
                book.states.insert(device.id().to_string(), previous);
                if action == PauseAction::Pause {
                    book.paused_addresses.remove(device.id());
                }
            }
        }
    }

    /// Records the intended state before the request is sent so the echoed
    /// daemon event is not mistaken for a manual change.
    fn decide(&self, device: &Device) -> Option<(PauseAction, DevicePauseState)> {
        let mut book = self.book.lock();
        let previous = *book
            .states
            .entry(device.id().to_string())
            .or_insert_with(|| DevicePauseState::observed(device.is_paused()));
        if previous.is_renegade() {
            return None;
        }

        let remembered = if previous == DevicePauseState::Paused {
            book.paused_addresses.get(device.id()).cloned()
        } else {
            None
        };
        let address = device.address().or(remembered);
        let connected =
            device.is_connected() || (address.is_some() && previous == DevicePauseState::Paused);
        let should_be_paused =
            connected && address.as_deref().is_some_and(|addr| self.cost.is_metered(addr));

        match (should_be_paused, device.is_paused()) {
            (true, false) => {
                book.states.insert(device.id().to_string(), DevicePauseState::Paused);
                if let Some(address) = address {
                    book.paused_addresses.insert(device.id().to_string(), address);
                }
                Some((PauseAction::Pause, previous))
            }
            (false, true) => {
                book.states.insert(device.id().to_string(), DevicePauseState::Unpaused);
                book.paused_addresses.remove(device.id());
                Some((PauseAction::Resume, previous))
            }
            _ => None,
        }
    }

    /// Turns the policy on or off. Turning it off resumes every device it paused.
    pub async fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::SeqCst);
        if enabled {
            if !was_enabled {
                self.update().await;
            }
            return;
        }

        let paused = {
            let mut book = std::mem::take(&mut *self.book.lock());
            book.states
                .drain()
                .filter(|(_, state)| *state == DevicePauseState::Paused)
                .map(|(id, _)| id)
                .collect::<Vec<_>>()
        };
        for device_id in paused {
            info!(device = %device_id, "Resuming device, metered-network pausing disabled");
            if let Err(e) = self.devices.resume(&device_id).await {
                warn!(device = %device_id, error = %e, "Failed to resume device");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metering::{StaticCostProvider, UnsupportedCostProvider};
    use crate::notifications::NotificationBus;
    use crate::syncthing_client::api::SyncthingConfig;
    use crate::syncthing_client::Capabilities;
    use crate::test_support::{connections, device_config, MockApi};

    const METERED: &str = "tcp://10.0.0.5:22000";
    const UNMETERED: &str = "tcp://192.168.1.4:22000";

    fn setup(address: &str) -> (MeteredNetworkMonitor, Arc<DeviceReconciler>, Arc<MockApi>) {
        let api = Arc::new(MockApi::default());
        let devices = Arc::new(DeviceReconciler::new(api.clone(), NotificationBus::default()));
        devices.set_capabilities(Capabilities::all());
        devices.load_snapshot(
            &SyncthingConfig {
                devices: vec![device_config("A", "a")],
                folders: Vec::new(),
            },
            &connections(&[("A", true, address)]),
            None,
        );
        let cost = Arc::new(StaticCostProvider::new(vec!["10.0.".into()]));
        let monitor = MeteredNetworkMonitor::new(devices.clone(), cost, true);
        (monitor, devices, api)
    }

    fn calls(api: &MockApi) -> Vec<(String, String)> {
        api.pause_calls()
    }

    #[tokio::test]
    async fn pauses_device_on_metered_network() {
        let (monitor, devices, api) = setup(METERED);
        monitor.update().await;

        assert_eq!(calls(&api), vec![("pause".to_string(), "A".to_string())]);
        assert_eq!(monitor.paused_device_ids(), vec!["A".to_string()]);

        // The echoed daemon events must not count as a manual change.
        devices.on_device_paused("A");
        monitor.on_device_paused("A");
        devices.on_device_disconnected("A");
        monitor.update().await;
        assert_eq!(calls(&api).len(), 1);
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::Paused));
    }

    #[tokio::test]
    async fn leaves_unmetered_device_alone() {
        let (monitor, _, api) = setup(UNMETERED);
        monitor.update().await;
        assert!(calls(&api).is_empty());
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::Unpaused));
    }

    #[tokio::test]
    async fn external_pause_makes_device_renegade_until_reset() {
        let (monitor, devices, api) = setup(UNMETERED);
        monitor.update().await;

        devices.on_device_paused("A");
        monitor.on_device_paused("A");
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::PausedRenegade));

        monitor.update().await;
        assert!(calls(&api).is_empty());

        monitor.reset_renegades();
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::Paused));
    }

    #[tokio::test]
    async fn external_resume_is_respected() {
        let (monitor, devices, api) = setup(METERED);
        monitor.update().await;
        devices.on_device_paused("A");
        monitor.on_device_paused("A");

        devices.on_device_resumed("A");
        monitor.on_device_resumed("A");
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::UnpausedRenegade));

        monitor.update().await;
        assert_eq!(calls(&api).len(), 1);
    }

    #[tokio::test]
    async fn failed_pause_reverts_local_state() {
        let (monitor, _, api) = setup(METERED);
        api.set_pause_failure(true);
        monitor.update().await;

        assert!(monitor.paused_device_ids().is_empty());
        assert_eq!(monitor.pause_state("A"), Some(DevicePauseState::Unpaused));
    }

    #[tokio::test]
    async fn disabling_resumes_devices_it_paused() {
        let (monitor, devices, api) = setup(METERED);
        monitor.update().await;
        devices.on_device_paused("A");

        monitor.set_enabled(false).await;
        assert_eq!(
            calls(&api),
            vec![
                ("pause".to_string(), "A".to_string()),
                ("resume".to_string(), "A".to_string())
            ]
        );
        assert!(monitor.paused_device_ids().is_empty());
        assert_eq!(monitor.pause_state("A"), None);

        monitor.update().await;
        assert_eq!(calls(&api).len(), 2);
    }

    #[tokio::test]
    async fn unsupported_cost_provider_never_pauses() {
        let (_, devices, api) = setup(METERED);
        let monitor = MeteredNetworkMonitor::new(devices, Arc::new(UnsupportedCostProvider), true);
        assert!(!monitor.is_supported());

        monitor.update().await;
        monitor.on_device_paused("A");
        assert!(calls(&api).is_empty());
        assert_eq!(monitor.pause_state("A"), None);
    }
}
