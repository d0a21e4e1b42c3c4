use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::devices::{Device, DeviceReconciler, DeviceSnapshot};
use crate::events::{Event, EventHandler, EventKind, EventPoller, PollerSettings, Resync};
use crate::folders::{fetch_folder_sources, Folder, FolderReconciler, SyncStateTransition};
use crate::metering::{MeteredNetworkMonitor, NetworkCostProvider};
use crate::notifications::{Notification, NotificationBus};
use crate::syncthing_client::api::SyncthingApi;
use crate::syncthing_client::Capabilities;
use crate::transfers::{FailingTransfer, FileTransfer, TransferHistory};
use crate::types::MonitorError;

/// Everything downstream of the poller, shared with the event handler.
struct Components {
    api: Arc<dyn SyncthingApi>,
    bus: NotificationBus,
    devices: Arc<DeviceReconciler>,
    folders: Arc<FolderReconciler>,
    transfers: Arc<TransferHistory>,
    metering: Arc<MeteredNetworkMonitor>,
    local_device_id: Mutex<Option<String>>,
    /// Held while an event or a snapshot is applied. A reload keeps it across
    /// its fetches so no event lands between fetching and applying.
    apply_gate: tokio::sync::Mutex<()>,
}

impl Components {
    /// Re-fetches devices and folders and reconciles them against what is published.
    ///
    /// All fetches complete before anything is replaced, so a failure leaves
    /// the published state untouched.
    async fn reload(&self) -> Result<(), MonitorError> {
        let _applying = self.apply_gate.lock().await;
        let config = self.api.fetch_config().await?;
        let connections = self.api.fetch_connections().await?;
        let sources = fetch_folder_sources(self.api.as_ref(), &config).await?;

        let local_device_id = self.local_device_id.lock().clone();
        self.devices
            .reload_snapshot(&config, &connections, local_device_id.as_deref());
        let transitions = self.folders.reload_snapshot(sources);
        self.apply_transitions(&transitions);

        self.metering.update().await;
        Ok(())
    }

    fn apply_transitions(&self, transitions: &[SyncStateTransition]) {
        let now = Utc::now();
        for transition in transitions {
            self.transfers.on_sync_state_changed(transition, now);
        }
    }
}

/// Routes typed events to the reconcilers, the transfer history and the metering policy.
///
/// Runs on the poller's single worker. Reloads are requested from the poller,
/// which runs them between batches; pause requests are spawned.
struct EngineHandler {
    components: Arc<Components>,
}

impl EngineHandler {
    fn spawn_metering_update(&self) {
        let metering = Arc::clone(&self.components.metering);
        tokio::spawn(async move {
            metering.update().await;
        });
    }
}

#[async_trait]
impl EventHandler for EngineHandler {
    async fn handle_event(&self, event: Event) -> Resync {
        let c = &self.components;
        let _applying = c.apply_gate.lock().await;
        let now = event.time;

        match event.kind {
            EventKind::DeviceConnected { device_id, address } => {
                if c.devices.on_device_connected(&device_id, address) {
                    self.spawn_metering_update();
                }
            }
            EventKind::DeviceDisconnected { device_id, error } => {
                if let Some(error) = error {
                    debug!(device = %device_id, error = %error, "Device disconnected");
                }
                c.devices.on_device_disconnected(&device_id);
            }
            EventKind::DevicePaused { device_id } => {
                if c.devices.on_device_paused(&device_id) {
                    c.metering.on_device_paused(&device_id);
                }
            }
            EventKind::DeviceResumed { device_id } => {
                if c.devices.on_device_resumed(&device_id) {
                    c.metering.on_device_resumed(&device_id);
                }
            }
            EventKind::StateChanged { folder_id, to, .. } => {
                if let Some(transition) = c.folders.on_state_changed(&folder_id, &to) {
                    c.transfers.on_sync_state_changed(&transition, now);
                }
            }
            EventKind::FolderSummary { folder_id, summary } => {
                if let Some(transition) = c.folders.on_summary(&folder_id, summary) {
                    c.transfers.on_sync_state_changed(&transition, now);
                }
            }
            EventKind::FolderErrors { folder_id, errors } => {
                c.folders.on_errors(&folder_id, errors);
            }
            EventKind::ItemStarted {
                folder_id,
                item,
                item_type,
                action,
            } => {
                if c.folders.on_item_started(&folder_id, &item) {
                    c.transfers
                        .on_item_started(&folder_id, &item, item_type, action, now);
                }
            }
            EventKind::ItemFinished {
                folder_id,
                item,
                item_type,
                action,
                error,
            } => {
                if c.folders.on_item_finished(&folder_id, &item) {
                    c.transfers
                        .on_item_finished(&folder_id, &item, item_type, action, error, now);
                }
            }
            EventKind::DownloadProgress { progress } => {
                for entry in progress {
                    if c.folders.try_fetch_folder_by_id(&entry.folder_id).is_none() {
                        trace!(folder = %entry.folder_id, item = %entry.item, "Progress for unknown folder ignored");
                        continue;
                    }
                    c.transfers.on_download_progress(
                        &entry.folder_id,
                        &entry.item,
                        entry.bytes_done,
                        entry.bytes_total,
                        now,
                    );
                }
            }
            EventKind::ConfigSaved | EventKind::StartupComplete => {
                debug!(id = event.id, "Daemon configuration or lifecycle changed");
                return Resync::Needed;
            }
            EventKind::Other { event_type } => {
                trace!(event_type = %event_type, id = event.id, "Ignoring event");
            }
        }
        Resync::NotNeeded
    }

    async fn events_skipped(&self) {
        self.components.bus.emit(Notification::EventsSkipped);
    }

    async fn resync(&self) {
        debug!("Reloading snapshots");
        if let Err(e) = self.components.reload().await {
            warn!(error = %e, "Snapshot reload failed");
        }
    }
}

/// Keeps in-memory models of a Syncthing daemon's devices, folders and transfers
/// current by combining snapshots with the event feed.
pub struct SyncEngine {
    components: Arc<Components>,
    poller: EventPoller,
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn SyncthingApi>,
        config: &Config,
        cost: Arc<dyn NetworkCostProvider>,
    ) -> Self {
        let bus = NotificationBus::default();
        let devices = Arc::new(DeviceReconciler::new(Arc::clone(&api), bus.clone()));
        let folders = Arc::new(FolderReconciler::new(bus.clone()));
        let transfers = Arc::new(TransferHistory::new(
            bus.clone(),
            config.completed_history_capacity,
        ));
        let metering = Arc::new(MeteredNetworkMonitor::new(
            Arc::clone(&devices),
            cost,
            config.metering_enabled,
        ));

        let components = Arc::new(Components {
            api: Arc::clone(&api),
            bus,
            devices,
            folders,
            transfers,
            metering,
            local_device_id: Mutex::new(None),
            apply_gate: tokio::sync::Mutex::new(()),
        });
        let handler = Arc::new(EngineHandler {
            components: Arc::clone(&components),
        });
        let poller = EventPoller::new(api, handler, PollerSettings::from(config));

        Self { components, poller }
    }

    /// Loads the initial snapshots and starts following the event feed.
    pub async fn start(&self) -> Result<(), MonitorError> {
        let c = &self.components;

        let version = c.api.fetch_version().await?;
        let capabilities = Capabilities::from_version(&version);
        info!(version = %version.version, ?capabilities, "Connected to Syncthing");
        c.devices.set_capabilities(capabilities);

        let status = c.api.fetch_system_status().await?;
        let config = c.api.fetch_config().await?;
        let connections = c.api.fetch_connections().await?;
        let sources = fetch_folder_sources(c.api.as_ref(), &config).await?;

        *c.local_device_id.lock() = status.my_id.clone();
        c.devices
            .load_snapshot(&config, &connections, status.my_id.as_deref());
        c.folders.load_snapshot(sources);

        c.metering.update().await;
        self.poller.start();
        Ok(())
    }

    pub async fn stop(&self) {
        self.poller.stop().await;
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    /// Forces a full device and folder reload. Waits for any event being applied.
    pub async fn reload(&self) -> Result<(), MonitorError> {
        self.components.reload().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.components.bus.subscribe()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.components.devices.capabilities()
    }

    pub fn try_fetch_device_by_id(&self, device_id: &str) -> Option<Arc<Device>> {
        self.components.devices.try_fetch_device_by_id(device_id)
    }

    pub fn fetch_all_devices(&self) -> Vec<Arc<Device>> {
        self.components.devices.fetch_all_devices()
    }

    /// Point-in-time copies of every device, e.g. for display or serialization.
    pub fn device_snapshots(&self) -> Vec<DeviceSnapshot> {
        self.components
            .devices
            .fetch_all_devices()
            .iter()
            .map(|device| device.snapshot())
            .collect()
    }

    pub fn try_fetch_folder_by_id(&self, folder_id: &str) -> Option<Arc<Folder>> {
        self.components.folders.try_fetch_folder_by_id(folder_id)
    }

    pub fn fetch_all_folders(&self) -> Vec<Arc<Folder>> {
        self.components.folders.fetch_all_folders()
    }

    pub fn completed_transfers(&self) -> Vec<FileTransfer> {
        self.components.transfers.completed_transfers()
    }

    pub fn in_progress_transfers(&self) -> Vec<FileTransfer> {
        self.components.transfers.in_progress_transfers()
    }

    pub fn failing_transfers(&self) -> Vec<FailingTransfer> {
        self.components.transfers.failing_transfers()
    }

    pub fn paused_device_ids(&self) -> Vec<String> {
        self.components.metering.paused_device_ids()
    }

    pub async fn pause_device(&self, device_id: &str) -> Result<(), MonitorError> {
        self.components.devices.pause(device_id).await
    }

    pub async fn resume_device(&self, device_id: &str) -> Result<(), MonitorError> {
        self.components.devices.resume(device_id).await
    }

    pub fn is_metering_supported(&self) -> bool {
        self.components.metering.is_supported()
    }

    pub async fn set_metering_enabled(&self, enabled: bool) {
        self.components.metering.set_enabled(enabled).await;
    }

    /// Call when the network cost or the set of metered networks changed.
    pub async fn network_changed(&self) {
        self.components.metering.reset_renegades();
        self.components.metering.update().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folders::FolderSyncState;
    use crate::metering::{StaticCostProvider, UnsupportedCostProvider};
    use crate::syncthing_client::api::SyncthingConfig;
    use crate::test_support::{
        connections, device_config, drain, folder_config, raw_event, MockApi,
    };
    use serde_json::json;
    use std::time::Duration;

    fn mock_daemon() -> Arc<MockApi> {
        let api = Arc::new(MockApi::default());
        api.set_my_id("ME");
        api.set_config(SyncthingConfig {
            devices: vec![device_config("ME", "this"), device_config("PEER", "peer")],
            folders: vec![folder_config("docs", "Documents")],
        });
        api.set_connections(connections(&[("PEER", true, "tcp://192.168.1.4:22000")]));
        api.set_folder_status("docs", "idle");
        api
    }

    fn test_config() -> Config {
        Config {
            poll_initial_delay_ms: 0,
            poll_retry_delay_ms: 5,
            ..Config::default()
        }
    }

    async fn next_matching(
        rx: &mut broadcast::Receiver<Notification>,
        predicate: impl Fn(&Notification) -> bool,
    ) -> Notification {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(notification) if predicate(&notification) => return notification,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for notification")
    }

    #[tokio::test]
    async fn start_loads_snapshots_without_local_device() {
        let api = mock_daemon();
        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        engine.start().await.unwrap();

        assert!(engine.try_fetch_device_by_id("ME").is_none());
        let peer = engine.try_fetch_device_by_id("PEER").unwrap();
        assert!(peer.is_connected());
        assert_eq!(engine.fetch_all_folders().len(), 1);
        assert!(engine.capabilities().supports_device_pause_resume);
        assert!(engine.is_running());

        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn sync_cycle_produces_transfers_and_finish_notification() {
        let api = mock_daemon();
        api.push_events(vec![raw_event(1, "Starting", json!({}))]);
        api.push_events(vec![
            raw_event(2, "StateChanged", json!({"folder": "docs", "from": "idle", "to": "syncing"})),
            raw_event(
                3,
                "ItemStarted",
                json!({"folder": "docs", "item": "a.txt", "type": "file", "action": "update"}),
            ),
            raw_event(
                4,
                "DownloadProgress",
                json!({"docs": {"a.txt": {"bytesDone": 50, "bytesTotal": 100}}}),
            ),
            raw_event(
                5,
                "ItemStarted",
                json!({"folder": "docs", "item": "b.txt", "type": "file", "action": "update"}),
            ),
            raw_event(
                6,
                "ItemFinished",
                json!({"folder": "docs", "item": "a.txt", "type": "file", "action": "update", "error": null}),
            ),
            raw_event(7, "StateChanged", json!({"folder": "docs", "from": "syncing", "to": "idle"})),
        ]);

        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        let mut rx = engine.subscribe();
        engine.start().await.unwrap();

        let finished = next_matching(&mut rx, |n| {
            matches!(n, Notification::FolderSynchronizationFinished { .. })
        })
        .await;
        engine.stop().await;

        let Notification::FolderSynchronizationFinished { folder_id, transfers } = finished else {
            unreachable!();
        };
        assert_eq!(folder_id, "docs");
        let paths: Vec<_> = transfers.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);

        assert_eq!(engine.completed_transfers().len(), 2);
        assert!(engine.in_progress_transfers().is_empty());
        let folder = engine.try_fetch_folder_by_id("docs").unwrap();
        assert_eq!(folder.sync_state(), FolderSyncState::Idle);
    }

    #[tokio::test]
    async fn skipped_events_trigger_reload() {
        let api = mock_daemon();
        api.push_events(vec![raw_event(10, "Starting", json!({}))]);

        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        let mut rx = engine.subscribe();
        engine.start().await.unwrap();

        api.set_config(SyncthingConfig {
            devices: vec![device_config("PEER", "peer"), device_config("NEW", "new")],
            folders: vec![folder_config("docs", "Documents")],
        });
        api.set_connections(connections(&[
            ("PEER", true, "tcp://192.168.1.4:22000"),
            ("NEW", true, "tcp://192.168.1.5:22000"),
        ]));
        api.push_events(vec![raw_event(15, "Ping", json!({}))]);

        next_matching(&mut rx, |n| matches!(n, Notification::EventsSkipped)).await;
        next_matching(&mut rx, |n| {
            matches!(n, Notification::DeviceConnected { device_id, .. } if device_id == "NEW")
        })
        .await;
        engine.stop().await;

        assert!(engine.try_fetch_device_by_id("NEW").is_some());
    }

    #[tokio::test]
    async fn metering_pauses_peer_on_metered_network_at_start() {
        let api = mock_daemon();
        let config = Config {
            metering_enabled: true,
            ..test_config()
        };
        let cost = Arc::new(StaticCostProvider::new(vec!["192.168.".into()]));
        let engine = SyncEngine::new(api.clone(), &config, cost);
        engine.start().await.unwrap();
        engine.stop().await;

        assert!(engine.is_metering_supported());
        assert_eq!(api.pause_calls(), vec![("pause".to_string(), "PEER".to_string())]);
        assert_eq!(engine.paused_device_ids(), vec!["PEER".to_string()]);
    }

    #[tokio::test]
    async fn start_fails_when_folder_status_is_unavailable() {
        let api = Arc::new(MockApi::default());
        api.set_config(SyncthingConfig {
            devices: Vec::new(),
            folders: vec![folder_config("broken", "Broken")],
        });

        let engine = SyncEngine::new(api, &test_config(), Arc::new(UnsupportedCostProvider));
        assert!(engine.start().await.is_err());
        assert!(!engine.is_running());
        assert!(engine.fetch_all_folders().is_empty());
    }

    #[tokio::test]
    async fn item_events_for_unknown_folder_create_no_transfers() {
        let api = mock_daemon();
        api.push_events(vec![raw_event(1, "Starting", json!({}))]);
        api.push_events(vec![
            raw_event(
                2,
                "ItemStarted",
                json!({"folder": "ghost", "item": "x.bin", "type": "file", "action": "update"}),
            ),
            raw_event(
                3,
                "ItemFinished",
                json!({"folder": "ghost", "item": "y.bin", "type": "file", "action": "update", "error": "boom"}),
            ),
            raw_event(
                4,
                "DownloadProgress",
                json!({"ghost": {"x.bin": {"bytesDone": 5, "bytesTotal": 10}}}),
            ),
            raw_event(5, "StateChanged", json!({"folder": "docs", "from": "idle", "to": "syncing"})),
        ]);

        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        let mut rx = engine.subscribe();
        engine.start().await.unwrap();

        next_matching(&mut rx, |n| {
            matches!(n, Notification::FolderSyncStateChanged { folder_id, .. } if folder_id == "docs")
        })
        .await;
        engine.stop().await;

        assert!(engine.in_progress_transfers().is_empty());
        assert!(engine.completed_transfers().is_empty());
        assert!(engine.failing_transfers().is_empty());
        assert!(engine.try_fetch_folder_by_id("ghost").is_none());
        assert!(!drain(&mut rx).iter().any(|n| matches!(
            n,
            Notification::TransferStarted(_)
                | Notification::TransferStateChanged(_)
                | Notification::TransferCompleted(_)
        )));
    }

    #[tokio::test]
    async fn events_wait_for_an_in_flight_reload() {
        let api = mock_daemon();
        api.push_events(vec![raw_event(1, "Starting", json!({}))]);

        let engine = Arc::new(SyncEngine::new(
            api.clone(),
            &test_config(),
            Arc::new(UnsupportedCostProvider),
        ));
        let mut rx = engine.subscribe();
        engine.start().await.unwrap();

        // The reload fetches a snapshot that still shows PEER connected, and
        // the disconnect arrives while that fetch is outstanding.
        api.set_config_delay(Duration::from_millis(150));
        let reloading = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move { engine.reload().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        api.push_events(vec![raw_event(
            2,
            "DeviceDisconnected",
            json!({"id": "PEER", "error": "reset"}),
        )]);

        next_matching(&mut rx, |n| {
            matches!(n, Notification::DeviceDisconnected { device_id } if device_id == "PEER")
        })
        .await;
        reloading.await.unwrap().unwrap();
        engine.stop().await;

        assert!(!engine.try_fetch_device_by_id("PEER").unwrap().is_connected());
    }

    #[tokio::test]
    async fn daemon_restart_re_anchors_and_reloads() {
        let api = mock_daemon();
        api.push_events(vec![raw_event(40, "Starting", json!({}))]);

        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        let mut rx = engine.subscribe();
        engine.start().await.unwrap();

        api.set_config(SyncthingConfig {
            devices: vec![device_config("PEER", "peer"), device_config("NEW", "new")],
            folders: vec![folder_config("docs", "Documents")],
        });
        api.set_connections(connections(&[
            ("PEER", true, "tcp://192.168.1.4:22000"),
            ("NEW", true, "tcp://192.168.1.5:22000"),
        ]));
        api.push_event_disconnect();
        api.push_events(vec![raw_event(3, "StartupComplete", json!({}))]);

        next_matching(&mut rx, |n| {
            matches!(n, Notification::DeviceConnected { device_id, .. } if device_id == "NEW")
        })
        .await;
        engine.stop().await;

        assert!(api.event_calls().iter().filter(|call| **call == (0, Some(1))).count() >= 2);
    }

    #[tokio::test]
    async fn pause_is_unsupported_on_old_daemon() {
        let api = mock_daemon();
        api.set_version("v0.11.26");

        let engine = SyncEngine::new(api.clone(), &test_config(), Arc::new(UnsupportedCostProvider));
        engine.start().await.unwrap();
        engine.stop().await;

        assert!(!engine.capabilities().supports_device_pause_resume);
        assert!(matches!(
            engine.pause_device("PEER").await,
            Err(MonitorError::Unsupported(_))
        ));
        assert!(matches!(
            engine.resume_device("PEER").await,
            Err(MonitorError::Unsupported(_))
        ));
        assert!(api.pause_calls().is_empty());
    }

    #[tokio::test]
    async fn device_snapshots_reflect_live_state() {
        let api = mock_daemon();
        let engine = SyncEngine::new(api, &test_config(), Arc::new(UnsupportedCostProvider));
        engine.start().await.unwrap();
        engine.stop().await;

        assert_eq!(
            engine.device_snapshots(),
            vec![DeviceSnapshot {
                id: "PEER".into(),
                name: "peer".into(),
                connected: true,
                address: Some("tcp://192.168.1.4:22000".into()),
                paused: false,
            }]
        );
    }
}
