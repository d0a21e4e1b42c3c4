//! Scripted daemon and fixtures shared by the in-module tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::notifications::Notification;
use crate::syncthing_client::api::{
    ConnectionState, ConnectionsResponse, DeviceConfig, FolderConfig, FolderStatus, RawEvent,
    SyncthingApi, SyncthingConfig, SystemStatus, SystemVersion,
};
use crate::types::MonitorError;

/// In-memory stand-in for the daemon's REST API.
///
/// Event batches are served in the order they were pushed; once the script is
/// exhausted `fetch_events` behaves like a long poll that timed out.
#[derive(Default)]
pub struct MockApi {
    event_script: Mutex<VecDeque<Result<Vec<RawEvent>, MonitorError>>>,
    event_calls: Mutex<Vec<(u64, Option<u32>)>>,
    config: Mutex<SyncthingConfig>,
    config_delay: Mutex<Duration>,
    connections: Mutex<ConnectionsResponse>,
    folder_statuses: Mutex<HashMap<String, FolderStatus>>,
    ignores: Mutex<HashMap<String, Vec<String>>>,
    my_id: Mutex<Option<String>>,
    version: Mutex<Option<String>>,
    pause_calls: Mutex<Vec<(String, String)>>,
    fail_pauses: AtomicBool,
}

impl MockApi {
    pub fn push_events(&self, events: Vec<RawEvent>) {
        self.event_script.lock().push_back(Ok(events));
    }

    pub fn push_event_error(&self) {
        self.event_script
            .lock()
            .push_back(Err(MonitorError::Syncthing("scripted event failure".to_string())));
    }

    /// The poll fails the way it does while the daemon is down or restarting.
    pub fn push_event_disconnect(&self) {
        self.event_script
            .lock()
            .push_back(Err(MonitorError::Unreachable("connection refused".to_string())));
    }

    pub fn event_calls(&self) -> Vec<(u64, Option<u32>)> {
        self.event_calls.lock().clone()
    }

    pub fn set_config(&self, config: SyncthingConfig) {
        *self.config.lock() = config;
    }

    /// Makes every `fetch_config` take this long before answering.
    pub fn set_config_delay(&self, delay: Duration) {
        *self.config_delay.lock() = delay;
    }

    pub fn set_connections(&self, connections: ConnectionsResponse) {
        *self.connections.lock() = connections;
    }

    pub fn set_folder_status(&self, folder_id: &str, state: &str) {
        self.folder_statuses.lock().insert(
            folder_id.to_string(),
            FolderStatus {
                state: state.to_string(),
                ..FolderStatus::default()
            },
        );
    }

    pub fn set_ignores(&self, folder_id: &str, patterns: Vec<String>) {
        self.ignores.lock().insert(folder_id.to_string(), patterns);
    }

    pub fn set_my_id(&self, device_id: &str) {
        *self.my_id.lock() = Some(device_id.to_string());
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock() = Some(version.to_string());
    }

    /// `("pause" | "resume", device ID)` in call order.
    pub fn pause_calls(&self) -> Vec<(String, String)> {
        self.pause_calls.lock().clone()
    }

    pub fn set_pause_failure(&self, fail: bool) {
        self.fail_pauses.store(fail, Ordering::SeqCst);
    }

    fn record_pause(&self, action: &str, device_id: &str) -> Result<(), MonitorError> {
        if self.fail_pauses.load(Ordering::SeqCst) {
            return Err(MonitorError::Syncthing(format!("{action} rejected")));
        }
        self.pause_calls
            .lock()
            .push((action.to_string(), device_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl SyncthingApi for MockApi {
    async fn fetch_events(
        &self,
        since: u64,
        limit: Option<u32>,
        _timeout: Duration,
    ) -> Result<Vec<RawEvent>, MonitorError> {
        self.event_calls.lock().push((since, limit));
        let next = self.event_script.lock().pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_config(&self) -> Result<SyncthingConfig, MonitorError> {
        let delay = *self.config_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.config.lock().clone())
    }

    async fn fetch_connections(&self) -> Result<ConnectionsResponse, MonitorError> {
        Ok(self.connections.lock().clone())
    }

    async fn fetch_folder_status(&self, folder_id: &str) -> Result<FolderStatus, MonitorError> {
        self.folder_statuses
            .lock()
            .get(folder_id)
            .cloned()
            .ok_or_else(|| MonitorError::Syncthing(format!("no such folder: {folder_id}")))
    }

    async fn fetch_ignores(&self, folder_id: &str) -> Result<Vec<String>, MonitorError> {
        Ok(self.ignores.lock().get(folder_id).cloned().unwrap_or_default())
    }

    async fn fetch_system_status(&self) -> Result<SystemStatus, MonitorError> {
        Ok(SystemStatus {
            my_id: self.my_id.lock().clone(),
        })
    }

    async fn fetch_version(&self) -> Result<SystemVersion, MonitorError> {
        Ok(SystemVersion {
            version: self
                .version
                .lock()
                .clone()
                .unwrap_or_else(|| "v1.27.0".to_string()),
            long_version: None,
        })
    }

    async fn pause_device(&self, device_id: &str) -> Result<(), MonitorError> {
        self.record_pause("pause", device_id)
    }

    async fn resume_device(&self, device_id: &str) -> Result<(), MonitorError> {
        self.record_pause("resume", device_id)
    }
}

/// An event envelope timestamped `id` seconds after a fixed epoch.
pub fn raw_event(id: u64, event_type: &str, data: Value) -> RawEvent {
    let base = DateTime::<Utc>::from_timestamp(1_714_564_800, 0).unwrap_or_default();
    let time = base + chrono::Duration::seconds(id as i64);
    RawEvent {
        id,
        event_type: event_type.to_string(),
        time: time.to_rfc3339(),
        data,
    }
}

/// `(device ID, connected, address)` triples.
pub fn connections(entries: &[(&str, bool, &str)]) -> ConnectionsResponse {
    ConnectionsResponse {
        total: None,
        connections: entries
            .iter()
            .map(|(id, connected, address)| {
                (
                    id.to_string(),
                    ConnectionState {
                        connected: *connected,
                        address: Some(address.to_string()),
                        ..ConnectionState::default()
                    },
                )
            })
            .collect(),
    }
}

pub fn device_config(id: &str, name: &str) -> DeviceConfig {
    DeviceConfig {
        device_id: id.to_string(),
        name: Some(name.to_string()),
        paused: None,
    }
}

pub fn folder_config(id: &str, label: &str) -> FolderConfig {
    FolderConfig {
        id: id.to_string(),
        label: Some(label.to_string()),
        path: Some(format!("/data/{id}")),
        paused: None,
        devices: Vec::new(),
    }
}

/// Everything published so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    let mut notifications = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        notifications.push(notification);
    }
    notifications
}
