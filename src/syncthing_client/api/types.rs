use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncthingConfig {
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FolderConfig {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub paused: Option<bool>,
    #[serde(default)]
    pub devices: Vec<FolderDevice>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FolderDevice {
    #[serde(rename = "deviceID")]
    pub device_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub paused: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionsResponse {
    #[serde(default)]
    pub total: Option<ConnectionTotals>,
    #[serde(default)]
    pub connections: HashMap<String, ConnectionState>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionTotals {
    #[serde(default, rename = "inBytesTotal")]
    pub in_bytes_total: u64,
    #[serde(default, rename = "outBytesTotal")]
    pub out_bytes_total: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionState {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, rename = "clientVersion")]
    pub client_version: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

/// Response of `/rest/db/status`, also carried by `FolderSummary` events.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FolderStatus {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub global_bytes: u64,
    #[serde(default)]
    pub global_files: u64,
    #[serde(default)]
    pub in_sync_bytes: u64,
    #[serde(default)]
    pub need_bytes: u64,
    #[serde(default)]
    pub need_files: u64,
    #[serde(default)]
    pub local_bytes: u64,
    #[serde(default)]
    pub errors: u64,
}

impl FolderStatus {
    /// Folder completion percentage based on global and needed bytes.
    pub fn completion(&self) -> f64 {
        if self.global_bytes == 0 {
            return 100.0;
        }
        let complete = self.global_bytes.saturating_sub(self.need_bytes);
        ((complete as f64 / self.global_bytes as f64) * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IgnoresResponse {
    #[serde(default)]
    pub ignore: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SystemStatus {
    #[serde(default, rename = "myID")]
    pub my_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SystemVersion {
    pub version: String,
    #[serde(default, rename = "longVersion")]
    pub long_version: Option<String>,
}

/// Event envelope as delivered by `/rest/events`; `data` depends on `type`.
#[derive(Debug, Deserialize, Clone)]
pub struct RawEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: String,
    #[serde(default)]
    pub data: Value,
}
