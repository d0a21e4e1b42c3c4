use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::folders::FolderError;
use crate::syncthing_client::api::{FolderStatus, RawEvent};
use crate::types::MonitorError;

/// A typed event from the daemon's event feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: u64,
    pub time: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    DeviceConnected {
        device_id: String,
        address: Option<String>,
    },
    DeviceDisconnected {
        device_id: String,
        error: Option<String>,
    },
    DevicePaused {
        device_id: String,
    },
    DeviceResumed {
        device_id: String,
    },
    StateChanged {
        folder_id: String,
        from: String,
        to: String,
    },
    FolderSummary {
        folder_id: String,
        summary: FolderStatus,
    },
    FolderErrors {
        folder_id: String,
        errors: Vec<FolderError>,
    },
    ItemStarted {
        folder_id: String,
        item: String,
        item_type: ItemType,
        action: ItemAction,
    },
    ItemFinished {
        folder_id: String,
        item: String,
        item_type: ItemType,
        action: ItemAction,
        error: Option<String>,
    },
    DownloadProgress {
        progress: Vec<ItemProgress>,
    },
    ConfigSaved,
    StartupComplete,
    /// A well-formed event the engine has no use for.
    Other {
        event_type: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Directory,
    Other,
}

impl ItemType {
    fn parse(raw: &str) -> Self {
        match raw {
            "file" | "FILE_INFO_TYPE_FILE" => ItemType::File,
            "dir" | "directory" | "FILE_INFO_TYPE_DIRECTORY" => ItemType::Directory,
            _ => ItemType::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    Update,
    Delete,
    Metadata,
    Other,
}

impl ItemAction {
    fn parse(raw: &str) -> Self {
        match raw {
            "update" => ItemAction::Update,
            "delete" => ItemAction::Delete,
            "metadata" => ItemAction::Metadata,
            _ => ItemAction::Other,
        }
    }
}

/// One file's entry of a `DownloadProgress` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemProgress {
    pub folder_id: String,
    pub item: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

#[derive(Deserialize)]
struct DeviceConnectedData {
    id: String,
    #[serde(default)]
    addr: Option<String>,
}

#[derive(Deserialize)]
struct DeviceDisconnectedData {
    id: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct DevicePauseData {
    device: String,
}

#[derive(Deserialize)]
struct StateChangedData {
    folder: String,
    #[serde(default)]
    from: String,
    to: String,
}

#[derive(Deserialize)]
struct FolderSummaryData {
    folder: String,
    summary: FolderStatus,
}

#[derive(Deserialize)]
struct FolderErrorsData {
    folder: String,
    #[serde(default)]
    errors: Vec<FolderError>,
}

#[derive(Deserialize)]
struct ItemData {
    folder: String,
    item: String,
    #[serde(default, rename = "type")]
    item_type: String,
    #[serde(default)]
    action: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct FileProgressData {
    #[serde(default, rename = "bytesDone")]
    bytes_done: u64,
    #[serde(default, rename = "bytesTotal")]
    bytes_total: u64,
}

impl Event {
    /// Converts the wire envelope into a typed event.
    ///
    /// Unknown event types become [`EventKind::Other`]; a known type whose
    /// payload does not match its schema is a [`MonitorError::MalformedEvent`].
    pub fn from_raw(raw: RawEvent) -> Result<Self, MonitorError> {
        let id = raw.id;
        let time = DateTime::parse_from_rfc3339(&raw.time)
            .map_err(|err| malformed(id, format!("bad timestamp {:?}: {err}", raw.time)))?
            .with_timezone(&Utc);

        let kind = match raw.event_type.as_str() {
            "DeviceConnected" => {
                let data: DeviceConnectedData = parse_data(id, raw.data)?;
                EventKind::DeviceConnected {
                    device_id: data.id,
                    address: data.addr.filter(|addr| !addr.is_empty()),
                }
            }
            "DeviceDisconnected" => {
                let data: DeviceDisconnectedData = parse_data(id, raw.data)?;
                EventKind::DeviceDisconnected {
                    device_id: data.id,
                    error: data.error,
                }
            }
            "DevicePaused" => {
                let data: DevicePauseData = parse_data(id, raw.data)?;
                EventKind::DevicePaused {
                    device_id: data.device,
                }
            }
            "DeviceResumed" => {
                let data: DevicePauseData = parse_data(id, raw.data)?;
                EventKind::DeviceResumed {
                    device_id: data.device,
                }
            }
            "StateChanged" => {
                let data: StateChangedData = parse_data(id, raw.data)?;
                EventKind::StateChanged {
                    folder_id: data.folder,
                    from: data.from,
                    to: data.to,
                }
            }
            "FolderSummary" => {
                let data: FolderSummaryData = parse_data(id, raw.data)?;
                EventKind::FolderSummary {
                    folder_id: data.folder,
                    summary: data.summary,
                }
            }
            "FolderErrors" => {
                let data: FolderErrorsData = parse_data(id, raw.data)?;
                EventKind::FolderErrors {
                    folder_id: data.folder,
                    errors: data.errors,
                }
            }
            "ItemStarted" => {
                let data: ItemData = parse_data(id, raw.data)?;
                EventKind::ItemStarted {
                    folder_id: data.folder,
                    item: data.item,
                    item_type: ItemType::parse(&data.item_type),
                    action: ItemAction::parse(&data.action),
                }
            }
            "ItemFinished" => {
                let data: ItemData = parse_data(id, raw.data)?;
                EventKind::ItemFinished {
                    folder_id: data.folder,
                    item: data.item,
                    item_type: ItemType::parse(&data.item_type),
                    action: ItemAction::parse(&data.action),
                    error: data.error.filter(|err| !err.is_empty()),
                }
            }
            "DownloadProgress" => {
                let data: HashMap<String, HashMap<String, FileProgressData>> =
                    parse_data(id, raw.data)?;
                let mut progress: Vec<ItemProgress> = data
                    .into_iter()
                    .flat_map(|(folder_id, files)| {
                        files.into_iter().map(move |(item, file)| ItemProgress {
                            folder_id: folder_id.clone(),
                            item,
                            bytes_done: file.bytes_done,
                            bytes_total: file.bytes_total,
                        })
                    })
                    .collect();
                // Map order is arbitrary; keep application deterministic.
                progress.sort_by(|a, b| (&a.folder_id, &a.item).cmp(&(&b.folder_id, &b.item)));
                EventKind::DownloadProgress { progress }
            }
            "ConfigSaved" => EventKind::ConfigSaved,
            "StartupComplete" => EventKind::StartupComplete,
            other => EventKind::Other {
                event_type: other.to_string(),
            },
        };

        Ok(Self { id, time, kind })
    }
}

fn parse_data<T: DeserializeOwned>(id: u64, data: Value) -> Result<T, MonitorError> {
    serde_json::from_value(data).map_err(|err| malformed(id, err.to_string()))
}

fn malformed(id: u64, reason: String) -> MonitorError {
    MonitorError::MalformedEvent { id, reason }
}
