use std::time::Duration;

use async_trait::async_trait;

use crate::types::MonitorError;

use super::types::{
    ConnectionsResponse, FolderStatus, RawEvent, SyncthingConfig, SystemStatus, SystemVersion,
};

/// The subset of the Syncthing REST API the engine consumes.
///
/// Implemented over HTTP by [`SyncthingClient`](crate::syncthing_client::SyncthingClient).
/// Everything above this trait is transport-agnostic.
#[async_trait]
pub trait SyncthingApi: Send + Sync {
    /// Long-poll for events newer than `since`, optionally limited to the last `limit` events.
    async fn fetch_events(
        &self,
        since: u64,
        limit: Option<u32>,
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, MonitorError>;

    async fn fetch_config(&self) -> Result<SyncthingConfig, MonitorError>;

    async fn fetch_connections(&self) -> Result<ConnectionsResponse, MonitorError>;

    async fn fetch_folder_status(&self, folder_id: &str) -> Result<FolderStatus, MonitorError>;

    async fn fetch_ignores(&self, folder_id: &str) -> Result<Vec<String>, MonitorError>;

    async fn fetch_system_status(&self) -> Result<SystemStatus, MonitorError>;

    async fn fetch_version(&self) -> Result<SystemVersion, MonitorError>;

    async fn pause_device(&self, device_id: &str) -> Result<(), MonitorError>;

    async fn resume_device(&self, device_id: &str) -> Result<(), MonitorError>;
}
