mod queries;
mod service;
mod types;

pub use queries::{DeviceQuery, EventStreamQuery, FolderQuery};
pub use service::SyncthingApi;
pub use types::{
    ConnectionState, ConnectionTotals, ConnectionsResponse, DeviceConfig, FolderConfig,
    FolderDevice, FolderStatus, IgnoresResponse, RawEvent, SyncthingConfig, SystemStatus,
    SystemVersion,
};
