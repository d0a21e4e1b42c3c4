//! Keeps queryable models of a Syncthing daemon's devices, folders and file
//! transfers in step with its REST API and event feed.

pub mod config;
pub mod devices;
pub mod engine;
pub mod events;
pub mod folders;
pub mod metering;
pub mod notifications;
pub mod syncthing_client;
pub mod transfers;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use engine::SyncEngine;
pub use notifications::{Notification, NotificationBus};
pub use syncthing_client::SyncthingClient;
pub use types::MonitorError;
