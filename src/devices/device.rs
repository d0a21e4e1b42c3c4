use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use serde::Serialize;

/// A peer known to the daemon.
///
/// Identity is the device ID; connection and pause state change in place as
/// events arrive.
#[derive(Debug)]
pub struct Device {
    id: String,
    name: String,
    state: RwLock<DeviceState>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DeviceState {
    connected: bool,
    address: Option<String>,
    paused: bool,
}

/// Point-in-time copy of a [`Device`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub connected: bool,
    pub address: Option<String>,
    pub paused: bool,
}

impl Device {
    pub fn new(id: String, name: String, connected: bool, address: Option<String>, paused: bool) -> Self {
        Self {
            id,
            name,
            state: RwLock::new(DeviceState {
                connected,
                address: if connected { address } else { None },
                paused,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }

    /// Connection endpoint, only present while connected.
    pub fn address(&self) -> Option<String> {
        self.state.read().address.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().paused
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state.read();
        DeviceSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            connected: state.connected,
            address: state.address.clone(),
            paused: state.paused,
        }
    }

    pub(crate) fn set_connected(&self, address: Option<String>) {
        let mut state = self.state.write();
        state.connected = true;
        state.address = address;
    }

    pub(crate) fn set_disconnected(&self) {
        let mut state = self.state.write();
        state.connected = false;
        state.address = None;
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.state.write().paused = paused;
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
