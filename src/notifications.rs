//! Change notifications published to consumers (UI, IPC).

use tokio::sync::broadcast;

use crate::folders::{FolderError, FolderSyncState};
use crate::syncthing_client::api::FolderStatus;
use crate::transfers::FileTransfer;

#[derive(Debug, Clone)]
pub enum Notification {
    DeviceConnected {
        device_id: String,
        address: Option<String>,
    },
    DeviceDisconnected {
        device_id: String,
    },
    DevicePaused {
        device_id: String,
    },
    DeviceResumed {
        device_id: String,
    },

    /// The published folder set was replaced.
    FoldersChanged,
    FolderSyncStateChanged {
        folder_id: String,
        old_state: FolderSyncState,
        new_state: FolderSyncState,
    },
    FolderStatusChanged {
        folder_id: String,
        status: FolderStatus,
    },
    /// An empty `errors` list means the folder's errors were cleared.
    FolderErrorsChanged {
        folder_id: String,
        errors: Vec<FolderError>,
    },

    TransferStarted(FileTransfer),
    TransferStateChanged(FileTransfer),
    TransferCompleted(FileTransfer),
    FolderSynchronizationFinished {
        folder_id: String,
        transfers: Vec<FileTransfer>,
    },

    /// The daemon dropped events between two polls.
    EventsSkipped,
}

/// Multicast bus for [`Notification`]s.
///
/// Publishing never blocks; slow subscribers observe `RecvError::Lagged`.
#[derive(Clone)]
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn emit(&self, notification: Notification) {
        // No receivers is fine
        let _ = self.sender.send(notification);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
