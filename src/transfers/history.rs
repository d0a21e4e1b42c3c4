use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::events::{ItemAction, ItemType};
use crate::folders::{FolderSyncState, SyncStateTransition};
use crate::notifications::{Notification, NotificationBus};

use super::transfer::{FailingTransfer, FileTransfer};

pub const DEFAULT_COMPLETED_CAPACITY: usize = 100;

/// (folder ID, item path)
type TransferKey = (String, String);

#[derive(Default)]
struct HistoryState {
    in_progress: HashMap<TransferKey, FileTransfer>,
    failing: HashMap<TransferKey, FailingTransfer>,
    recently_synchronized: HashMap<String, Vec<FileTransfer>>,
    completed: VecDeque<FileTransfer>,
}

/// Derives file transfers from item events and folder sync-state transitions.
///
/// All maps live behind one lock, held for a single logical operation.
/// Notifications are published after the lock is released.
pub struct TransferHistory {
    bus: NotificationBus,
    capacity: usize,
    state: Mutex<HistoryState>,
}

impl TransferHistory {
    pub fn new(bus: NotificationBus, capacity: usize) -> Self {
        Self {
            bus,
            capacity: capacity.max(1),
            state: Mutex::new(HistoryState::default()),
        }
    }

    /// Completed transfers, oldest first.
    pub fn completed_transfers(&self) -> Vec<FileTransfer> {
        self.state.lock().completed.iter().cloned().collect()
    }

    pub fn in_progress_transfers(&self) -> Vec<FileTransfer> {
        let mut transfers: Vec<_> = self.state.lock().in_progress.values().cloned().collect();
        transfers.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.path.cmp(&b.path)));
        transfers
    }

    pub fn failing_transfers(&self) -> Vec<FailingTransfer> {
        let mut failing: Vec<_> = self.state.lock().failing.values().cloned().collect();
        failing.sort_by(|a, b| (&a.folder_id, &a.path).cmp(&(&b.folder_id, &b.path)));
        failing
    }

    /// Transfers finished in the folder's current sync cycle.
    pub fn recently_synchronized(&self, folder_id: &str) -> Vec<FileTransfer> {
        self.state
            .lock()
            .recently_synchronized
            .get(folder_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn on_item_started(
        &self,
        folder_id: &str,
        item: &str,
        item_type: ItemType,
        action: ItemAction,
        now: DateTime<Utc>,
    ) {
        if !is_tracked(item_type, action) {
            return;
        }

        let started = {
            let mut state = self.state.lock();
            let key = key(folder_id, item);
            if state.in_progress.contains_key(&key) {
                None
            } else {
                let transfer = FileTransfer::new(folder_id, item, item_type, action, now);
                state.in_progress.insert(key, transfer.clone());
                Some(transfer)
            }
        };

        if let Some(transfer) = started {
            debug!(folder = %folder_id, item = %item, "Transfer started");
            self.bus.emit(Notification::TransferStarted(transfer));
        }
    }

    pub fn on_download_progress(
        &self,
        folder_id: &str,
        item: &str,
        bytes_done: u64,
        bytes_total: u64,
        now: DateTime<Utc>,
    ) {
        let transfer = {
            let mut state = self.state.lock();
            let transfer = state
                .in_progress
                .entry(key(folder_id, item))
                .or_insert_with(|| {
                    FileTransfer::new(folder_id, item, ItemType::File, ItemAction::Update, now)
                });
            transfer.record_progress(bytes_done, bytes_total, now);
            transfer.clone()
        };

        self.bus.emit(Notification::TransferStateChanged(transfer));
    }

    pub fn on_item_finished(
        &self,
        folder_id: &str,
        item: &str,
        item_type: ItemType,
        action: ItemAction,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        if !is_tracked(item_type, action) {
            return;
        }

        let transfer = {
            let mut state = self.state.lock();
            let key = key(folder_id, item);
            let mut transfer = state
                .in_progress
                .remove(&key)
                .unwrap_or_else(|| FileTransfer::new(folder_id, item, item_type, action, now));

            let is_new_error = match &error {
                Some(message) => {
                    let is_new = state
                        .failing
                        .get(&key)
                        .map_or(true, |previous| previous.error != *message);
                    state.failing.insert(
                        key.clone(),
                        FailingTransfer {
                            folder_id: folder_id.to_string(),
                            path: item.to_string(),
                            error: message.clone(),
                            is_new_error: is_new,
                            failed_at: now,
                        },
                    );
                    is_new
                }
                None => {
                    state.failing.remove(&key);
                    false
                }
            };

            transfer.complete(error, is_new_error, now);
            self.archive(&mut state, transfer.clone());
            transfer
        };

        self.bus.emit(Notification::TransferStateChanged(transfer.clone()));
        self.bus.emit(Notification::TransferCompleted(transfer));
    }

    /// Closes a folder's sync cycle once it stops syncing.
    ///
    /// Transfers still in flight for that folder missed their finish event and
    /// are completed here; the cycle's transfers are then published together.
    pub fn on_sync_state_changed(&self, transition: &SyncStateTransition, now: DateTime<Utc>) {
        if transition.old_state != FolderSyncState::Syncing
            || transition.new_state == FolderSyncState::Syncing
        {
            return;
        }

        let folder_id = transition.folder_id.as_str();
        let (orphans, finished) = {
            let mut state = self.state.lock();
            let keys: Vec<TransferKey> = state
                .in_progress
                .keys()
                .filter(|(folder, _)| folder == folder_id)
                .cloned()
                .collect();

            let mut orphans = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(mut transfer) = state.in_progress.remove(&key) {
                    transfer.complete(None, false, now);
                    self.archive(&mut state, transfer.clone());
                    orphans.push(transfer);
                }
            }
            orphans.sort_by(|a, b| a.path.cmp(&b.path));

            let finished = state
                .recently_synchronized
                .remove(folder_id)
                .unwrap_or_default();
            (orphans, finished)
        };

        if !orphans.is_empty() {
            debug!(folder = %folder_id, count = orphans.len(), "Completed orphaned transfers");
        }
        for transfer in orphans {
            self.bus.emit(Notification::TransferStateChanged(transfer.clone()));
            self.bus.emit(Notification::TransferCompleted(transfer));
        }

        if !finished.is_empty() {
            self.bus.emit(Notification::FolderSynchronizationFinished {
                folder_id: folder_id.to_string(),
                transfers: finished,
            });
        }
    }

    fn archive(&self, state: &mut HistoryState, transfer: FileTransfer) {
        state
            .recently_synchronized
            .entry(transfer.folder_id.clone())
            .or_default()
            .push(transfer.clone());
        state.completed.push_back(transfer);
        while state.completed.len() > self.capacity {
            state.completed.pop_front();
        }
    }
}

fn key(folder_id: &str, item: &str) -> TransferKey {
    (folder_id.to_string(), item.to_string())
}

/// Metadata-only changes and non-file items are not transfers.
fn is_tracked(item_type: ItemType, action: ItemAction) -> bool {
    matches!(item_type, ItemType::File | ItemType::Directory)
        && matches!(action, ItemAction::Update | ItemAction::Delete)
}
