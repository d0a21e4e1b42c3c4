use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::syncthing_client::api::FolderStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FolderSyncState {
    #[default]
    Idle,
    Scanning,
    Syncing,
    Error,
}

impl FolderSyncState {
    /// Maps the daemon's free-text folder state onto the closed set; unknown states are `Idle`.
    pub fn from_daemon_state(raw: &str) -> Self {
        match raw {
            "idle" | "cleaning" | "clean-waiting" => FolderSyncState::Idle,
            "scanning" | "scan-waiting" => FolderSyncState::Scanning,
            "syncing" | "sync-waiting" | "sync-preparing" => FolderSyncState::Syncing,
            "error" => FolderSyncState::Error,
            other => {
                warn!(state = %other, "Unknown folder state, treating as idle");
                FolderSyncState::Idle
            }
        }
    }
}

/// A per-file error reported by the daemon for a folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderError {
    pub error: String,
    pub path: String,
}

/// A folder's sync state moved from `old_state` to `new_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStateTransition {
    pub folder_id: String,
    pub old_state: FolderSyncState,
    pub new_state: FolderSyncState,
}

/// Config-level identity of a folder; reloads that leave these unchanged keep the existing objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderDefinition {
    pub id: String,
    pub label: String,
    pub path: String,
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug)]
pub struct Folder {
    definition: FolderDefinition,
    state: RwLock<FolderState>,
}

#[derive(Debug, Default)]
struct FolderState {
    sync_state: FolderSyncState,
    status: FolderStatus,
    syncing_items: HashSet<String>,
    errors: Vec<FolderError>,
}

impl Folder {
    pub fn new(definition: FolderDefinition, status: FolderStatus) -> Self {
        let sync_state = FolderSyncState::from_daemon_state(&status.state);
        Self {
            definition,
            state: RwLock::new(FolderState {
                sync_state,
                status,
                ..FolderState::default()
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn label(&self) -> &str {
        &self.definition.label
    }

    pub fn path(&self) -> &str {
        &self.definition.path
    }

    pub fn ignore_patterns(&self) -> &[String] {
        &self.definition.ignore_patterns
    }

    pub fn definition(&self) -> &FolderDefinition {
        &self.definition
    }

    pub fn sync_state(&self) -> FolderSyncState {
        self.state.read().sync_state
    }

    pub fn status(&self) -> FolderStatus {
        self.state.read().status.clone()
    }

    pub fn errors(&self) -> Vec<FolderError> {
        self.state.read().errors.clone()
    }

    /// Whether `path` (relative to the folder root) is being transferred right now.
    pub fn is_syncing_item(&self, path: &str) -> bool {
        self.state.read().syncing_items.contains(path)
    }

    pub fn syncing_items(&self) -> Vec<String> {
        let mut items: Vec<_> = self.state.read().syncing_items.iter().cloned().collect();
        items.sort();
        items
    }

    /// Moves to `new_state`, returning the transition if the state changed.
    /// Entering `Syncing` drops all errors.
    pub(crate) fn transition_to(&self, new_state: FolderSyncState) -> Option<SyncStateTransition> {
        let mut state = self.state.write();
        if state.sync_state == new_state {
            return None;
        }
        let old_state = state.sync_state;
        state.sync_state = new_state;
        if new_state == FolderSyncState::Syncing {
            state.errors.clear();
        }
        Some(SyncStateTransition {
            folder_id: self.definition.id.clone(),
            old_state,
            new_state,
        })
    }

    /// Stores a fresh status snapshot, returning false if nothing changed.
    pub(crate) fn set_status(&self, status: FolderStatus) -> bool {
        let mut state = self.state.write();
        if state.status == status {
            return false;
        }
        state.status = status;
        true
    }

    pub(crate) fn set_errors(&self, errors: Vec<FolderError>) {
        self.state.write().errors = errors;
    }

    pub(crate) fn item_started(&self, item: &str) {
        self.state.write().syncing_items.insert(item.to_string());
    }

    pub(crate) fn item_finished(&self, item: &str) {
        self.state.write().syncing_items.remove(item);
    }

    /// Carries event-derived state over from the instance this one replaces.
    pub(crate) fn inherit_live_state(&self, previous: &Folder) {
        let previous = previous.state.read();
        let mut state = self.state.write();
        state.syncing_items = previous.syncing_items.clone();
        state.errors = previous.errors.clone();
    }
}
