use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::notifications::{Notification, NotificationBus};
use crate::syncthing_client::api::{FolderStatus, SyncthingApi, SyncthingConfig};
use crate::types::MonitorError;

use super::folder::{Folder, FolderDefinition, FolderError, FolderSyncState, SyncStateTransition};

pub type FolderMap = HashMap<String, Arc<Folder>>;

/// Everything needed to build one [`Folder`] during reconciliation.
#[derive(Debug, Clone)]
pub struct FolderSource {
    pub definition: FolderDefinition,
    pub status: FolderStatus,
}

/// Fetches status (and ignore patterns) for every configured folder.
///
/// A failed status fetch fails the whole pass; ignore patterns are optional.
pub async fn fetch_folder_sources(
    api: &dyn SyncthingApi,
    config: &SyncthingConfig,
) -> Result<Vec<FolderSource>, MonitorError> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for folder in &config.folders {
        if folder.id.is_empty() || !seen.insert(folder.id.clone()) {
            continue;
        }

        let status = api.fetch_folder_status(&folder.id).await?;
        let ignore_patterns = match api.fetch_ignores(&folder.id).await {
            Ok(patterns) => patterns,
            Err(err) => {
                warn!(folder = %folder.id, error = %err, "Failed to fetch ignore patterns");
                Vec::new()
            }
        };

        sources.push(FolderSource {
            definition: FolderDefinition {
                id: folder.id.clone(),
                label: folder
                    .label
                    .clone()
                    .filter(|label| !label.is_empty())
                    .unwrap_or_else(|| folder.id.clone()),
                path: folder.path.clone().unwrap_or_default(),
                ignore_patterns,
            },
            status,
        });
    }
    Ok(sources)
}

/// Owns the published set of folders, their sync states and errors.
pub struct FolderReconciler {
    bus: NotificationBus,
    folders: ArcSwap<FolderMap>,
    write_lock: Mutex<()>,
}

impl FolderReconciler {
    pub fn new(bus: NotificationBus) -> Self {
        Self {
            bus,
            folders: ArcSwap::from_pointee(FolderMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn try_fetch_folder_by_id(&self, folder_id: &str) -> Option<Arc<Folder>> {
        self.folders.load().get(folder_id).cloned()
    }

    pub fn fetch_all_folders(&self) -> Vec<Arc<Folder>> {
        let mut folders: Vec<_> = self.folders.load().values().cloned().collect();
        folders.sort_by(|a, b| a.label().to_lowercase().cmp(&b.label().to_lowercase()));
        folders
    }

    pub fn load_snapshot(&self, sources: Vec<FolderSource>) {
        let _guard = self.write_lock.lock();
        let folders: FolderMap = sources
            .into_iter()
            .map(|source| {
                let folder = Folder::new(source.definition, source.status);
                (folder.id().to_string(), Arc::new(folder))
            })
            .collect();
        info!(count = folders.len(), "Loaded folders");
        self.folders.store(Arc::new(folders));
        self.bus.emit(Notification::FoldersChanged);
    }

    /// Reconciles against a fresh snapshot and returns the sync-state transitions it revealed.
    ///
    /// When the folder definitions are unchanged the existing objects are kept
    /// and only refreshed in place, so an unchanged snapshot is silent.
    pub fn reload_snapshot(&self, sources: Vec<FolderSource>) -> Vec<SyncStateTransition> {
        let _guard = self.write_lock.lock();
        let previous = self.folders.load_full();

        let unchanged = sources.len() == previous.len()
            && sources.iter().all(|source| {
                previous
                    .get(&source.definition.id)
                    .is_some_and(|existing| *existing.definition() == source.definition)
            });

        if unchanged {
            let mut transitions = Vec::new();
            for source in sources {
                if let Some(folder) = previous.get(&source.definition.id) {
                    if let Some(transition) = self.refresh_status(folder, source.status) {
                        transitions.push(transition);
                    }
                }
            }
            return transitions;
        }

        let mut transitions = Vec::new();
        let mut folders = FolderMap::new();
        for source in sources {
            let folder = Folder::new(source.definition, source.status);
            if let Some(old) = previous.get(folder.id()) {
                folder.inherit_live_state(old);
                if old.sync_state() != folder.sync_state() {
                    if folder.sync_state() == FolderSyncState::Syncing {
                        folder.set_errors(Vec::new());
                    }
                    transitions.push(SyncStateTransition {
                        folder_id: folder.id().to_string(),
                        old_state: old.sync_state(),
                        new_state: folder.sync_state(),
                    });
                }
            }
            folders.insert(folder.id().to_string(), Arc::new(folder));
        }

        // A folder removed mid-sync still has to close its transfer cycle.
        let mut removed_transitions = Vec::new();
        for (id, old) in previous.iter() {
            if !folders.contains_key(id) && old.sync_state() == FolderSyncState::Syncing {
                removed_transitions.push(SyncStateTransition {
                    folder_id: id.clone(),
                    old_state: FolderSyncState::Syncing,
                    new_state: FolderSyncState::Idle,
                });
            }
        }

        debug!(count = folders.len(), "Replaced folder set");
        self.folders.store(Arc::new(folders));
        self.bus.emit(Notification::FoldersChanged);
        for transition in &transitions {
            self.emit_transition(transition);
        }

        transitions.extend(removed_transitions);
        transitions
    }

    pub fn on_state_changed(&self, folder_id: &str, to: &str) -> Option<SyncStateTransition> {
        let folder = self.lookup(folder_id, "StateChanged")?;
        let transition = folder.transition_to(FolderSyncState::from_daemon_state(to))?;
        self.emit_transition(&transition);
        Some(transition)
    }

    /// Applies a `FolderSummary`; its state string can reveal a transition the feed dropped.
    pub fn on_summary(&self, folder_id: &str, summary: FolderStatus) -> Option<SyncStateTransition> {
        let folder = self.lookup(folder_id, "FolderSummary")?;
        self.refresh_status(&folder, summary)
    }

    pub fn on_errors(&self, folder_id: &str, errors: Vec<FolderError>) {
        let Some(folder) = self.lookup(folder_id, "FolderErrors") else {
            return;
        };
        folder.set_errors(errors.clone());
        self.bus.emit(Notification::FolderErrorsChanged {
            folder_id: folder_id.to_string(),
            errors,
        });
    }

    /// Returns false when the folder is unknown and the event was dropped.
    pub fn on_item_started(&self, folder_id: &str, item: &str) -> bool {
        let Some(folder) = self.lookup(folder_id, "ItemStarted") else {
            return false;
        };
        folder.item_started(item);
        true
    }

    pub fn on_item_finished(&self, folder_id: &str, item: &str) -> bool {
        let Some(folder) = self.lookup(folder_id, "ItemFinished") else {
            return false;
        };
        folder.item_finished(item);
        true
    }

    fn refresh_status(&self, folder: &Folder, status: FolderStatus) -> Option<SyncStateTransition> {
        let new_state = FolderSyncState::from_daemon_state(&status.state);
        if folder.set_status(status.clone()) {
            self.bus.emit(Notification::FolderStatusChanged {
                folder_id: folder.id().to_string(),
                status,
            });
        }
        let transition = folder.transition_to(new_state)?;
        self.emit_transition(&transition);
        Some(transition)
    }

    fn emit_transition(&self, transition: &SyncStateTransition) {
        self.bus.emit(Notification::FolderSyncStateChanged {
            folder_id: transition.folder_id.clone(),
            old_state: transition.old_state,
            new_state: transition.new_state,
        });
        if transition.new_state == FolderSyncState::Syncing {
            self.bus.emit(Notification::FolderErrorsChanged {
                folder_id: transition.folder_id.clone(),
                errors: Vec::new(),
            });
        }
    }

    fn lookup(&self, folder_id: &str, event: &str) -> Option<Arc<Folder>> {
        let folder = self.try_fetch_folder_by_id(folder_id);
        if folder.is_none() {
            warn!(folder = %folder_id, event, "Event for unknown folder ignored");
        }
        folder
    }
}
