//! Synchronized folders, their sync states and per-item activity.

mod folder;
mod reconciler;

pub use folder::{Folder, FolderDefinition, FolderError, FolderSyncState, SyncStateTransition};
pub use reconciler::{fetch_folder_sources, FolderMap, FolderReconciler, FolderSource};
