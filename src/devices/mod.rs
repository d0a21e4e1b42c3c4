//! Known peers and their reconciliation against daemon snapshots.

mod device;
mod reconciler;

pub use device::{Device, DeviceSnapshot};
pub use reconciler::{DeviceMap, DeviceReconciler};
