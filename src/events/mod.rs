//! Typed daemon events and the long-poll loop that delivers them.

mod event;
mod poller;

pub use event::{Event, EventKind, ItemAction, ItemProgress, ItemType};
pub use poller::{EventHandler, EventPoller, PollerSettings, Resync};
