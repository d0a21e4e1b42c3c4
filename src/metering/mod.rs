//! Automatic pausing of peers on metered networks.

mod cost;
mod monitor;
mod state;

pub use cost::{NetworkCostProvider, StaticCostProvider, UnsupportedCostProvider};
pub use monitor::MeteredNetworkMonitor;
pub use state::DevicePauseState;
