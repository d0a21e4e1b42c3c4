pub mod api;
mod capabilities;
mod client;
mod helpers;

pub use capabilities::Capabilities;
pub use client::SyncthingClient;
