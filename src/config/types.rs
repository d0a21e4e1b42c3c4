use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the state engine and its monitor binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_dir")]
    pub syncthing_config_dir: String,

    /// Explicit GUI/REST address; `SYNCTHING_API_URL` takes precedence.
    #[serde(default)]
    pub api_url: Option<String>,

    #[serde(default = "default_poll_initial_delay_ms")]
    pub poll_initial_delay_ms: u64,

    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_poll_retry_delay_ms")]
    pub poll_retry_delay_ms: u64,

    #[serde(default)]
    pub event_batch_limit: Option<u32>,

    #[serde(default = "default_completed_history_capacity")]
    pub completed_history_capacity: usize,

    #[serde(default)]
    pub metering_enabled: bool,

    /// Host prefixes (e.g. `10.8.` or `phone.lan`) whose connections count as metered.
    #[serde(default)]
    pub metered_networks: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            syncthing_config_dir: default_config_dir(),
            api_url: None,
            poll_initial_delay_ms: default_poll_initial_delay_ms(),
            poll_timeout_secs: default_poll_timeout_secs(),
            poll_retry_delay_ms: default_poll_retry_delay_ms(),
            event_batch_limit: None,
            completed_history_capacity: default_completed_history_capacity(),
            metering_enabled: false,
            metered_networks: Vec::new(),
        }
    }
}

impl Config {
    pub fn poll_initial_delay(&self) -> Duration {
        Duration::from_millis(self.poll_initial_delay_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.clamp(1, 300))
    }

    pub fn poll_retry_delay(&self) -> Duration {
        Duration::from_millis(self.poll_retry_delay_ms)
    }
}

fn default_config_dir() -> String {
    "/home/root/.config/syncthing".to_string()
}

fn default_poll_initial_delay_ms() -> u64 {
    1_000
}

fn default_poll_timeout_secs() -> u64 {
    60
}

fn default_poll_retry_delay_ms() -> u64 {
    5_000
}

fn default_completed_history_capacity() -> usize {
    100
}
