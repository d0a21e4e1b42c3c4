use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use crate::types::MonitorError;

use super::{paths, Config};

impl Config {
    /// Load configuration from config.json in the app directory
    /// Falls back to defaults if the file doesn't exist or can't be parsed
    pub async fn load() -> Self {
        let loaded = match paths::get_config_path() {
            Ok(path) => Self::load_from(&path).await,
            Err(err) => Err(err),
        };
        match loaded {
            Ok(config) => {
                info!(
                    dir = %config.syncthing_config_dir,
                    metering = config.metering_enabled,
                    "Loaded configuration"
                );
                config
            }
            Err(err) => {
                warn!(error = ?err, "Failed to load config.json, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from an explicit path. A missing file yields defaults.
    pub async fn load_from(config_path: &Path) -> Result<Self, MonitorError> {
        if !config_path.exists() {
            warn!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(config_path)
            .await
            .map_err(|err| MonitorError::Config(format!("Failed to read config file: {err}")))?;

        let config: Config = serde_json::from_str(&contents)
            .map_err(|err| MonitorError::Config(format!("Failed to parse config.json: {err}")))?;

        if config.completed_history_capacity == 0 {
            return Err(MonitorError::Config(
                "completed_history_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}
