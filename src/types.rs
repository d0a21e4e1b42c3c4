use thiserror::Error;

/// Errors surfaced by the engine and its Syncthing API client.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("syncthing error: {0}")]
    Syncthing(String),

    #[error("syncthing unreachable: {0}")]
    Unreachable(String),

    #[error("api key not found in syncthing config")]
    MissingApiKey,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("malformed event {id}: {reason}")]
    MalformedEvent { id: u64, reason: String },
}

impl MonitorError {
    /// Whether the daemon could not be reached or dropped the connection, as it does while restarting.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, MonitorError::Unreachable(_))
    }
}
