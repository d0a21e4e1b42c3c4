use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::types::MonitorError;

use super::api::{
    ConnectionsResponse, DeviceQuery, EventStreamQuery, FolderQuery, FolderStatus,
    IgnoresResponse, RawEvent, SyncthingApi, SyncthingConfig, SystemStatus, SystemVersion,
};
use super::helpers::{load_api_key, push_unique_url};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);
/// Headroom on top of the long-poll timeout before the HTTP request itself gives up.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

/// HTTP implementation of [`SyncthingApi`].
pub struct SyncthingClient {
    api_key: String,
    http: Client,
    base_urls: Vec<String>,
    current_idx: AtomicUsize,
}

impl SyncthingClient {
    /// Discover a Syncthing instance using config/env and prepare an HTTP client.
    pub async fn discover(config: &Config) -> Result<Self, MonitorError> {
        let api_key = load_api_key(config).await?;
        let mut base_urls = Vec::new();
        if let Ok(custom) = env::var("SYNCTHING_API_URL") {
            let trimmed = custom.trim();
            if !trimmed.is_empty() {
                push_unique_url(&mut base_urls, trimmed.to_string());
            }
        }
        if let Some(configured) = config.api_url.as_deref().map(str::trim) {
            if !configured.is_empty() {
                push_unique_url(&mut base_urls, configured.to_string());
            }
        }
        push_unique_url(&mut base_urls, "https://127.0.0.1:8384".to_string());
        push_unique_url(&mut base_urls, "http://127.0.0.1:8384".to_string());

        Self::new(api_key, base_urls)
    }

    pub fn new(api_key: String, base_urls: Vec<String>) -> Result<Self, MonitorError> {
        if base_urls.is_empty() {
            return Err(MonitorError::Config(
                "at least one Syncthing base URL is required".to_string(),
            ));
        }

        // The daemon serves its GUI with a self-signed certificate by default.
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()?;

        Ok(Self {
            api_key,
            http,
            base_urls,
            current_idx: AtomicUsize::new(0),
        })
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, MonitorError>
    where
        T: DeserializeOwned,
    {
        self.send_json(Method::GET, path, &(), None).await
    }

    async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, MonitorError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send_json(Method::GET, path, query, None).await
    }

    async fn send_json<T, Q>(
        &self,
        method: Method,
        path: &str,
        query: &Q,
        timeout: Option<Duration>,
    ) -> Result<T, MonitorError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let response = self.send(method, path, query, timeout).await?;
        Ok(response.json::<T>().await?)
    }

    /// Sends a request, moving on to the next base URL when the current one is unreachable.
    async fn send<Q>(
        &self,
        method: Method,
        path: &str,
        query: &Q,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, MonitorError>
    where
        Q: Serialize + ?Sized,
    {
        let start = self.current_idx.load(Ordering::Relaxed);
        let mut last_err = None;

        for offset in 0..self.base_urls.len() {
            let idx = (start + offset) % self.base_urls.len();
            let base = &self.base_urls[idx];
            let url = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            );

            let mut request = self
                .http
                .request(method.clone(), url)
                .header("X-API-Key", &self.api_key)
                .query(query);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    if idx != start {
                        debug!(base = %base, "Switched Syncthing base URL");
                        self.current_idx.store(idx, Ordering::Relaxed);
                    }
                    if !response.status().is_success() {
                        return Err(MonitorError::Syncthing(format!(
                            "{} returned {}",
                            path,
                            response.status()
                        )));
                    }
                    return Ok(response);
                }
                Err(err) if err.is_connect() => {
                    warn!(base = %base, error = %err, "Syncthing base URL unreachable");
                    last_err = Some(err);
                }
                // Dropped mid-request, e.g. the daemon went down during a long poll.
                Err(err) if err.is_request() && !err.is_timeout() => {
                    return Err(MonitorError::Unreachable(format!("{path}: {err}")));
                }
                Err(err) => return Err(MonitorError::Http(err)),
            }
        }

        Err(match last_err {
            Some(err) => MonitorError::Unreachable(format!("{path}: {err}")),
            None => MonitorError::Syncthing(format!("{path}: no base URL available")),
        })
    }
}

#[async_trait]
impl SyncthingApi for SyncthingClient {
    async fn fetch_events(
        &self,
        since: u64,
        limit: Option<u32>,
        timeout: Duration,
    ) -> Result<Vec<RawEvent>, MonitorError> {
        let query = EventStreamQuery {
            since,
            limit,
            timeout: timeout.as_secs().clamp(1, 300),
        };
        self.send_json(
            Method::GET,
            "/rest/events",
            &query,
            Some(timeout + LONG_POLL_GRACE),
        )
        .await
    }

    async fn fetch_config(&self) -> Result<SyncthingConfig, MonitorError> {
        self.get_json("/rest/config").await
    }

    async fn fetch_connections(&self) -> Result<ConnectionsResponse, MonitorError> {
        self.get_json("/rest/system/connections").await
    }

    async fn fetch_folder_status(&self, folder_id: &str) -> Result<FolderStatus, MonitorError> {
        let query = FolderQuery { folder: folder_id };
        self.get_json_with_query("/rest/db/status", &query).await
    }

    async fn fetch_ignores(&self, folder_id: &str) -> Result<Vec<String>, MonitorError> {
        let query = FolderQuery { folder: folder_id };
        let response: IgnoresResponse = self.get_json_with_query("/rest/db/ignores", &query).await?;
        Ok(response.ignore.unwrap_or_default())
    }

    async fn fetch_system_status(&self) -> Result<SystemStatus, MonitorError> {
        self.get_json("/rest/system/status").await
    }

    async fn fetch_version(&self) -> Result<SystemVersion, MonitorError> {
        self.get_json("/rest/system/version").await
    }

    async fn pause_device(&self, device_id: &str) -> Result<(), MonitorError> {
        let query = DeviceQuery { device: device_id };
        self.send(Method::POST, "/rest/system/pause", &query, None)
            .await
            .map(|_| ())
    }

    async fn resume_device(&self, device_id: &str) -> Result<(), MonitorError> {
        let query = DeviceQuery { device: device_id };
        self.send(Method::POST, "/rest/system/resume", &query, None)
            .await
            .map(|_| ())
    }
}
