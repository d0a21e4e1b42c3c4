use reqwest::Url;
use tracing::debug;

/// Answers whether traffic to a peer endpoint is billed per byte.
pub trait NetworkCostProvider: Send + Sync {
    /// False when the platform cannot tell; metering is then disabled for good.
    fn is_supported(&self) -> bool;

    fn is_metered(&self, address: &str) -> bool;
}

/// Used where no cost information is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedCostProvider;

impl NetworkCostProvider for UnsupportedCostProvider {
    fn is_supported(&self) -> bool {
        false
    }

    fn is_metered(&self, _address: &str) -> bool {
        false
    }
}

/// Treats peers whose host starts with one of the configured prefixes as metered.
#[derive(Debug, Clone)]
pub struct StaticCostProvider {
    metered_prefixes: Vec<String>,
}

impl StaticCostProvider {
    pub fn new(metered_prefixes: Vec<String>) -> Self {
        let metered_prefixes = metered_prefixes
            .into_iter()
            .map(|prefix| prefix.trim().to_string())
            .filter(|prefix| !prefix.is_empty())
            .collect();
        Self { metered_prefixes }
    }
}

impl NetworkCostProvider for StaticCostProvider {
    fn is_supported(&self) -> bool {
        true
    }

    fn is_metered(&self, address: &str) -> bool {
        let Some(host) = endpoint_host(address) else {
            debug!(address = %address, "Could not extract host from endpoint");
            return false;
        };
        self.metered_prefixes
            .iter()
            .any(|prefix| host.starts_with(prefix.as_str()))
    }
}

/// Host part of a daemon endpoint such as `tcp://10.0.0.5:22000` or `10.0.0.5:22000`.
fn endpoint_host(address: &str) -> Option<String> {
    if let Ok(url) = Url::parse(address) {
        if let Some(host) = url.host_str() {
            return Some(host.trim_matches(|c| c == '[' || c == ']').to_string());
        }
    }
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    let host = host.trim_matches(|c| c == '[' || c == ']');
    (!host.is_empty()).then(|| host.to_string())
}
