//! Configuration for the tangle client.

use std::time::Duration;

/// Connection, tagging, retry and confirmation settings for a tangle node.
#[derive(Debug, Clone)]
pub struct TangleConfig {
    /// When false, submission and metadata lookups fail with
    /// [`crate::TangleError::Unavailable`] and the service runs degraded.
    pub enabled: bool,
    /// Base URL of the node API.
    pub node_url: String,
    /// Network identifier recorded on anchors (mainnet/shimmer/testnet).
    pub network: String,
    /// Tag prefix; the wire tag is `<prefix>_<version>`.
    pub tag_prefix: String,
    /// Tag version suffix.
    pub tag_version: String,
    /// Explorer base URL for human-readable block links.
    pub explorer_url: String,
    /// Per-request timeout for GETs and the health check.
    pub request_timeout: Duration,
    /// Timeout for the block submission POST.
    pub api_timeout: Duration,
    /// Maximum submission attempts.
    pub retry_count: u32,
    /// Base delay between submission attempts.
    pub retry_delay: Duration,
    /// Cap on the backed-off submission delay.
    pub retry_max_delay: Duration,
    /// Total time to wait for ledger inclusion.
    pub confirmation_timeout: Duration,
    /// Interval between metadata polls while waiting for inclusion.
    pub poll_interval: Duration,
}

impl TangleConfig {
    /// The UTF-8 tag attached to every anchor block.
    pub fn tag(&self) -> String {
        format!("{}_{}", self.tag_prefix, self.tag_version)
    }

    /// Read configuration from `IOTA_*` environment variables, falling back
    /// to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("IOTA_ENABLED", defaults.enabled),
            node_url: env_string("IOTA_NODE_URL", defaults.node_url),
            network: env_string("IOTA_NETWORK", defaults.network),
            tag_prefix: env_string("IOTA_TAG_PREFIX", defaults.tag_prefix),
            tag_version: env_string("IOTA_TAG_VERSION", defaults.tag_version),
            explorer_url: env_string("IOTA_EXPLORER_URL", defaults.explorer_url),
            request_timeout: env_secs("IOTA_REQUEST_TIMEOUT", defaults.request_timeout),
            api_timeout: env_secs("IOTA_API_TIMEOUT", defaults.api_timeout),
            retry_count: env_parse("IOTA_RETRY_COUNT", defaults.retry_count),
            retry_delay: env_secs("IOTA_RETRY_DELAY", defaults.retry_delay),
            retry_max_delay: env_secs("IOTA_RETRY_MAX_DELAY", defaults.retry_max_delay),
            confirmation_timeout: env_secs("IOTA_CONFIRMATION_TIMEOUT", defaults.confirmation_timeout),
            poll_interval: env_secs("IOTA_POLL_INTERVAL", defaults.poll_interval),
        }
    }
}

impl Default for TangleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_url: "https://api.testnet.shimmer.network".to_string(),
            network: "testnet".to_string(),
            tag_prefix: "ARED_ANCHOR".to_string(),
            tag_version: "v1".to_string(),
            explorer_url: "https://explorer.shimmer.network/testnet".to_string(),
            request_timeout: Duration::from_secs(30),
            api_timeout: Duration::from_secs(60),
            retry_count: 3,
            retry_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(30),
            confirmation_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
