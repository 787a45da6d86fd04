//! Engine configuration.
//!
//! Everything has a default, so an empty JSON object is a valid config.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SdkError;

const DEFAULT_SERVERS_URL: &str = "https://api.proxy.sh/v2/public/servers";
const DEFAULT_USER_SERVERS_URL: &str = "https://api.proxy.sh/v2/public/access";
const DEFAULT_HUBS_URL: &str = "https://api.proxy.sh/v2/public/hubs";
const DEFAULT_USER_HUBS_URL: &str = "https://api.proxy.sh/v2/public/access/hubs";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub servers_url: String,
    pub user_servers_url: String,
    pub hubs_url: String,
    pub user_hubs_url: String,
    pub http_timeout_secs: u64,
    /// Delay before a failed list fetch is retried.
    pub fetch_retry_delay_ms: u64,
    /// 0 retries forever.
    pub fetch_max_attempts: u32,
    pub probe_workers: usize,
    pub probe_timeout_ms: u64,
    pub ping_command: String,
    /// How many of the fastest nodes a jump picks from.
    pub node_top_k: usize,
    /// How many of the fastest hubs a jump picks from.
    pub hub_top_k: usize,
    /// `None` disables the list cache.
    pub cache_dir: Option<PathBuf>,
    /// `None` keeps settings in memory only.
    pub settings_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers_url: DEFAULT_SERVERS_URL.to_string(),
            user_servers_url: DEFAULT_USER_SERVERS_URL.to_string(),
            hubs_url: DEFAULT_HUBS_URL.to_string(),
            user_hubs_url: DEFAULT_USER_HUBS_URL.to_string(),
            http_timeout_secs: 10,
            fetch_retry_delay_ms: 5000,
            fetch_max_attempts: 0,
            probe_workers: 2,
            probe_timeout_ms: 2000,
            ping_command: default_ping_command().to_string(),
            node_top_k: 20,
            hub_top_k: 6,
            cache_dir: dirs::data_local_dir().map(|d| d.join("hubjump")),
            settings_path: dirs::config_dir().map(|d| d.join("hubjump").join("settings.json")),
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, SdkError> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| SdkError::InvalidParam(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SdkError> {
        if self.probe_workers == 0 {
            return Err(SdkError::InvalidParam(
                "probe_workers must be at least 1".to_string(),
            ));
        }
        if self.node_top_k == 0 || self.hub_top_k == 0 {
            return Err(SdkError::InvalidParam(
                "top-k values must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(SdkError::InvalidParam(
                "probe_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }
}

fn default_ping_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "/sbin/ping"
    } else if cfg!(target_os = "linux") {
        "/bin/ping"
    } else {
        "ping"
    }
}
