use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub falcon: FalconConfig,
    pub humio: HumioConfig,
    pub advanced: AdvancedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// JSON file holding the next offset per partition
    pub offset_file: PathBuf,
    /// Parse events and ship them structured instead of as raw lines
    pub enrich: bool,
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            offset_file: PathBuf::from("offset.db"),
            enrich: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FalconConfig {
    pub url: String,
    pub api_id: String,
    pub api_secret: String,
}

impl Default for FalconConfig {
    fn default() -> Self {
        Self {
            url: "https://api.crowdstrike.com".to_string(),
            api_id: String::new(),
            api_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumioConfig {
    pub url: String,
    /// Ingest token; the repository's parser must match the enrich setting
    pub token: String,
}

impl Default for HumioConfig {
    fn default() -> Self {
        Self {
            url: "https://cloud.humio.com".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub app_id: String,
    pub user_agent: String,
    pub bulk_max_size: usize,
    /// Seconds to wait for a partial batch before flushing it
    pub flush_wait_time: u64,
    /// Seconds without data before a stream is considered dead
    pub stream_timeout: u64,
    /// Seconds between failed stream discovery attempts
    pub retry_timer: u64,
    /// Failed discoveries before trying a random app id; 0 disables
    pub appid_random: u32,
    /// Seconds between worker liveness checks
    pub keepalive: u64,
    /// Log full error chains (on top of verbose)
    pub exceptions: bool,
    /// Undelivered events per partition before its worker restarts; 0 = unbounded
    pub buffer_limit: usize,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            app_id: "cses2humio".to_string(),
            user_agent: default_user_agent(),
            bulk_max_size: 200,
            flush_wait_time: 10,
            stream_timeout: 60,
            retry_timer: 300,
            appid_random: 1,
            keepalive: 10,
            exceptions: false,
            buffer_limit: 10_000,
        }
    }
}

impl AdvancedConfig {
    pub fn flush_wait_time(&self) -> Duration {
        Duration::from_secs(self.flush_wait_time)
    }

    pub fn stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_timeout)
    }

    pub fn retry_timer(&self) -> Duration {
        Duration::from_secs(self.retry_timer)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive)
    }
}

pub fn default_user_agent() -> String {
    format!("cses2humio/{}", env!("CARGO_PKG_VERSION"))
}
