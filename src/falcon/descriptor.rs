use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("invalid stream url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid refresh interval {0}")]
    InvalidRefreshInterval(String),
}

/// One partition's stream as handed out by discovery.
///
/// Immutable: a restart always gets a freshly discovered descriptor, the old one
/// is dropped with the dead worker.
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub partition: u32,
    pub url: String,
    pub session_token: String,
    pub refresh_interval: Duration,

    /// App id the stream was discovered under (may be a randomized one)
    pub app_id: String,

    /// When discovery returned this descriptor; the refresh schedule starts here
    pub discovered_at: Instant,
}

impl StreamDescriptor {
    pub fn new(
        url: String,
        session_token: String,
        refresh_interval: Duration,
        app_id: String,
    ) -> Result<Self, DescriptorError> {
        let partition = partition_from_url(&url)?;

        Ok(Self {
            partition,
            url,
            session_token,
            refresh_interval,
            app_id,
            discovered_at: Instant::now(),
        })
    }

    pub(crate) fn from_resource(
        resource: StreamResource,
        app_id: &str,
    ) -> Result<Self, DescriptorError> {
        let refresh_secs = resource.refresh_interval_secs()?;

        Self::new(
            resource.data_feed_url,
            resource.session_token.token,
            Duration::from_secs(refresh_secs),
            app_id.to_string(),
        )
    }
}

/// Partition number is the trailing path segment of the data feed URL,
/// e.g. `https://firehose.example.com/sensors/entities/datafeed/v1/3` -> 3.
pub fn partition_from_url(url: &str) -> Result<u32, DescriptorError> {
    let invalid = |reason: &str| DescriptorError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .ok_or_else(|| invalid("no path segment"))?;

    segment
        .parse()
        .map_err(|_| invalid("trailing path segment is not a partition number"))
}

/// Wire shape of one `resources[]` entry of the discovery response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamResource {
    #[serde(rename = "dataFeedURL")]
    pub data_feed_url: String,

    #[serde(rename = "sessionToken")]
    pub session_token: SessionToken,

    #[serde(rename = "refreshActiveSessionInterval")]
    pub refresh_active_session_interval: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SessionToken {
    pub token: String,
}

impl StreamResource {
    // The provider has been seen sending the interval both as a number and as a string
    fn refresh_interval_secs(&self) -> Result<u64, DescriptorError> {
        let value = &self.refresh_active_session_interval;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .filter(|secs| *secs > 0)
            .ok_or_else(|| DescriptorError::InvalidRefreshInterval(value.to_string()))
    }
}
