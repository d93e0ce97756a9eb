use super::event::Event;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const STRUCTURED_PATH: &str = "/api/v1/ingest/humio-structured";
const UNSTRUCTURED_PATH: &str = "/api/v1/ingest/humio-unstructured";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingest rejected batch with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Where batches go: one `deliver` call is one POST of the whole batch.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError>;
}

/// Resolved ingest endpoint, built once at startup.
#[derive(Debug, Clone)]
pub struct IngestTarget {
    pub url: Url,
    pub token: String,
    /// Body key wrapping the events: `events` (structured) or `messages` (raw)
    pub keyword: &'static str,
}

impl IngestTarget {
    pub fn structured(base_url: &str, token: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(base_url)?.join(STRUCTURED_PATH)?,
            token: token.to_string(),
            keyword: "events",
        })
    }

    pub fn unstructured(base_url: &str, token: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            url: Url::parse(base_url)?.join(UNSTRUCTURED_PATH)?,
            token: token.to_string(),
            keyword: "messages",
        })
    }
}

/// Stateless HTTP delivery to a Humio/LogScale ingest API.
///
/// No retries here: a failed batch stays in the worker's buffer and goes out
/// again, together with newer events, on the next flush.
#[derive(Debug)]
pub struct HumioSink {
    target: IngestTarget,
    client: reqwest::Client,
}

impl HumioSink {
    pub fn new(target: IngestTarget, user_agent: &str) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { target, client })
    }

    pub fn target(&self) -> &IngestTarget {
        &self.target
    }
}

#[async_trait]
impl EventSink for HumioSink {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError> {
        let body = [BTreeMap::from([(self.target.keyword, events)])];

        let response = self
            .client
            .post(self.target.url.clone())
            .bearer_auth(&self.target.token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DeliveryError::Rejected {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        Ok(())
    }
}
