use super::descriptor::{StreamDescriptor, StreamResource};
use super::{FalconError, StreamApi};
use crate::config::types::FalconConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use url::Url;

const TOKEN_PATH: &str = "/oauth2/token";
const DISCOVERY_PATH: &str = "/sensors/entities/datafeed/v2";
const REFRESH_ACTION: &str = "refresh_active_stream_session";

/// Re-acquire the OAuth2 token this long before the provider says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub type Result<T> = std::result::Result<T, FalconError>;

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    1799
}

#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    resources: Option<Vec<StreamResource>>,
}

/// HTTP client for the Falcon event streams API.
#[derive(Debug)]
pub struct FalconClient {
    base_url: Url,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
    token: RwLock<Option<AccessToken>>,
}

impl FalconClient {
    pub fn new(config: &FalconConfig, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: Url::parse(&config.url)?,
            client_id: config.api_id.clone(),
            client_secret: config.api_secret.clone(),
            client,
            token: RwLock::new(None),
        })
    }

    /// Build a client and obtain the first OAuth2 token.
    ///
    /// Failing here is a startup failure: nothing downstream can work without it.
    pub async fn authenticate(config: &FalconConfig, user_agent: &str) -> Result<Self> {
        let client = Self::new(config, user_agent)?;
        client.bearer_token().await?;
        Ok(client)
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        let mut guard = self.token.write().await;
        // Another caller may have refreshed it while we waited for the write lock
        if let Some(token) = guard.as_ref() {
            if token.is_fresh() {
                return Ok(token.value.clone());
            }
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken> {
        let url = self.base_url.join(TOKEN_PATH)?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FalconError::Auth {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: TokenResponse = response.json().await?;
        tracing::debug!(expires_in = body.expires_in, "Obtained OAuth2 token");

        Ok(AccessToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            // Force a fresh token on the next call
            self.token.write().await.take();
        }

        Err(FalconError::Status {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl StreamApi for FalconClient {
    async fn list_streams(&self, app_id: &str) -> Result<Vec<StreamDescriptor>> {
        let token = self.bearer_token().await?;
        let url = self.base_url.join(DISCOVERY_PATH)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(&[("appId", app_id), ("format", "json")])
            .send()
            .await?;
        let response = self.check_status(response).await?;

        let body: DiscoveryResponse = response.json().await?;
        let resources = body.resources.ok_or(FalconError::MissingResources)?;

        tracing::debug!(app_id = %app_id, streams = resources.len(), "Got stream discovery response");

        resources
            .into_iter()
            .map(|resource| StreamDescriptor::from_resource(resource, app_id).map_err(Into::into))
            .collect()
    }

    async fn refresh_stream(&self, app_id: &str, partition: u32) -> Result<()> {
        let token = self.bearer_token().await?;
        let url = self.base_url.join(&format!(
            "/sensors/entities/datafeed-actions/v1/{}",
            partition
        ))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .query(&[("action_name", REFRESH_ACTION), ("appId", app_id)])
            .send()
            .await?;
        self.check_status(response).await?;

        Ok(())
    }
}
