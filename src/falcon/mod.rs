pub mod client;
pub mod descriptor;

use async_trait::async_trait;
use thiserror::Error;

pub use client::FalconClient;
pub use descriptor::{partition_from_url, StreamDescriptor};

#[derive(Debug, Error)]
pub enum FalconError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid Falcon URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("OAuth2 token request failed with status {status}: {message}")]
    Auth { status: u16, message: String },

    #[error("Falcon returned error status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("no resources in stream discovery response")]
    MissingResources,

    #[error("invalid stream descriptor: {0}")]
    Descriptor(#[from] descriptor::DescriptorError),
}

/// The provider operations the consumption engine needs.
///
/// Workers and the supervisor only see this trait; authentication happens before
/// an implementation is handed to them.
#[async_trait]
pub trait StreamApi: Send + Sync {
    /// List the partitioned streams available to `app_id`.
    async fn list_streams(&self, app_id: &str) -> Result<Vec<StreamDescriptor>, FalconError>;

    /// Keep the session of one partition's stream alive.
    async fn refresh_stream(&self, app_id: &str, partition: u32) -> Result<(), FalconError>;
}
