use crate::config::Config;
use crate::falcon::{FalconClient, FalconError, StreamApi};
use crate::humio::{DeliveryError, EventDecoder, EventSink, HumioSink, IngestTarget};
use crate::shipper::shutdown::install_signal_handlers;
use crate::shipper::{
    FlushPolicy, Supervisor, SupervisorError, SupervisorSettings, WorkerContext, WorkerSettings,
};
use crate::storage::{OffsetStore, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("offset file error: {0}")]
    Storage(#[from] StorageError),

    #[error("falcon authentication failed: {0}")]
    Auth(#[source] FalconError),

    #[error("invalid humio url: {0}")]
    HumioUrl(#[from] url::ParseError),

    #[error("humio client error: {0}")]
    Humio(#[from] DeliveryError),

    #[error("failed to build stream client: {0}")]
    StreamClient(#[source] reqwest::Error),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

const HIDDEN: &str = "[HIDDEN]";
const NOT_SET: &str = "NOT SET";

fn secret(value: &str) -> &'static str {
    if value.is_empty() {
        NOT_SET
    } else {
        HIDDEN
    }
}

/// Log the effective configuration with secrets masked.
pub fn log_effective_config(config: &Config) {
    let general = &config.general;
    let advanced = &config.advanced;

    info!(
        offset_file = %general.offset_file.display(),
        enrich = general.enrich,
        verbose = general.verbose,
        "General settings"
    );
    info!(
        url = %config.falcon.url,
        api_id = %config.falcon.api_id,
        api_secret = secret(&config.falcon.api_secret),
        "Falcon settings"
    );
    info!(
        url = %config.humio.url,
        token = secret(&config.humio.token),
        "Humio settings"
    );
    info!(
        app_id = %advanced.app_id,
        user_agent = %advanced.user_agent,
        bulk_max_size = advanced.bulk_max_size,
        flush_wait_time = advanced.flush_wait_time,
        stream_timeout = advanced.stream_timeout,
        retry_timer = advanced.retry_timer,
        appid_random = advanced.appid_random,
        keepalive = advanced.keepalive,
        exceptions = advanced.exceptions,
        buffer_limit = advanced.buffer_limit,
        "Advanced settings"
    );
}

pub async fn run(config: Config) -> Result<(), RunError> {
    log_effective_config(&config);

    let offsets = Arc::new(OffsetStore::new(config.general.offset_file.clone()));
    offsets.ensure_exists().await?;
    let persisted = offsets.snapshot().await?;
    info!(
        path = %offsets.path().display(),
        partitions = persisted.len(),
        offsets = ?persisted,
        "Loaded offsets"
    );

    let advanced = &config.advanced;
    let api = match FalconClient::authenticate(&config.falcon, &advanced.user_agent).await {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to authenticate with the Falcon API");
            return Err(RunError::Auth(e));
        }
    };
    info!(url = %config.falcon.url, "Authenticated with the Falcon API");

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone()).map_err(RunError::Signals)?;

    let (decoder, target) = if config.general.enrich {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default();
        (
            EventDecoder::enrich(&host, &advanced.app_id),
            IngestTarget::structured(&config.humio.url, &config.humio.token)?,
        )
    } else {
        (
            EventDecoder::Raw,
            IngestTarget::unstructured(&config.humio.url, &config.humio.token)?,
        )
    };
    let sink = HumioSink::new(target, &advanced.user_agent)?;
    info!(
        enrich = decoder.is_enrich(),
        ingest_url = %sink.target().url,
        "Shipping events to Humio"
    );

    let settings = WorkerSettings {
        flush: FlushPolicy {
            bulk_max_size: advanced.bulk_max_size,
            flush_wait_time: advanced.flush_wait_time(),
        },
        stream_timeout: advanced.stream_timeout(),
        buffer_limit: advanced.buffer_limit,
        verbose: config.general.verbose,
        error_chains: config.general.verbose && advanced.exceptions,
    };

    let client = WorkerContext::stream_client(&advanced.user_agent, advanced.stream_timeout())
        .map_err(RunError::StreamClient)?;

    let api: Arc<dyn StreamApi> = Arc::new(api);
    let sink: Arc<dyn EventSink> = Arc::new(sink);
    let ctx = WorkerContext {
        settings: Arc::new(settings),
        decoder: Arc::new(decoder),
        api,
        sink,
        offsets,
        client,
        shutdown,
    };

    let supervisor = Supervisor::new(
        SupervisorSettings {
            app_id: advanced.app_id.clone(),
            retry_timer: advanced.retry_timer(),
            appid_random: advanced.appid_random,
            keepalive: advanced.keepalive(),
            shutdown_grace: advanced.stream_timeout(),
        },
        ctx,
    );

    supervisor
        .run()
        .instrument(tracing::info_span!("controller"))
        .await?;

    info!("Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_masking() {
        assert_eq!(secret(""), "NOT SET");
        assert_eq!(secret("abc"), "[HIDDEN]");
    }
}
