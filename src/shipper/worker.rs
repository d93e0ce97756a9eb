use super::batch_buffer::{BatchBuffer, BufferError, FlushPolicy};
use super::line_reader::LineReader;
use super::refresh::RefreshSchedule;
use crate::falcon::{StreamApi, StreamDescriptor};
use crate::humio::{EventDecoder, EventSink};
use crate::storage::{OffsetStore, StorageError};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("offset store error: {0}")]
    Storage(#[from] StorageError),

    #[error("failed to open stream: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("stream request returned status {0}")]
    Status(u16),

    #[error("stream read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("no data on stream for {0:?}")]
    ReadTimeout(Duration),

    #[error("{limit} undelivered events buffered, giving up on this stream")]
    BufferOverflow { limit: usize },
}

/// How a worker ended when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Shutdown,
    StreamClosed,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub flush: FlushPolicy,
    pub stream_timeout: Duration,
    /// Max undelivered events before the worker exits; 0 = unbounded
    pub buffer_limit: usize,
    /// Include the offending line when logging dropped records
    pub verbose: bool,
    /// Log errors with their full source chain
    pub error_chains: bool,
}

/// Everything a worker needs besides its own descriptor.
///
/// Cloned into each worker; only the offset store is shared mutable state.
#[derive(Clone)]
pub struct WorkerContext {
    pub settings: Arc<WorkerSettings>,
    pub decoder: Arc<EventDecoder>,
    pub api: Arc<dyn StreamApi>,
    pub sink: Arc<dyn EventSink>,
    pub offsets: Arc<OffsetStore>,
    pub client: reqwest::Client,
    pub shutdown: CancellationToken,
}

impl WorkerContext {
    /// Build the shared stream client. Connect timeout is the stream timeout;
    /// read idleness is enforced by the worker itself.
    pub fn stream_client(user_agent: &str, stream_timeout: Duration) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(stream_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .build()
    }
}

enum Step {
    Line(Vec<u8>),
    Closed,
    Tick,
    Shutdown,
}

/// Consumes one partition: read, batch, flush, refresh, until the stream ends,
/// fails, or shutdown is signalled.
pub struct PartitionWorker {
    descriptor: StreamDescriptor,
    ctx: WorkerContext,
    dropped: u64,
}

impl PartitionWorker {
    pub fn new(descriptor: StreamDescriptor, ctx: WorkerContext) -> Self {
        Self {
            descriptor,
            ctx,
            dropped: 0,
        }
    }

    pub fn partition(&self) -> u32 {
        self.descriptor.partition
    }

    pub async fn run(mut self) -> Result<WorkerExit, WorkerError> {
        let partition = self.descriptor.partition;
        let settings = Arc::clone(&self.ctx.settings);
        let shutdown = self.ctx.shutdown.clone();

        let offset = self.ctx.offsets.get(partition).await?;
        info!(partition, offset, "Opening stream");

        let response = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(partition, "Shutdown before stream opened");
                return Ok(WorkerExit::Shutdown);
            }
            response = self.connect(offset) => response?,
        };

        let mut reader = LineReader::new(response.bytes_stream());
        let mut buffer = BatchBuffer::new(settings.buffer_limit, Instant::now());
        let mut refresh = RefreshSchedule::new(
            self.descriptor.refresh_interval,
            self.descriptor.discovered_at,
        );
        info!(
            partition,
            refresh_interval_secs = self.descriptor.refresh_interval.as_secs(),
            refresh_in_secs = refresh
                .next_refresh()
                .saturating_duration_since(Instant::now())
                .as_secs(),
            "Streaming, session refresh scheduled at 85% of interval"
        );

        let mut read_deadline = Instant::now() + settings.stream_timeout;

        loop {
            let wake_at = next_wake(&buffer, &refresh, &settings.flush);

            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => Step::Shutdown,
                read = timeout_at(read_deadline, reader.next_line()) => match read {
                    Err(_) => {
                        error!(partition, offset = ?buffer.next_offset(), "Stream timed out");
                        return Err(WorkerError::ReadTimeout(settings.stream_timeout));
                    }
                    Ok(Err(e)) => {
                        error!(partition, error = %e, bytes_read = reader.bytes_read(), "Stream read failed");
                        return Err(WorkerError::Read(e));
                    }
                    Ok(Ok(Some(line))) => Step::Line(line),
                    Ok(Ok(None)) => Step::Closed,
                },
                _ = sleep_until(wake_at) => Step::Tick,
            };

            match step {
                Step::Shutdown => {
                    info!(
                        partition,
                        buffer = ?buffer.stats(),
                        "Going to exit, closing stream"
                    );
                    return Ok(WorkerExit::Shutdown);
                }
                Step::Closed => {
                    warn!(
                        partition,
                        unflushed = buffer.len(),
                        bytes_read = reader.bytes_read(),
                        "Stream closed by provider"
                    );
                    return Ok(WorkerExit::StreamClosed);
                }
                Step::Line(line) => {
                    read_deadline = Instant::now() + settings.stream_timeout;
                    self.handle_line(&line, &mut buffer)?;
                }
                Step::Tick => {}
            }

            self.maybe_flush(&mut buffer).await;
            self.maybe_refresh(&mut refresh).await;
        }
    }

    async fn connect(&self, offset: u64) -> Result<reqwest::Response, WorkerError> {
        let request = self
            .ctx
            .client
            .get(&self.descriptor.url)
            .query(&[("offset", offset)])
            .header(AUTHORIZATION, format!("Token {}", self.descriptor.session_token))
            .header(ACCEPT, "application/json")
            .send();

        let stream_timeout = self.ctx.settings.stream_timeout;
        let response = match timeout(stream_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(partition = self.descriptor.partition, error = %e, "Failed to open stream");
                return Err(WorkerError::Connect(e));
            }
            Err(_) => {
                error!(partition = self.descriptor.partition, "Stream timed out while connecting");
                return Err(WorkerError::ReadTimeout(stream_timeout));
            }
        };

        if !response.status().is_success() {
            error!(
                partition = self.descriptor.partition,
                status = response.status().as_u16(),
                "Stream request rejected"
            );
            return Err(WorkerError::Status(response.status().as_u16()));
        }

        Ok(response)
    }

    fn handle_line(&mut self, line: &[u8], buffer: &mut BatchBuffer) -> Result<(), WorkerError> {
        if line.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }

        let decoded = match self.ctx.decoder.decode(line) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.dropped += 1;
                if self.ctx.settings.verbose {
                    warn!(
                        partition = self.descriptor.partition,
                        error = %e,
                        dropped_total = self.dropped,
                        line = %String::from_utf8_lossy(line),
                        "Dropping undecodable event"
                    );
                } else {
                    warn!(
                        partition = self.descriptor.partition,
                        error = %e,
                        bytes = line.len(),
                        dropped_total = self.dropped,
                        "Dropping undecodable event"
                    );
                }
                return Ok(());
            }
        };

        debug!(
            partition = self.descriptor.partition,
            offset = ?decoded.offset,
            bytes = line.len(),
            "Buffered event"
        );

        buffer.push(decoded).map_err(|BufferError::BufferFull { limit }| {
            error!(
                partition = self.descriptor.partition,
                limit,
                "Buffer limit reached without a successful delivery, exiting so the stream restarts from the last persisted offset"
            );
            WorkerError::BufferOverflow { limit }
        })
    }

    async fn maybe_flush(&self, buffer: &mut BatchBuffer) {
        let policy = &self.ctx.settings.flush;
        if !buffer.should_flush(policy, Instant::now()) {
            return;
        }

        let partition = self.descriptor.partition;
        let attempted = buffer.len();

        if let Err(e) = self.ctx.sink.deliver(buffer.events()).await {
            buffer.mark_failed(Instant::now());
            if self.ctx.settings.error_chains {
                error!(
                    partition,
                    events = attempted,
                    error = ?e,
                    retry_in_secs = policy.flush_wait_time.as_secs(),
                    "Failed to ingest events, retrying on next flush"
                );
            } else {
                error!(
                    partition,
                    events = attempted,
                    error = %e,
                    retry_in_secs = policy.flush_wait_time.as_secs(),
                    "Failed to ingest events, retrying on next flush"
                );
            }
            return;
        }

        let (shipped, next_offset) = buffer.commit(Instant::now());
        let Some(next_offset) = next_offset else {
            info!(partition, events = shipped, "Shipped events, no offset to persist");
            return;
        };

        match self.ctx.offsets.set(partition, next_offset).await {
            Ok(()) => info!(
                partition,
                events = shipped,
                offset = next_offset,
                "Shipped events"
            ),
            Err(e) => error!(
                partition,
                events = shipped,
                offset = next_offset,
                error = %e,
                "Shipped events but FAILED to persist offset, they will be shipped again after a restart"
            ),
        }
    }

    async fn maybe_refresh(&self, refresh: &mut RefreshSchedule) {
        if !refresh.is_due(Instant::now()) {
            return;
        }

        let partition = self.descriptor.partition;
        match self
            .ctx
            .api
            .refresh_stream(&self.descriptor.app_id, partition)
            .await
        {
            Ok(()) => {
                refresh.on_success(Instant::now());
                info!(
                    partition,
                    next_refresh_in_secs = refresh.delta().as_secs(),
                    "Refreshed active stream"
                );
            }
            Err(e) => {
                refresh.on_failure(Instant::now());
                error!(
                    partition,
                    error = %e,
                    "Failed to refresh stream, trying again in 30 seconds"
                );
            }
        }
    }
}

/// Earliest time-driven deadline: the flush age trigger (only with buffered
/// events) or the session refresh.
fn next_wake(buffer: &BatchBuffer, refresh: &RefreshSchedule, policy: &FlushPolicy) -> Instant {
    match buffer.flush_deadline(policy) {
        Some(flush_at) => flush_at.min(refresh.next_refresh()),
        None => refresh.next_refresh(),
    }
}
