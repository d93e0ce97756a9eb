#![allow(dead_code)]

use async_trait::async_trait;
use cses2humio::falcon::{FalconError, StreamApi, StreamDescriptor};
use cses2humio::humio::{DeliveryError, Event, EventDecoder, EventSink};
use cses2humio::shipper::{FlushPolicy, WorkerContext, WorkerSettings};
use cses2humio::storage::OffsetStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Stream API double: serves fixed descriptors to accepted app ids.
pub struct FakeApi {
    urls: Vec<String>,
    accept: fn(&str) -> bool,
    pub list_calls: Mutex<Vec<String>>,
    pub refreshes: AtomicUsize,
}

impl FakeApi {
    pub fn new(urls: Vec<String>) -> Self {
        Self::accepting(urls, |_| true)
    }

    pub fn accepting(urls: Vec<String>, accept: fn(&str) -> bool) -> Self {
        Self {
            urls,
            accept,
            list_calls: Mutex::new(Vec::new()),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn app_ids_seen(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamApi for FakeApi {
    async fn list_streams(&self, app_id: &str) -> Result<Vec<StreamDescriptor>, FalconError> {
        self.list_calls.lock().unwrap().push(app_id.to_string());

        if !(self.accept)(app_id) {
            return Ok(Vec::new());
        }

        Ok(self
            .urls
            .iter()
            .map(|url| {
                StreamDescriptor::new(
                    url.clone(),
                    "session-token".to_string(),
                    Duration::from_secs(1800),
                    app_id.to_string(),
                )
                .unwrap()
            })
            .collect())
    }

    async fn refresh_stream(&self, _app_id: &str, _partition: u32) -> Result<(), FalconError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink double: records accepted batches, rejects the first `failures` calls.
#[derive(Default)]
pub struct RecordingSink {
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
    pub batches: Mutex<Vec<Vec<Event>>>,
}

impl RecordingSink {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            ..Default::default()
        }
    }

    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver(&self, events: &[Event]) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DeliveryError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            });
        }

        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }
}

pub fn settings(bulk_max_size: usize, flush_wait_time: Duration) -> WorkerSettings {
    WorkerSettings {
        flush: FlushPolicy {
            bulk_max_size,
            flush_wait_time,
        },
        stream_timeout: Duration::from_secs(10),
        buffer_limit: 0,
        verbose: true,
        error_chains: false,
    }
}

pub struct Harness {
    pub ctx: WorkerContext,
    pub api: Arc<FakeApi>,
    pub sink: Arc<RecordingSink>,
    pub offsets: Arc<OffsetStore>,
    _dir: TempDir,
}

pub async fn harness(
    settings: WorkerSettings,
    decoder: EventDecoder,
    api: FakeApi,
    sink: RecordingSink,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let offsets = Arc::new(OffsetStore::new(dir.path().join("offset.db")));
    offsets.ensure_exists().await.unwrap();

    let api = Arc::new(api);
    let sink = Arc::new(sink);
    let client = WorkerContext::stream_client("cses2humio-test", settings.stream_timeout).unwrap();

    let ctx = WorkerContext {
        settings: Arc::new(settings),
        decoder: Arc::new(decoder),
        api: api.clone(),
        sink: sink.clone(),
        offsets: offsets.clone(),
        client,
        shutdown: CancellationToken::new(),
    };

    Harness {
        ctx,
        api,
        sink,
        offsets,
        _dir: dir,
    }
}

/// A raw provider line carrying `offset`.
pub fn provider_line(offset: u64) -> String {
    format!(
        r#"{{"metadata":{{"customerIDString":"abc","offset":{offset},"eventType":"AuthActivityAuditEvent","eventCreationTime":1700000000000}},"event":{{"UserId":"analyst"}}}}"#
    )
}

pub fn body(offsets: &[u64]) -> String {
    offsets
        .iter()
        .map(|offset| provider_line(*offset) + "\n")
        .collect()
}

/// Serve one chunked stream response carrying `lines`, then keep the
/// connection open without sending anything else. Returns the stream URL.
pub async fn open_stream(lines: Vec<String>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }

        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nTransfer-Encoding: chunked\r\n\r\n",
            )
            .await
            .unwrap();
        for line in lines {
            let chunk = format!("{line}\n");
            socket
                .write_all(format!("{:x}\r\n{}\r\n", chunk.len(), chunk).as_bytes())
                .await
                .unwrap();
        }
        socket.flush().await.unwrap();

        std::future::pending::<()>().await;
    });

    format!("http://{addr}/sensors/entities/datafeed/v1/0")
}

/// Poll `condition` until it holds, failing the test after 10 seconds.
pub async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
