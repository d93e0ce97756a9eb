mod common;

use common::{body, harness, settings, wait_for, FakeApi, RecordingSink};
use cses2humio::humio::EventDecoder;
use cses2humio::shipper::{Supervisor, SupervisorError, SupervisorSettings};
use httpmock::prelude::*;
use std::time::Duration;

fn supervisor_settings(retry_timer: Duration) -> SupervisorSettings {
    SupervisorSettings {
        app_id: "cses2humio".to_string(),
        retry_timer,
        appid_random: 1,
        keepalive: Duration::from_millis(100),
        shutdown_grace: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_dead_worker_restarts_from_persisted_offset() {
    let server = MockServer::start_async().await;
    let first = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sensors/entities/datafeed/v1/0")
                .query_param("offset", "42");
            then.status(200).body(body(&[42]));
        })
        .await;
    let resumed = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/sensors/entities/datafeed/v1/0")
                .query_param("offset", "43");
            then.status(200).body("");
        })
        .await;

    let h = harness(
        settings(1, Duration::from_secs(9999)),
        EventDecoder::Raw,
        FakeApi::new(vec![server.url("/sensors/entities/datafeed/v1/0")]),
        RecordingSink::default(),
    )
    .await;
    h.offsets.set(0, 42).await.unwrap();

    let shutdown = h.ctx.shutdown.clone();
    let supervisor = Supervisor::new(supervisor_settings(Duration::from_millis(50)), h.ctx.clone());
    let running = tokio::spawn(supervisor.run());

    let resumed = &resumed;
    wait_for(move || async move { resumed.hits_async().await >= 2 }).await;

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("supervisor should stop promptly")
        .unwrap();
    assert!(result.is_ok());

    first.assert_hits_async(1).await;
    assert_eq!(h.offsets.get(0).await.unwrap(), 43);
    assert_eq!(h.sink.batches().len(), 1);
    // Initial discovery plus one per restart
    assert!(h.api.app_ids_seen().len() >= 3);
}

#[tokio::test]
async fn test_shutdown_during_discovery() {
    let h = harness(
        settings(1, Duration::from_secs(9999)),
        EventDecoder::Raw,
        FakeApi::accepting(vec![], |_| false),
        RecordingSink::default(),
    )
    .await;

    let shutdown = h.ctx.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
    });

    let supervisor = Supervisor::new(supervisor_settings(Duration::from_secs(60)), h.ctx.clone());
    let result = tokio::time::timeout(Duration::from_secs(2), supervisor.run())
        .await
        .expect("discovery retry should be interruptible");

    assert!(matches!(result, Err(SupervisorError::ShutdownDuringDiscovery)));
    assert_eq!(h.api.app_ids_seen(), vec!["cses2humio".to_string()]);
}

#[tokio::test]
async fn test_discovery_falls_back_to_random_app_id() {
    let h = harness(
        settings(1, Duration::from_secs(9999)),
        EventDecoder::Raw,
        FakeApi::accepting(
            vec!["https://firehose.example.com/sensors/entities/datafeed/v1/3".to_string()],
            |app_id| app_id != "cses2humio",
        ),
        RecordingSink::default(),
    )
    .await;

    let supervisor = Supervisor::new(supervisor_settings(Duration::from_millis(10)), h.ctx.clone());
    let streams = supervisor.discover(None).await.unwrap();

    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].partition, 3);

    let seen = h.api.app_ids_seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], "cses2humio");
    assert!(seen[1].starts_with("cses2humio-"));
    assert_eq!(seen[1].len(), 32);
    // Refresh must use the id the stream was discovered with
    assert_eq!(streams[0].app_id, seen[1]);
}

#[tokio::test]
async fn test_discovery_for_one_partition() {
    let h = harness(
        settings(1, Duration::from_secs(9999)),
        EventDecoder::Raw,
        FakeApi::new(vec![
            "https://firehose.example.com/sensors/entities/datafeed/v1/0".to_string(),
            "https://firehose.example.com/sensors/entities/datafeed/v1/1".to_string(),
        ]),
        RecordingSink::default(),
    )
    .await;

    let supervisor = Supervisor::new(supervisor_settings(Duration::from_millis(10)), h.ctx.clone());

    let all = supervisor.discover(None).await.unwrap();
    assert_eq!(all.len(), 2);

    let one = supervisor.discover(Some(1)).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].partition, 1);
}
