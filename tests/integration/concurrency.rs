//! Concurrency tests
//!
//! - the forwarder is the single writer: never more than one sink
//!   connection, even across reconnects
//! - enqueueing never blocks producers, full queues shed observably
//! - parallel units of work within a round stay independent

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use process_monitoring::actors::{forwarder::ForwarderHandle, scheduler::SchedulerHandle};
use process_monitoring::config::SinkConfig;
use process_monitoring::detect::HttpDetectionClient;
use process_monitoring::{MetricType, OutboundMessage};

use crate::helpers::*;

fn message_for_pid(pid: i32) -> OutboundMessage {
    OutboundMessage {
        pid,
        metric_type: MetricType::Disk,
        value: 200.0,
        sub_type: None,
        prediction: None,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn five_processes_share_one_connection() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "predictions": []
        })))
        .mount(&mock_server)
        .await;

    let sink = TestSink::start(SinkBehavior::Accept).await;

    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 256));
    let scheduler = SchedulerHandle::spawn(
        test_processes(5),
        Duration::from_secs(3600),
        Arc::new(FixedSampler::healthy()),
        Arc::new(HttpDetectionClient::new(
            &mock_server.uri(),
            Duration::from_secs(5),
        )),
        forwarder.clone(),
    );

    assert_eq!(scheduler.tick_now().await.unwrap(), 5);
    assert!(wait_for_frames(&sink, 35, Duration::from_secs(5)).await);

    assert_eq!(sink.connection_count(), 1);
    assert_eq!(sink.max_concurrent(), 1);

    scheduler.shutdown().await.unwrap();
    forwarder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_never_overlap_connections() {
    let sink = TestSink::start(SinkBehavior::CloseAfter(2)).await;

    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 64));

    for pid in 1..=12 {
        forwarder.try_enqueue(message_for_pid(pid));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(wait_for_frames(&sink, 6, Duration::from_secs(10)).await);
    assert!(sink.connection_count() >= 3);

    // However many reconnects happened, two connections were never open at
    // once.
    assert_eq!(sink.max_concurrent(), 1);

    forwarder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn full_queue_sheds_instead_of_blocking() {
    // No sink listens and the backoff is long, so the queue cannot drain.
    let forwarder = ForwarderHandle::spawn(&SinkConfig {
        url: "ws://127.0.0.1:1".to_string(),
        queue_capacity: 4,
        reconnect_min_secs: 60,
        reconnect_max_secs: 60,
    });

    let started = tokio::time::Instant::now();
    let mut accepted = 0;
    for pid in 0..50 {
        if forwarder.try_enqueue(message_for_pid(pid)) {
            accepted += 1;
        }
    }

    // Fifty non-blocking calls come back quickly no matter what the sink
    // does.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(accepted <= 6, "queue of 4 cannot accept {accepted} messages");
    assert!(forwarder.dropped_enqueues() >= 44);
}

#[tokio::test(flavor = "multi_thread")]
async fn units_of_work_run_concurrently_per_round() {
    // Every detection call takes 150ms; five sequential calls would need
    // 750ms, so the round duration exposes whether the fan-out overlaps.
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(serde_json::json!({"predictions": []})),
        )
        .mount(&mock_server)
        .await;

    let sink = TestSink::start(SinkBehavior::Accept).await;
    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 256));

    let scheduler = SchedulerHandle::spawn(
        test_processes(5),
        Duration::from_secs(3600),
        Arc::new(FixedSampler::healthy()),
        Arc::new(HttpDetectionClient::new(
            &mock_server.uri(),
            Duration::from_secs(5),
        )),
        forwarder.clone(),
    );

    let started = tokio::time::Instant::now();
    assert_eq!(scheduler.tick_now().await.unwrap(), 5);
    assert!(
        started.elapsed() < Duration::from_millis(600),
        "units of work did not run in parallel: {:?}",
        started.elapsed()
    );

    scheduler.shutdown().await.unwrap();
    forwarder.shutdown().await.unwrap();
}
