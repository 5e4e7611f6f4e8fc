//! End-to-end tests for the full pipeline: scheduler fan-out, detection,
//! assembly, forwarding to the sink.

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use process_monitoring::MonitoredProcess;
use process_monitoring::actors::{forwarder::ForwarderHandle, scheduler::SchedulerHandle};
use process_monitoring::detect::HttpDetectionClient;

use crate::helpers::*;

fn detection_client(server: &MockServer) -> Arc<HttpDetectionClient> {
    Arc::new(HttpDetectionClient::new(
        &server.uri(),
        Duration::from_secs(5),
    ))
}

#[tokio::test(flavor = "multi_thread")]
async fn round_delivers_all_frames_with_predictions() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cpu_prediction_body(100, 1)))
        .mount(&mock_server)
        .await;

    let sink = TestSink::start(SinkBehavior::Accept).await;

    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 64));
    let scheduler = SchedulerHandle::spawn(
        vec![MonitoredProcess {
            port: 8080,
            pid: 100,
        }],
        Duration::from_secs(3600),
        Arc::new(FixedSampler::healthy()),
        detection_client(&mock_server),
        forwarder.clone(),
    );

    let launched = scheduler.tick_now().await.unwrap();
    assert_eq!(launched, 1);

    // One batch is seven samples: CPU total, memory, disk, four sub-metrics.
    assert!(
        wait_for_frames(&sink, 7, Duration::from_secs(5)).await,
        "expected 7 frames, got {}",
        sink.frame_count()
    );

    let frames = sink.frames();

    // The aggregate CPU frame, byte for byte.
    assert!(
        frames.contains(
            &r#"{"pid":100,"metric_type":"CPU","value":5.0,"sub_type":"total","prediction":1}"#
                .to_string()
        ),
        "missing the aggregate CPU frame in {frames:?}"
    );

    // The CPU prediction applies to the aggregate and all four sub-metrics.
    let predicted = frames
        .iter()
        .map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap())
        .filter(|v| v["prediction"] == 1)
        .count();
    assert_eq!(predicted, 5);

    // Memory and disk had no prediction key; the field must be absent, not
    // null.
    let memory = frames
        .iter()
        .find(|f| f.contains("\"MEMORY\""))
        .expect("missing memory frame");
    let memory: serde_json::Value = serde_json::from_str(memory).unwrap();
    assert!(memory.get("prediction").is_none());
    assert!(memory.get("sub_type").is_none());
    assert_eq!(memory["value"], 1024.0);

    scheduler.shutdown().await.unwrap();
    forwarder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn two_processes_deliver_independent_batches() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "predictions": []
        })))
        .mount(&mock_server)
        .await;

    let sink = TestSink::start(SinkBehavior::Accept).await;

    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 64));
    let scheduler = SchedulerHandle::spawn(
        test_processes(2),
        Duration::from_secs(3600),
        Arc::new(FixedSampler::healthy()),
        detection_client(&mock_server),
        forwarder.clone(),
    );

    assert_eq!(scheduler.tick_now().await.unwrap(), 2);
    assert!(wait_for_frames(&sink, 14, Duration::from_secs(5)).await);

    let frames = sink.frames();
    let for_pid = |pid: i64| {
        frames
            .iter()
            .map(|f| serde_json::from_str::<serde_json::Value>(f).unwrap())
            .filter(|v| v["pid"] == pid)
            .count()
    };

    assert_eq!(for_pid(100), 7);
    assert_eq!(for_pid(200), 7);

    // No prediction entries came back, so no frame may carry the field.
    assert!(frames.iter().all(|f| !f.contains("prediction")));

    scheduler.shutdown().await.unwrap();
    forwarder.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_rounds_keep_delivering() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/detect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(cpu_prediction_body(100, -1)))
        .mount(&mock_server)
        .await;

    let sink = TestSink::start(SinkBehavior::Accept).await;

    let forwarder = ForwarderHandle::spawn(&sink_config(&sink.url(), 64));
    let scheduler = SchedulerHandle::spawn(
        vec![MonitoredProcess {
            port: 8080,
            pid: 100,
        }],
        Duration::from_secs(3600),
        Arc::new(FixedSampler::healthy()),
        detection_client(&mock_server),
        forwarder.clone(),
    );

    for _ in 0..3 {
        scheduler.tick_now().await.unwrap();
    }

    assert!(wait_for_frames(&sink, 21, Duration::from_secs(5)).await);

    let stats = forwarder.get_stats().await.unwrap();
    assert_eq!(stats.sent, 21);
    assert_eq!(stats.dropped, 0);

    scheduler.shutdown().await.unwrap();
    forwarder.shutdown().await.unwrap();
}
