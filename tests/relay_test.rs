//! Store-and-forward integration tests.
//!
//! Tests:
//! - Batch limit bounds each drain cycle
//! - A failing sink never loses records
//! - Crash between delivery and removal redelivers exactly once
//! - HTTP sink contract against a live server
//! - Runtime relays admitted events and shuts down gracefully
//! - Shutdown reports an exceeded grace period
//! - Storage failures abort a cycle without stopping the worker

mod common;

use async_trait::async_trait;
use common::{test_config, up_payload, up_topic, wait_for, MockHttp, TestFixture};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uplink_relay::config::Config;
use uplink_relay::relay::{
    Admission, DeliveryError, DeliverySink, DrainConfig, DrainWorker, Gateway, HttpSink,
};
use uplink_relay::runtime::{RelayRuntime, Services, ShutdownOutcome};
use uplink_relay::storage::{QueueRecord, QueueStore};

/// In-process sink that answers every delivery with a fixed status.
#[derive(Default)]
struct RecordingSink {
    fail: bool,
    delivered: Mutex<Vec<String>>,
    attempts: AtomicUsize,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, record: &QueueRecord) -> Result<(), DeliveryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DeliveryError::Status(503));
        }
        self.delivered.lock().unwrap().push(record.message_id.clone());
        Ok(())
    }
}

fn fill(queue: &QueueStore, count: usize) {
    for i in 0..count {
        queue
            .enqueue(&format!("m{i:03}"), &format!("d{i:03}"), &up_payload(&format!("d{i:03}")))
            .unwrap();
    }
}

fn drain_config(batch_limit: usize) -> DrainConfig {
    DrainConfig {
        interval: Duration::from_millis(10),
        batch_limit,
        ..DrainConfig::default()
    }
}

#[tokio::test]
async fn test_batch_limit_bounds_each_cycle() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 25);

    let sink = Arc::new(RecordingSink::default());
    let mut worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));

    let first = worker.run_cycle().await.unwrap();
    assert_eq!(first.peeked, 20);
    assert_eq!(first.removed, 20);
    assert_eq!(queue.depth().unwrap(), 5);

    let second = worker.run_cycle().await.unwrap();
    assert_eq!(second.removed, 5);
    assert_eq!(queue.depth().unwrap(), 0);

    // Oldest first, each exactly once.
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 25);
    assert_eq!(delivered.first().map(String::as_str), Some("m000"));
    assert_eq!(delivered.last().map(String::as_str), Some("m024"));
}

#[tokio::test]
async fn test_failing_sink_never_loses_records() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 10);

    let sink = Arc::new(RecordingSink::failing());
    let mut worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));

    for _ in 0..5 {
        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.failed, 10);
        assert_eq!(report.removed, 0);
        assert_eq!(queue.depth().unwrap(), 10);
    }

    assert_eq!(sink.attempts.load(Ordering::SeqCst), 50);
    let record = queue.find_by_dedup("d004").unwrap().unwrap();
    assert_eq!(record.payload, up_payload("d004"));
}

#[tokio::test]
async fn test_queue_empties_within_bounded_cycles() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 47);

    let sink = Arc::new(RecordingSink::default());
    let mut worker = DrainWorker::new(queue.clone(), sink, drain_config(10));

    // ceil(47 / 10) cycles
    for _ in 0..5 {
        worker.run_cycle().await.unwrap();
    }
    assert_eq!(queue.depth().unwrap(), 0);
}

#[tokio::test]
async fn test_crash_between_delivery_and_removal_redelivers_once() {
    let fixture = TestFixture::new();
    {
        let queue = fixture.queue();
        fill(&queue, 1);

        // Delivered, but the process died before the removal.
        let sink = RecordingSink::default();
        let record = queue.peek_batch(1).unwrap().remove(0);
        sink.deliver(&record).await.unwrap();
    }

    let queue = fixture.queue();
    assert_eq!(queue.depth().unwrap(), 1);

    let sink = Arc::new(RecordingSink::default());
    let mut worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));

    worker.run_cycle().await.unwrap();
    worker.run_cycle().await.unwrap();

    assert_eq!(sink.delivered(), vec!["m000".to_string()]);
    assert_eq!(queue.depth().unwrap(), 0);
}

#[tokio::test]
async fn test_http_sink_posts_payload_verbatim() {
    let server = MockHttp::start(200).await;
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 1);

    let sink = HttpSink::new(&server.url("/uplink"), Duration::from_secs(2)).unwrap();
    let mut worker = DrainWorker::new(queue.clone(), Arc::new(sink), drain_config(20));

    let report = worker.run_cycle().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(queue.depth().unwrap(), 0);
    let received = server.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, up_payload("d000"));
    assert_eq!(received[0].content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_http_sink_only_200_confirms_delivery() {
    let server = MockHttp::start(202).await;
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 1);

    let sink = HttpSink::new(&server.url("/uplink"), Duration::from_secs(2)).unwrap();
    let mut worker = DrainWorker::new(queue.clone(), Arc::new(sink), drain_config(20));

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(queue.depth().unwrap(), 1);

    server.set_status(200);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(queue.depth().unwrap(), 0);
    assert_eq!(server.hits(), 2);
}

#[tokio::test]
async fn test_gateway_and_drain_share_queue() {
    let server = MockHttp::start(200).await;
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    let gateway = Gateway::new(queue.clone(), ["up"]);

    let first = gateway.admit(&up_topic("dev-1"), &up_payload("d1")).await.unwrap();
    let again = gateway.admit(&up_topic("dev-1"), &up_payload("d1")).await.unwrap();
    assert!(matches!(first, Admission::Queued { .. }));
    assert!(matches!(again, Admission::Duplicate { .. }));

    let sink = HttpSink::new(&server.url("/uplink"), Duration::from_secs(2)).unwrap();
    let mut worker = DrainWorker::new(queue.clone(), Arc::new(sink), drain_config(20));
    worker.run_cycle().await.unwrap();

    assert_eq!(server.hits(), 1);
    assert_eq!(queue.depth().unwrap(), 0);
}

#[tokio::test]
async fn test_runtime_relays_and_shuts_down_gracefully() {
    let server = MockHttp::start(200).await;
    let fixture = TestFixture::new();
    let config = Config {
        uplink_endpoint: server.url("/uplink"),
        no_supervisor: true,
        ..test_config(fixture.db_path.clone())
    };

    let services = Services::build(&config).await.unwrap();
    let queue = services.queue.clone();
    let runtime = RelayRuntime::start(services, None);
    assert!(runtime.supervisor().is_none());

    for i in 0..3 {
        let admission = runtime
            .gateway()
            .admit(&up_topic("dev-1"), &up_payload(&format!("d{i}")))
            .await
            .unwrap();
        assert!(matches!(admission, Admission::Queued { .. }));
    }

    let drained = wait_for(Duration::from_secs(5), || {
        server.hits() == 3 && queue.depth().unwrap() == 0
    })
    .await;
    assert!(drained, "queue should drain to the sink");

    let outcome = runtime.shutdown(Duration::from_secs(5)).await;
    assert_eq!(outcome, ShutdownOutcome::Graceful);
}

#[tokio::test]
async fn test_runtime_keeps_records_while_sink_is_down() {
    let server = MockHttp::start(500).await;
    let fixture = TestFixture::new();
    let config = Config {
        uplink_endpoint: server.url("/uplink"),
        no_supervisor: true,
        ..test_config(fixture.db_path.clone())
    };

    let services = Services::build(&config).await.unwrap();
    let queue = services.queue.clone();
    let runtime = RelayRuntime::start(services, None);

    runtime
        .gateway()
        .admit(&up_topic("dev-1"), &up_payload("d1"))
        .await
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || server.hits() >= 2).await);
    assert_eq!(queue.depth().unwrap(), 1);

    server.set_status(200);
    assert!(wait_for(Duration::from_secs(5), || queue.depth().unwrap() == 0).await);

    assert_eq!(
        runtime.shutdown(Duration::from_secs(5)).await,
        ShutdownOutcome::Graceful
    );
}

#[tokio::test]
async fn test_runtime_reports_exceeded_grace() {
    let server = MockHttp::start(200).await;
    server.set_delay(Duration::from_secs(3));
    let fixture = TestFixture::new();
    let config = Config {
        uplink_endpoint: server.url("/uplink"),
        no_supervisor: true,
        ..test_config(fixture.db_path.clone())
    };

    let services = Services::build(&config).await.unwrap();
    let queue = services.queue.clone();
    let runtime = RelayRuntime::start(services, None);
    runtime
        .gateway()
        .admit(&up_topic("dev-1"), &up_payload("d1"))
        .await
        .unwrap();

    // Let the first cycle start its slow delivery.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = runtime.shutdown(Duration::from_millis(100)).await;
    assert_eq!(outcome, ShutdownOutcome::GraceExceeded);
    assert_eq!(queue.depth().unwrap(), 1);
}

fn park_queue_table(conn: &rusqlite::Connection) {
    conn.execute_batch("ALTER TABLE uplink_queue RENAME TO uplink_queue_parked")
        .unwrap();
}

fn restore_queue_table(conn: &rusqlite::Connection) {
    conn.execute_batch("ALTER TABLE uplink_queue_parked RENAME TO uplink_queue")
        .unwrap();
}

#[tokio::test]
async fn test_store_failure_aborts_cycle_then_recovers() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 3);
    let conn = fixture.pool().get().unwrap();

    let sink = Arc::new(RecordingSink::default());
    let mut worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));

    park_queue_table(&conn);
    let err = worker.run_cycle().await.unwrap_err();
    assert!(err.is_io());
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);

    restore_queue_table(&conn);
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.removed, 3);
    assert_eq!(queue.depth().unwrap(), 0);
}

#[tokio::test]
async fn test_drain_worker_survives_store_outage() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 2);
    let conn = fixture.pool().get().unwrap();
    park_queue_table(&conn);

    let sink = Arc::new(RecordingSink::default());
    let worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));
    let cancel = tokio_util::sync::CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    // Several ticks fail while the table is unavailable.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished(), "worker must keep running");

    restore_queue_table(&conn);
    assert!(wait_for(Duration::from_secs(5), || queue.depth().unwrap() == 0).await);
    assert_eq!(sink.delivered().len(), 2);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_failed_remove_redelivers_once() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    fill(&queue, 1);
    let conn = fixture.pool().get().unwrap();
    conn.execute_batch(
        "CREATE TRIGGER hold_queue BEFORE DELETE ON uplink_queue
         BEGIN SELECT RAISE(ABORT, 'delete held'); END;",
    )
    .unwrap();

    let sink = Arc::new(RecordingSink::default());
    let mut worker = DrainWorker::new(queue.clone(), sink.clone(), drain_config(20));

    // Delivered, but the removal fails.
    assert!(worker.run_cycle().await.is_err());
    assert_eq!(queue.depth().unwrap(), 1);

    conn.execute_batch("DROP TRIGGER hold_queue").unwrap();
    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.removed, 1);

    let report = worker.run_cycle().await.unwrap();
    assert_eq!(report.peeked, 0);
    assert_eq!(sink.delivered(), vec!["m000".to_string(), "m000".to_string()]);
}

#[tokio::test]
async fn test_gateway_reports_store_failure() {
    let fixture = TestFixture::new();
    let queue = fixture.queue();
    let gateway = Gateway::new(queue.clone(), ["up"]);
    let conn = fixture.pool().get().unwrap();

    park_queue_table(&conn);
    let err = gateway
        .admit(&up_topic("dev-1"), &up_payload("d1"))
        .await
        .unwrap_err();
    assert!(err.is_io());

    // Nothing was admitted, so the broker's redelivery is queued normally.
    restore_queue_table(&conn);
    let admission = gateway.admit(&up_topic("dev-1"), &up_payload("d1")).await.unwrap();
    assert!(matches!(admission, Admission::Queued { .. }));
    assert_eq!(queue.depth().unwrap(), 1);
}

