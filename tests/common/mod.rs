//! Test utilities shared by the integration tests.
//!
//! Provides:
//! - Temporary database fixtures
//! - A local HTTP server standing in for the uplink sink and probe targets
//! - Polling helpers

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use uplink_relay::config::Config;
use uplink_relay::observability::tracing::init_test_tracing;
use uplink_relay::storage::{QueueOrdering, QueueStore, StatusStore, StorePool};

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl TestFixture {
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("relay.db");
        Self { temp_dir, db_path }
    }

    /// Open a fresh pool on the fixture database, as a restarted process would.
    pub fn pool(&self) -> StorePool {
        StorePool::open(&self.db_path, 4).expect("failed to open pool")
    }

    pub fn queue(&self) -> QueueStore {
        QueueStore::new(self.pool(), QueueOrdering::Fifo)
    }

    pub fn status(&self) -> StatusStore {
        StatusStore::new(self.pool())
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A request received by [`MockHttp`].
#[derive(Debug, Clone)]
pub struct Received {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone, Default)]
struct MockState {
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    received: Arc<Mutex<Vec<Received>>>,
    hits: Arc<AtomicUsize>,
}

/// Local HTTP server answering every path and method with a configurable
/// status after a configurable delay.
pub struct MockHttp {
    pub addr: SocketAddr,
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockHttp {
    pub async fn start(status: u16) -> Self {
        let state = MockState::default();
        state.status.store(status, Ordering::SeqCst);

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("no local addr");
        let (tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .expect("mock server failed");
        });

        Self {
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().unwrap().clone()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    state.received.lock().unwrap().push(Received {
        content_type: headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });
    state.hits.fetch_add(1, Ordering::SeqCst);

    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Relay configuration with short intervals on `database`.
pub fn test_config(database: PathBuf) -> Config {
    Config {
        database,
        pool_size: 4,
        drain_interval_ms: 50,
        probe_interval_ms: 50,
        probe_timeout_ms: 200,
        shutdown_grace_secs: 5,
        log_level: "debug".into(),
        ..Config::default()
    }
}

/// A ChirpStack-style uplink topic.
pub fn up_topic(device: &str) -> String {
    format!("application/7/device/{device}/event/up")
}

/// An uplink payload carrying `dedup_id`.
pub fn up_payload(dedup_id: &str) -> Vec<u8> {
    format!(r#"{{"deduplicationId":"{dedup_id}","fCnt":1,"data":"AQID"}}"#).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.temp_dir.path().exists());
        assert!(fixture.db_path.to_string_lossy().contains("relay.db"));
    }
}
