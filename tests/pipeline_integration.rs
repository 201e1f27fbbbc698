//! End-to-end pipeline tests
//!
//! Drive the public pipeline API against a scripted source client and a
//! file-backed SQLite store, covering every run outcome:
//! 1. Clean batch publishes primary signals
//! 2. Critical batch recovered by the secondary source
//! 3. Critical batch with a failed secondary is blocked and writes nothing
//! 4. Primary outage reports no data
//! 5. Exhausted persistence reports storage failure
//! 6. Cancellation is never reported as success
//! 7. The reqwest client against a loopback server

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{http::StatusCode, routing::get, Router};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use signal_gate::models::RecordPayload;
use signal_gate::signals::HeuristicSignalProducer;
use signal_gate::sources::{FetchError, HttpSourceClient, SourceClient};
use signal_gate::storage::{CancelFlag, SignalStore, SqliteSignalStore, StoredSignal};
use signal_gate::{ErrorKind, Pipeline, PipelineConfig, RunStatus};

const PRIMARY_URL: &str = "http://primary.test/games";
const FALLBACK_URL: &str = "http://fallback.test/events";

/// Answers by URL; unknown URLs are unavailable.
#[derive(Default)]
struct ScriptedSource {
    responses: Mutex<HashMap<String, Result<String, FetchError>>>,
    requested: Mutex<Vec<String>>,
}

impl ScriptedSource {
    fn respond(self, url: &str, response: Result<String, FetchError>) -> Self {
        self.responses.lock().insert(url.to_string(), response);
        self
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl SourceClient for ScriptedSource {
    async fn get(&self, url: &str, _timeout: Duration, _headers: &[(String, String)]) -> Result<String, FetchError> {
        self.requested.lock().push(url.to_string());
        match self.responses.lock().get(url) {
            Some(Ok(body)) => Ok(body.clone()),
            Some(Err(FetchError::Timeout)) => Err(FetchError::Timeout),
            Some(Err(FetchError::Http { status, body })) => Err(FetchError::Http {
                status: *status,
                body: body.clone(),
            }),
            Some(Err(FetchError::Unavailable(msg))) => Err(FetchError::Unavailable(msg.clone())),
            None => Err(FetchError::Unavailable(format!("no route to {url}"))),
        }
    }
}

struct BrokenStore;

#[async_trait]
impl SignalStore for BrokenStore {
    async fn upsert_batch(&self, _run_id: &str, _rows: &[StoredSignal]) -> Result<usize> {
        anyhow::bail!("database is locked")
    }
}

fn config() -> PipelineConfig {
    PipelineConfig {
        primary_source_url: PRIMARY_URL.to_string(),
        fallback_source_url: FALLBACK_URL.to_string(),
        backoff_base_seconds: 0.0,
        ..PipelineConfig::default()
    }
}

fn game(id: &str, games_played: u32) -> Value {
    let stats = json!({
        "wins_last_5": 3,
        "avg_points": 114.0,
        "avg_allowed": 109.0,
        "games_played": games_played
    });
    json!({
        "external_id": id,
        "home_team": {"id": "LAL", "name": "Lakers", "city": "Los Angeles"},
        "away_team": {"id": "bos", "name": "Celtics", "city": "Boston"},
        "scheduled_at": (Utc::now() + ChronoDuration::hours(4)).to_rfc3339(),
        "season": "2024-25",
        "home_stats": stats,
        "away_stats": stats
    })
}

fn batch(values: Vec<Value>) -> Vec<RecordPayload> {
    values.into_iter().map(RecordPayload::from_value).collect()
}

/// One valid record and two empty ones: pass rate 1/3.
fn critical_batch() -> Vec<RecordPayload> {
    batch(vec![game("p1", 20), json!({}), json!({})])
}

fn pipeline(source: Arc<ScriptedSource>, store: Arc<dyn SignalStore>) -> Pipeline {
    Pipeline::new(config(), source, store, Arc::new(HeuristicSignalProducer::default()))
}

fn sqlite() -> (tempfile::TempDir, Arc<SqliteSignalStore>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("signals.db");
    let store = SqliteSignalStore::new(path.to_str().unwrap()).unwrap();
    (dir, Arc::new(store))
}

// =============================================================================
// Run outcomes
// =============================================================================

#[tokio::test]
async fn test_clean_batch_publishes_primary_signals() {
    let (_dir, store) = sqlite();
    let source = Arc::new(ScriptedSource::default());
    let gate = pipeline(source.clone(), store.clone());

    let report = gate
        .run_batch(batch(vec![game("p1", 20), game("p2", 20), game("p3", 2)]), &CancelFlag::new())
        .await;

    assert_eq!(report.status, RunStatus::Published);
    assert!(source.requested().is_empty(), "healthy batch must not touch the fallback");
    assert_eq!(report.signals_generated, 2);
    assert_eq!(report.signals_persisted, 2);
    assert_eq!(report.exclusions.len(), 1);
    assert_eq!(report.exclusions[0].record_id, "p3");

    assert_eq!(store.count_for_run(&report.run_id).unwrap(), 2);
    let stored = store.get_signal(&report.run_id, "p1").unwrap().unwrap();
    assert_eq!(stored.origin, "primary");
    assert_eq!(stored.quality_score, Some(100.0));
    assert_eq!(stored.payload["home_team"]["id"], "lal");

    let entry = store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(entry.status, "published");
    assert_eq!(entry.mode.as_deref(), Some("normal"));
    assert_eq!(entry.allow_publishing, Some(true));
}

#[tokio::test]
async fn test_critical_batch_recovers_from_secondary() {
    let (_dir, store) = sqlite();
    let secondary = json!({"games": [game("s1", 30), game("s2", 30)]}).to_string();
    let source = Arc::new(ScriptedSource::default().respond(FALLBACK_URL, Ok(secondary)));
    let gate = pipeline(source.clone(), store.clone());

    let report = gate.run_batch(critical_batch(), &CancelFlag::new()).await;

    assert_eq!(report.status, RunStatus::Published);
    assert_eq!(source.requested(), vec![FALLBACK_URL.to_string()]);
    let summary = report.summary.as_ref().unwrap();
    assert!(summary.critical_failure);
    let decision = report.decision.as_ref().unwrap();
    assert_eq!(decision.mode.as_str(), "degraded-fallback");
    assert!(decision.allow_publishing);
    assert!(!report.fallback.as_ref().unwrap().cascading_failure);

    // primary p1 is discarded in favour of the secondary set
    assert_eq!(store.count_for_run(&report.run_id).unwrap(), 2);
    assert!(store.get_signal(&report.run_id, "p1").unwrap().is_none());
    let stored = store.get_signal(&report.run_id, "s1").unwrap().unwrap();
    assert_eq!(stored.origin, "secondary");
}

#[tokio::test]
async fn test_failed_secondary_blocks_publishing() {
    let (_dir, store) = sqlite();
    let source = Arc::new(ScriptedSource::default().respond(
        FALLBACK_URL,
        Err(FetchError::Http {
            status: 502,
            body: "bad gateway".into(),
        }),
    ));
    let gate = pipeline(source, store.clone());

    let report = gate.run_batch(critical_batch(), &CancelFlag::new()).await;

    match &report.status {
        RunStatus::Blocked { reason, cause } => {
            assert!(reason.contains("QUALITY"));
            assert!(reason.contains("FALLBACK FAILED"));
            assert_eq!(*cause, Some(ErrorKind::FallbackHttpError));
        }
        other => panic!("expected blocked, got {:?}", other),
    }
    let fallback = report.fallback.as_ref().unwrap();
    assert!(fallback.cascading_failure);
    assert_eq!(fallback.cause, Some(ErrorKind::FallbackHttpError));
    assert_eq!(report.signals_persisted, 0);
    assert!(store.is_empty());

    let entry = store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(entry.status, "blocked");
    assert_eq!(entry.mode.as_deref(), Some("degraded-no-bet"));
    assert_eq!(entry.allow_publishing, Some(false));
    assert_eq!(entry.error_cause.as_deref(), Some("FALLBACK_HTTP_ERROR"));
}

#[tokio::test]
async fn test_secondary_timeout_is_recorded_on_blocked_run() {
    let (_dir, store) = sqlite();
    let source = Arc::new(ScriptedSource::default().respond(FALLBACK_URL, Err(FetchError::Timeout)));
    let gate = pipeline(source, store.clone());

    let report = gate.run_batch(critical_batch(), &CancelFlag::new()).await;

    assert_eq!(report.status.label(), "blocked");
    assert_eq!(report.status.cause(), Some(ErrorKind::FallbackTimeout));
    let entry = store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(entry.error_cause.as_deref(), Some("FALLBACK_TIMEOUT"));
}

#[tokio::test]
async fn test_primary_outage_reports_no_data() {
    let (_dir, store) = sqlite();
    let source = Arc::new(ScriptedSource::default().respond(PRIMARY_URL, Err(FetchError::Timeout)));
    let gate = pipeline(source, store.clone());

    let report = gate.run_from_primary(&CancelFlag::new()).await;

    assert!(matches!(
        report.status,
        RunStatus::NoData {
            cause: ErrorKind::SourceTimeout,
            ..
        }
    ));
    assert!(report.decision.is_none());
    let entry = store.get_run(&report.run_id).unwrap().unwrap();
    assert_eq!(entry.error_cause.as_deref(), Some("SOURCE_TIMEOUT"));
}

#[tokio::test]
async fn test_primary_batch_is_processed() {
    let (_dir, store) = sqlite();
    let body = json!({"games": [game("p1", 20)]}).to_string();
    let source = Arc::new(ScriptedSource::default().respond(PRIMARY_URL, Ok(body)));
    let gate = pipeline(source, store.clone());

    let report = gate.run_from_primary(&CancelFlag::new()).await;

    assert_eq!(report.status, RunStatus::Published);
    assert_eq!(store.count_for_run(&report.run_id).unwrap(), 1);
}

#[tokio::test]
async fn test_exhausted_persistence_is_storage_failure() {
    let source = Arc::new(ScriptedSource::default());
    let gate = pipeline(source, Arc::new(BrokenStore));

    let report = gate.run_batch(batch(vec![game("p1", 20)]), &CancelFlag::new()).await;

    assert!(matches!(
        report.status,
        RunStatus::StorageFailed {
            cause: ErrorKind::PersistenceFailure,
            ..
        }
    ));
    assert!(!report.status.is_success());
    assert_eq!(report.persistence.len(), 3);
    assert!(report.persistence.iter().all(|a| !a.succeeded));
    assert_eq!(report.signals_persisted, 0);
}

#[tokio::test]
async fn test_cancelled_run_is_not_success() {
    let (_dir, store) = sqlite();
    let gate = pipeline(Arc::new(ScriptedSource::default()), store.clone());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let report = gate.run_batch(batch(vec![game("p1", 20)]), &cancel).await;

    assert_eq!(report.status, RunStatus::Cancelled);
    assert!(store.is_empty());
    assert_eq!(store.get_run(&report.run_id).unwrap().unwrap().status, "cancelled");
}

#[tokio::test]
async fn test_empty_batch_publishes_nothing() {
    let (_dir, store) = sqlite();
    let source = Arc::new(ScriptedSource::default());
    let gate = pipeline(source.clone(), store.clone());

    let report = gate.run_batch(Vec::new(), &CancelFlag::new()).await;

    assert_eq!(report.status, RunStatus::Published);
    let summary = report.summary.unwrap();
    assert_eq!(summary.total, 0);
    assert_eq!(summary.pass_rate, 0.0);
    assert!(!summary.critical_failure);
    assert!(source.requested().is_empty());
    assert!(store.is_empty());
}

// =============================================================================
// HTTP client against a loopback server
// =============================================================================

async fn loopback() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { r#"{"games": []}"# }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_http_client_classifies_responses() {
    let base = loopback().await;
    let client = HttpSourceClient::new().unwrap();
    let timeout = Duration::from_secs(5);

    let body = client.get(&format!("{base}/ok"), timeout, &[]).await.unwrap();
    assert_eq!(body, r#"{"games": []}"#);

    match client.get(&format!("{base}/broken"), timeout, &[]).await {
        Err(FetchError::Http { status, body }) => {
            assert_eq!(status, 500);
            assert!(body.contains("upstream"));
        }
        other => panic!("expected http error, got {:?}", other),
    }

    let slow = client
        .get(&format!("{base}/slow"), Duration::from_millis(100), &[])
        .await;
    assert!(matches!(slow, Err(FetchError::Timeout)));
}
