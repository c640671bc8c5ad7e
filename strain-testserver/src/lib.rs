use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use parking_lot::Mutex;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant, sleep};

pub const PATH_CPU: &str = "/api/cpu";
pub const PATH_DB_SEARCH: &str = "/api/db/search";
pub const PATH_EXTERNAL: &str = "/api/external";
pub const PATH_CONFIGURE: &str = "/admin/mock/configure";

pub const FALLBACK_MARKER: &str = "Graceful Degradation";

const MAX_CPU_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    pub failure_rate: f64,
    pub delay_ms: u64,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.1,
            delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    cpu_requests: Arc<AtomicU64>,
    db_requests: Arc<AtomicU64>,
    external_requests: Arc<AtomicU64>,
    external_failures: Arc<AtomicU64>,
    configure_calls: Arc<AtomicU64>,
    configure_accepted: Arc<AtomicU64>,
    configure_history: Arc<Mutex<Vec<MockConfig>>>,
}

impl TestServerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn cpu_requests(&self) -> u64 {
        self.cpu_requests.load(Ordering::Relaxed)
    }

    pub fn db_requests(&self) -> u64 {
        self.db_requests.load(Ordering::Relaxed)
    }

    pub fn external_requests(&self) -> u64 {
        self.external_requests.load(Ordering::Relaxed)
    }

    pub fn external_failures(&self) -> u64 {
        self.external_failures.load(Ordering::Relaxed)
    }

    /// Every POST to the configure endpoint, accepted or not.
    pub fn configure_calls(&self) -> u64 {
        self.configure_calls.load(Ordering::Relaxed)
    }

    pub fn configure_accepted(&self) -> u64 {
        self.configure_accepted.load(Ordering::Relaxed)
    }

    /// Accepted configurations in arrival order.
    pub fn configure_history(&self) -> Vec<MockConfig> {
        self.configure_history.lock().clone()
    }
}

/// Runtime knobs of the mock: the injected fault profile plus test-only switches.
#[derive(Debug, Clone)]
pub struct MockControl {
    config: Arc<Mutex<MockConfig>>,
    fallback_enabled: Arc<AtomicBool>,
    hard_failures: Arc<AtomicBool>,
    reject_configure: Arc<AtomicU64>,
}

impl Default for MockControl {
    fn default() -> Self {
        Self {
            config: Arc::new(Mutex::new(MockConfig::default())),
            fallback_enabled: Arc::new(AtomicBool::new(true)),
            hard_failures: Arc::new(AtomicBool::new(false)),
            reject_configure: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl MockControl {
    pub fn config(&self) -> MockConfig {
        *self.config.lock()
    }

    fn set_config(&self, cfg: MockConfig) {
        *self.config.lock() = cfg;
    }

    /// With fallback disabled a failed dependency call answers 503 instead of a 200 fallback.
    pub fn set_fallback_enabled(&self, enabled: bool) {
        self.fallback_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Failed dependency calls answer a bare 500, with neither fallback nor degradation marker.
    pub fn set_hard_failures(&self, enabled: bool) {
        self.hard_failures.store(enabled, Ordering::Relaxed);
    }

    /// Answer the next `n` configure calls with 400 regardless of their body.
    pub fn reject_next_configures(&self, n: u64) {
        self.reject_configure.store(n, Ordering::Relaxed);
    }

    fn take_rejection(&self) -> bool {
        self.reject_configure
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub stats: TestServerStats,
    pub control: MockControl,
}

impl AppState {
    pub fn with_config(config: MockConfig) -> Self {
        let state = Self::default();
        state.control.set_config(config);
        state
    }
}

#[derive(Debug, Deserialize)]
struct CpuQuery {
    ms: Option<i64>,
}

fn burn_until(deadline: std::time::Instant) -> u64 {
    let mut acc: u64 = 0;
    while std::time::Instant::now() < deadline {
        for i in 0..1_000u64 {
            acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
        }
    }
    acc
}

async fn handle_cpu(
    State(state): State<AppState>,
    Query(query): Query<CpuQuery>,
) -> (StatusCode, Json<serde_json::Value>) {
    TestServerStats::inc(&state.stats.requests_total);
    TestServerStats::inc(&state.stats.cpu_requests);

    let ms = query.ms.unwrap_or(100);
    if !(0..=MAX_CPU_MS).contains(&ms) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Duration must be between 0 and 10000 ms" })),
        );
    }

    let deadline = std::time::Instant::now() + Duration::from_millis(ms.unsigned_abs());
    let result = match tokio::task::spawn_blocking(move || burn_until(deadline)).await {
        Ok(v) => v,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "cpu burn failed" })),
            );
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "requestedDuration": ms,
            "result": result,
            "message": "CPU burn completed",
        })),
    )
}

async fn handle_db_search(State(state): State<AppState>) -> Json<serde_json::Value> {
    TestServerStats::inc(&state.stats.requests_total);
    TestServerStats::inc(&state.stats.db_requests);

    let (pause_ms, rows) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(1..=10u64), rng.gen_range(5..=20usize))
    };
    sleep(Duration::from_millis(pause_ms)).await;

    let sample: Vec<serde_json::Value> = (0..rows.min(10))
        .map(|i| json!({ "status": i % 3, "count": 100 + i }))
        .collect();
    Json(json!({
        "resultCount": rows,
        "message": "Query executed with GROUP BY on unindexed columns",
        "sampleResults": sample,
    }))
}

async fn handle_external(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    TestServerStats::inc(&state.stats.requests_total);
    TestServerStats::inc(&state.stats.external_requests);

    let cfg = state.control.config();
    let (jitter_ms, failed) = {
        let mut rng = rand::thread_rng();
        let jitter = if cfg.delay_ms == 0 {
            0
        } else {
            rng.gen_range(0..cfg.delay_ms.saturating_mul(2))
        };
        (jitter, rng.r#gen::<f64>() < cfg.failure_rate)
    };
    let started = Instant::now();
    sleep(Duration::from_millis(jitter_ms)).await;

    if !failed {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "response": format!("External service responded after {jitter_ms}ms"),
            })),
        );
    }

    TestServerStats::inc(&state.stats.external_failures);
    let elapsed_ms = started.elapsed().as_millis();
    if state.control.hard_failures.load(Ordering::Relaxed) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error" })),
        );
    }
    if state.control.fallback_enabled.load(Ordering::Relaxed) {
        (
            StatusCode::OK,
            Json(json!({
                "status": "fallback",
                "response": format!("{FALLBACK_MARKER}: cached response after {elapsed_ms}ms"),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "message": format!("{FALLBACK_MARKER}: external service unavailable"),
            })),
        )
    }
}

async fn handle_configure(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    TestServerStats::inc(&state.stats.requests_total);
    TestServerStats::inc(&state.stats.configure_calls);

    if state.control.take_rejection() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "configuration rejected" })),
        );
    }

    let cfg: MockConfig = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("bad json: {err}") })),
            );
        }
    };
    if !cfg.failure_rate.is_finite() || !(0.0..=1.0).contains(&cfg.failure_rate) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "failureRate must be within [0, 1]" })),
        );
    }

    state.control.set_config(cfg);
    TestServerStats::inc(&state.stats.configure_accepted);
    state.stats.configure_history.lock().push(cfg);

    (StatusCode::OK, Json(json!({ "status": "ok", "config": cfg })))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_CPU, get(handle_cpu))
        .route(PATH_DB_SEARCH, get(handle_db_search))
        .route(PATH_EXTERNAL, get(handle_external))
        .route(PATH_CONFIGURE, post(handle_configure))
        .with_state(state)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(MockConfig::default()).await
    }

    pub async fn start_with(config: MockConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = AppState::with_config(config);
        let app = router(state.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            state,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.state.stats
    }

    pub fn control(&self) -> &MockControl {
        &self.state.control
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
