use rand::rngs::StdRng;
use rand::SeedableRng as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strain_metrics::{MetricKind, Registry};
use tokio::sync::Notify;

use crate::metrics::{
    CHECKS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS, TAG_CHECK, TAG_ENDPOINT, TAG_METHOD,
    TAG_SCENARIO, TAG_STATUS,
};
use crate::probe::{HttpClient, ProbeRequest, ProbeResult};

/// One-shot broadcast used to release workers at a common instant.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_started() {
                return;
            }
            notified.await;
        }
    }
}

/// Counts a worker as active for as long as the guard lives.
#[derive(Debug)]
pub struct ActiveGuard<'a> {
    counter: &'a AtomicU64,
}

impl<'a> ActiveGuard<'a> {
    pub fn new(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-worker handle passed to workloads: HTTP access, metric recording and a seeded RNG.
pub struct VuContext {
    pub vu_id: u64,
    pub scenario_vu: u64,
    scenario: Arc<str>,
    tags: Arc<[(String, String)]>,
    base_url: Arc<str>,
    client: Arc<HttpClient>,
    metrics: Arc<Registry>,
    rng: StdRng,
}

impl std::fmt::Debug for VuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VuContext")
            .field("vu_id", &self.vu_id)
            .field("scenario", &self.scenario)
            .field("scenario_vu", &self.scenario_vu)
            .finish_non_exhaustive()
    }
}

impl VuContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        vu_id: u64,
        scenario_vu: u64,
        scenario: Arc<str>,
        tags: Arc<[(String, String)]>,
        base_url: Arc<str>,
        client: Arc<HttpClient>,
        metrics: Arc<Registry>,
        seed: u64,
    ) -> Self {
        Self {
            vu_id,
            scenario_vu,
            scenario,
            tags,
            base_url,
            client,
            metrics,
            rng: StdRng::seed_from_u64(worker_seed(seed, vu_id)),
        }
    }

    pub fn scenario(&self) -> &str {
        &self.scenario
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    /// Probes `req` and records the standard request metrics tagged with `endpoint`.
    pub async fn http(&mut self, endpoint: &str, req: ProbeRequest) -> ProbeResult {
        let method = req.method.clone();
        let res = self.client.probe(req).await;

        let status = res.status.to_string();
        let extra = [
            (TAG_ENDPOINT, endpoint),
            (TAG_METHOD, method.as_str()),
            (TAG_STATUS, status.as_str()),
        ];
        self.record(HTTP_REQS, MetricKind::Counter, 1.0, &extra);
        self.record(HTTP_REQ_DURATION, MetricKind::Trend, res.duration_ms(), &extra);
        self.record(
            HTTP_REQ_FAILED,
            MetricKind::Rate,
            if res.is_failed() { 1.0 } else { 0.0 },
            &extra,
        );
        res
    }

    /// Records a named check into the `checks` rate and returns `ok`.
    pub fn check(&self, name: &str, ok: bool) -> bool {
        self.record(
            CHECKS,
            MetricKind::Rate,
            if ok { 1.0 } else { 0.0 },
            &[(TAG_CHECK, name)],
        );
        ok
    }

    pub fn add(&self, name: &str, value: u64) {
        self.record(name, MetricKind::Counter, value as f64, &[]);
    }

    pub fn rate(&self, name: &str, hit: bool) {
        self.record(name, MetricKind::Rate, if hit { 1.0 } else { 0.0 }, &[]);
    }

    pub fn trend_ms(&self, name: &str, ms: f64) {
        self.record(name, MetricKind::Trend, ms, &[]);
    }

    /// Records with the scenario name and scenario tags attached. `extra` wins on conflicts.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64, extra: &[(&str, &str)]) {
        let mut tags: Vec<(&str, &str)> = Vec::with_capacity(1 + self.tags.len() + extra.len());
        tags.push((TAG_SCENARIO, &self.scenario));
        tags.extend(self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        tags.extend_from_slice(extra);

        if let Err(err) = self.metrics.record(name, kind, value, &tags) {
            tracing::warn!(metric = name, error = %err, "dropping metric sample");
        }
    }
}

fn worker_seed(seed: u64, vu_id: u64) -> u64 {
    // splitmix64 step so adjacent worker ids get unrelated streams.
    let mut z = seed ^ vu_id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
