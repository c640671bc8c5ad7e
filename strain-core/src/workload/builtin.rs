//! Workloads exercising the service's CPU, database and external-dependency endpoints.

use async_trait::async_trait;
use rand::Rng as _;
use std::time::Duration;
use strain_metrics::MetricKind;

use super::{ThinkTime, Workload};
use crate::probe::{ProbeRequest, ProbeResult};
use crate::vu::VuContext;

/// Body marker the service returns when it falls back instead of calling the dependency.
pub const FALLBACK_MARKER: &str = "Graceful Degradation";

const CPU_DURATIONS_MS: [u64; 4] = [50, 100, 200, 500];

pub fn cpu_path(ms: u64) -> String {
    format!("/api/cpu?ms={ms}")
}

pub fn db_path() -> &'static str {
    "/api/db/search"
}

pub fn external_path() -> &'static str {
    "/api/external"
}

fn has_result_count(res: &ProbeResult) -> bool {
    serde_json::from_slice::<serde_json::Value>(&res.body)
        .ok()
        .is_some_and(|v| v.get("resultCount").is_some())
}

async fn get(vu: &mut VuContext, endpoint: &str, path: &str) -> ProbeResult {
    let url = vu.url(path);
    vu.http(endpoint, ProbeRequest::get(url)).await
}

#[derive(Debug, Clone, Copy)]
pub struct CpuHeavy;

#[async_trait]
impl Workload for CpuHeavy {
    fn name(&self) -> &'static str {
        "cpu_heavy"
    }

    fn think_time(&self) -> ThinkTime {
        ThinkTime::between(Duration::from_secs(1), Duration::from_secs(3))
    }

    fn metrics(&self) -> &'static [(&'static str, MetricKind)] {
        &[("cpu_latency", MetricKind::Trend), ("errors", MetricKind::Rate)]
    }

    async fn iterate(&self, vu: &mut VuContext) {
        let ms = CPU_DURATIONS_MS[vu.rng().gen_range(0..CPU_DURATIONS_MS.len())];
        let res = get(vu, "cpu", &cpu_path(ms)).await;

        let status_ok = vu.check("CPU: status is 200", res.status == 200);
        let time_ok = vu.check("CPU: response time OK", res.duration_ms() < 10_000.0);

        vu.trend_ms("cpu_latency", res.duration_ms());
        vu.rate("errors", !(status_ok && time_ok));
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DbHeavy;

#[async_trait]
impl Workload for DbHeavy {
    fn name(&self) -> &'static str {
        "db_heavy"
    }

    fn think_time(&self) -> ThinkTime {
        ThinkTime::between(Duration::from_millis(500), Duration::from_millis(1500))
    }

    fn metrics(&self) -> &'static [(&'static str, MetricKind)] {
        &[
            ("db_latency", MetricKind::Trend),
            ("errors", MetricKind::Rate),
            ("db_errors", MetricKind::Counter),
        ]
    }

    async fn iterate(&self, vu: &mut VuContext) {
        let res = get(vu, "db", db_path()).await;

        let status_ok = vu.check("DB: status is 200", res.status == 200);
        let time_ok = vu.check("DB: response time OK", res.duration_ms() < 30_000.0);
        let body_ok = vu.check("DB: has results", has_result_count(&res));
        let success = status_ok && time_ok && body_ok;

        vu.trend_ms("db_latency", res.duration_ms());
        vu.rate("errors", !success);
        if !success {
            vu.add("db_errors", 1);
        }
    }
}

/// 40% CPU, 30% external dependency, 30% database.
#[derive(Debug, Clone, Copy)]
pub struct MixedLoad;

#[async_trait]
impl Workload for MixedLoad {
    fn name(&self) -> &'static str {
        "mixed_load"
    }

    fn think_time(&self) -> ThinkTime {
        ThinkTime::between(Duration::ZERO, Duration::from_millis(500))
    }

    fn metrics(&self) -> &'static [(&'static str, MetricKind)] {
        &[
            ("cpu_latency", MetricKind::Trend),
            ("db_latency", MetricKind::Trend),
            ("external_latency", MetricKind::Trend),
            ("errors", MetricKind::Rate),
            ("db_errors", MetricKind::Counter),
            ("external_errors", MetricKind::Counter),
        ]
    }

    async fn iterate(&self, vu: &mut VuContext) {
        let roll: f64 = vu.rng().r#gen();

        if roll < 0.4 {
            let ms = vu.rng().gen_range(50..250);
            let res = get(vu, "cpu", &cpu_path(ms)).await;
            vu.check("Mixed/CPU: status OK", res.status == 200);
            vu.trend_ms("cpu_latency", res.duration_ms());
            vu.rate("errors", res.status != 200);
        } else if roll < 0.7 {
            let res = get(vu, "external", external_path()).await;
            // 503 is the documented degraded answer.
            let success = vu.check(
                "Mixed/External: status OK",
                res.status == 200 || res.status == 503,
            );
            vu.trend_ms("external_latency", res.duration_ms());
            vu.rate("errors", !success);
            if res.status == 503 {
                vu.add("external_errors", 1);
            }
        } else {
            let res = get(vu, "db", db_path()).await;
            let success = vu.check("Mixed/DB: status OK", res.status == 200);
            vu.trend_ms("db_latency", res.duration_ms());
            vu.rate("errors", !success);
            if !success {
                vu.add("db_errors", 1);
            }
        }
    }
}

/// Fallback-sensitive probe used while faults are injected.
#[derive(Debug, Clone, Copy)]
pub struct ExternalProbe;

#[async_trait]
impl Workload for ExternalProbe {
    fn name(&self) -> &'static str {
        "external_probe"
    }

    fn think_time(&self) -> ThinkTime {
        ThinkTime::fixed(Duration::from_secs(1))
    }

    fn metrics(&self) -> &'static [(&'static str, MetricKind)] {
        &[
            ("external_latency", MetricKind::Trend),
            ("fallback_responses", MetricKind::Rate),
        ]
    }

    async fn iterate(&self, vu: &mut VuContext) {
        let res = get(vu, "external", external_path()).await;

        let fallback = res.body_contains(FALLBACK_MARKER);
        vu.check(
            "External: normal, fallback or 503",
            res.status == 200 || res.status == 503,
        );
        vu.trend_ms("external_latency", res.duration_ms());
        vu.rate("fallback_responses", fallback || res.status == 503);
    }
}
