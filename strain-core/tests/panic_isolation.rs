use std::time::Duration;

use async_trait::async_trait;
use strain_core::config::{Executor, ScenarioConfig, Stage};
use strain_core::workload::{ThinkTime, Workload, WorkloadSet};
use strain_core::{RunContext, ScenarioStatus, VuContext, run_scenarios};
use tokio_util::sync::CancellationToken;

const BASE_URL: &str = "http://127.0.0.1:9";

#[derive(Debug)]
struct Explodes;

#[async_trait]
impl Workload for Explodes {
    fn name(&self) -> &'static str {
        "explodes"
    }

    async fn iterate(&self, vu: &mut VuContext) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        panic!("worker {} blew up", vu.scenario_vu);
    }
}

#[derive(Debug)]
struct Steady;

#[async_trait]
impl Workload for Steady {
    fn name(&self) -> &'static str {
        "steady"
    }

    async fn iterate(&self, vu: &mut VuContext) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        vu.check("steady: ok", true);
    }
}

fn constant(name: &str, exec: &str) -> ScenarioConfig {
    ScenarioConfig {
        name: name.to_string(),
        exec: exec.to_string(),
        executor: Executor::ClosedLoop {
            start_vus: 2,
            stages: vec![Stage::new(Duration::from_millis(500), 2)],
            graceful_ramp_down: Duration::from_millis(100),
        },
        start_offset: Duration::ZERO,
        graceful_stop: Duration::from_secs(1),
        tags: Vec::new(),
        think_time: Some(ThinkTime::NONE),
    }
}

fn sel(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn panicking_iterations_do_not_stop_siblings() -> anyhow::Result<()> {
    let workloads = WorkloadSet::new().with(Explodes).with(Steady);
    let ctx = RunContext::new(BASE_URL);

    let outcome = run_scenarios(
        vec![constant("broken", "explodes"), constant("healthy", "steady")],
        ctx.clone(),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await?;

    anyhow::ensure!(outcome.scenarios.len() == 2);
    for s in &outcome.scenarios {
        anyhow::ensure!(
            s.status == ScenarioStatus::Completed,
            "{} ended as {:?}",
            s.name,
            s.status
        );
    }

    let broken = &outcome.scenarios[0];
    let healthy = &outcome.scenarios[1];
    anyhow::ensure!(broken.iterations == 0, "panicked iterations are not completions");
    anyhow::ensure!(healthy.iterations > 10, "healthy ran {} iterations", healthy.iterations);

    let snapshot = ctx.metrics.snapshot();
    let panics = snapshot
        .aggregate(
            "scenario_errors",
            &sel(&[("scenario", "broken"), ("kind", "panic")]),
        )
        .map(|a| a.count())
        .unwrap_or(0);
    // Every worker keeps looping after a panic, so there are many more than two.
    anyhow::ensure!(panics > 2, "recorded {panics} panics");

    let healthy_errors = snapshot
        .aggregate("scenario_errors", &sel(&[("scenario", "healthy")]))
        .map(|a| a.count())
        .unwrap_or(0);
    anyhow::ensure!(healthy_errors == 0);

    let checks = snapshot
        .aggregate("checks", &sel(&[("scenario", "healthy")]))
        .and_then(|a| a.rate());
    anyhow::ensure!(checks == Some(1.0), "checks rate {checks:?}");
    Ok(())
}
