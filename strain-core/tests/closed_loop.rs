use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use strain_core::config::{Executor, ScenarioConfig, Stage};
use strain_core::workload::{ThinkTime, Workload, WorkloadSet};
use strain_core::{RunContext, ScenarioStatus, VuContext, run_scenarios};
use tokio_util::sync::CancellationToken;

// Nothing listens here; the hold workload never sends traffic.
const BASE_URL: &str = "http://127.0.0.1:9";

/// Holds a worker busy for a fixed time and tracks how many iterations overlap.
#[derive(Debug, Default)]
struct Hold {
    in_flight: AtomicU64,
    peak_vu: AtomicU64,
    first_start: Mutex<Option<Instant>>,
}

#[derive(Debug, Clone)]
struct HoldWorkload(Arc<Hold>);

#[async_trait]
impl Workload for HoldWorkload {
    fn name(&self) -> &'static str {
        "hold"
    }

    async fn iterate(&self, vu: &mut VuContext) {
        self.0.first_start.lock().get_or_insert_with(Instant::now);
        self.0.peak_vu.fetch_max(vu.scenario_vu, Ordering::Relaxed);
        self.0.in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn ramp(stages: Vec<Stage>, start_offset: Duration) -> ScenarioConfig {
    ScenarioConfig {
        name: "ramp".to_string(),
        exec: "hold".to_string(),
        executor: Executor::ClosedLoop {
            start_vus: 0,
            stages,
            graceful_ramp_down: Duration::from_millis(100),
        },
        start_offset,
        graceful_stop: Duration::from_secs(1),
        tags: vec![("scenario_kind".to_string(), "ramp".to_string())],
        think_time: Some(ThinkTime::NONE),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn worker_count_follows_the_ramp() -> anyhow::Result<()> {
    let hold = Arc::new(Hold::default());
    let workloads = WorkloadSet::new().with(HoldWorkload(hold.clone()));
    let ctx = RunContext::new(BASE_URL);

    let ms = Duration::from_millis;
    let scenario = ramp(
        vec![Stage::new(ms(300), 10), Stage::new(ms(600), 10), Stage::new(ms(300), 0)],
        Duration::ZERO,
    );

    let sampler = {
        let hold = hold.clone();
        tokio::spawn(async move {
            let mut plateau = Vec::new();
            tokio::time::sleep(ms(450)).await;
            for _ in 0..10 {
                plateau.push(hold.in_flight.load(Ordering::Relaxed));
                tokio::time::sleep(ms(20)).await;
            }
            plateau
        })
    };

    let outcome = run_scenarios(
        vec![scenario],
        ctx.clone(),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await?;
    let plateau = sampler.await?;

    anyhow::ensure!(
        outcome.scenarios[0].status == ScenarioStatus::Completed,
        "unexpected status: {:?}",
        outcome.scenarios[0].status
    );
    anyhow::ensure!(
        plateau.iter().all(|n| *n <= 10),
        "more workers than the target: {plateau:?}"
    );
    anyhow::ensure!(
        plateau.iter().any(|n| *n >= 9),
        "plateau never reached the target: {plateau:?}"
    );
    anyhow::ensure!(
        hold.in_flight.load(Ordering::Relaxed) == 0,
        "iterations still in flight after the run"
    );
    anyhow::ensure!(hold.peak_vu.load(Ordering::Relaxed) == 10);

    let snapshot = ctx.metrics.snapshot();
    let iterations = snapshot
        .aggregate("iterations", &[("scenario".to_string(), "ramp".to_string())])
        .map(|a| a.count())
        .unwrap_or(0);
    anyhow::ensure!(
        iterations == outcome.scenarios[0].iterations,
        "iterations metric {iterations} != outcome {}",
        outcome.scenarios[0].iterations
    );
    anyhow::ensure!(iterations > 0);

    // Scenario tags travel with every sample.
    let tagged = snapshot
        .aggregate(
            "iteration_duration",
            &[("scenario_kind".to_string(), "ramp".to_string())],
        )
        .map(|a| a.count())
        .unwrap_or(0);
    anyhow::ensure!(tagged == iterations);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_offset_delays_the_first_iteration() -> anyhow::Result<()> {
    let hold = Arc::new(Hold::default());
    let workloads = WorkloadSet::new().with(HoldWorkload(hold.clone()));

    let begin = Instant::now();
    let scenario = ramp(
        vec![Stage::new(Duration::from_millis(200), 2)],
        Duration::from_millis(250),
    );
    let outcome = run_scenarios(
        vec![scenario],
        RunContext::new(BASE_URL),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await?;

    let first = (*hold.first_start.lock()).ok_or_else(|| anyhow::anyhow!("no iteration ran"))?;
    anyhow::ensure!(
        first.duration_since(begin) >= Duration::from_millis(250),
        "first iteration after {:?}",
        first.duration_since(begin)
    );
    anyhow::ensure!(outcome.elapsed >= Duration::from_millis(450));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_every_scenario() -> anyhow::Result<()> {
    let hold = Arc::new(Hold::default());
    let workloads = WorkloadSet::new().with(HoldWorkload(hold.clone()));
    let cancel = CancellationToken::new();

    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let long = ramp(vec![Stage::new(Duration::from_secs(30), 3)], Duration::ZERO);
    let mut delayed = ramp(vec![Stage::new(Duration::from_secs(30), 3)], Duration::from_secs(20));
    delayed.name = "delayed".to_string();

    let outcome = run_scenarios(
        vec![long, delayed],
        RunContext::new(BASE_URL),
        &workloads,
        cancel,
        None,
    )
    .await?;
    canceller.await?;

    anyhow::ensure!(outcome.was_cancelled());
    anyhow::ensure!(
        outcome
            .scenarios
            .iter()
            .all(|s| s.status == ScenarioStatus::Cancelled),
        "statuses: {:?}",
        outcome.scenarios
    );
    anyhow::ensure!(outcome.elapsed < Duration::from_secs(5));
    anyhow::ensure!(outcome.scenarios[1].iterations == 0);
    Ok(())
}

#[tokio::test]
async fn empty_plan_and_unresolvable_host_are_rejected() -> anyhow::Result<()> {
    let hold = Arc::new(Hold::default());
    let workloads = WorkloadSet::new().with(HoldWorkload(hold));

    let err = run_scenarios(
        Vec::new(),
        RunContext::new(BASE_URL),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await;
    anyhow::ensure!(matches!(err, Err(strain_core::Error::NoScenarios)));

    let scenario = ramp(vec![Stage::new(Duration::from_millis(100), 1)], Duration::ZERO);
    let err = run_scenarios(
        vec![scenario],
        RunContext::new("http://host.invalid:8080"),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await;
    anyhow::ensure!(
        matches!(err, Err(strain_core::Error::Unresolvable { .. })),
        "got {err:?}"
    );
    Ok(())
}
