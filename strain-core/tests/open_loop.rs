use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use strain_core::config::{Executor, ScenarioConfig, Stage};
use strain_core::workload::{ThinkTime, Workload, WorkloadSet};
use strain_core::{RunContext, ScenarioStatus, VuContext, run_scenarios};
use tokio_util::sync::CancellationToken;

const BASE_URL: &str = "http://127.0.0.1:9";

/// Records when each iteration starts, then sleeps for a fixed service time.
#[derive(Debug, Clone)]
struct Stamp {
    origin: Instant,
    service: Duration,
    starts: Arc<Mutex<Vec<Duration>>>,
}

impl Stamp {
    fn new(service: Duration) -> Self {
        Self {
            origin: Instant::now(),
            service,
            starts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn started_between(&self, from: Duration, to: Duration) -> usize {
        self.starts
            .lock()
            .iter()
            .filter(|t| **t >= from && **t < to)
            .count()
    }
}

#[async_trait]
impl Workload for Stamp {
    fn name(&self) -> &'static str {
        "stamp"
    }

    async fn iterate(&self, _vu: &mut VuContext) {
        self.starts.lock().push(self.origin.elapsed());
        tokio::time::sleep(self.service).await;
    }
}

fn arrival(start_rate: u64, pre: u64, max: u64, stages: Vec<Stage>) -> ScenarioConfig {
    ScenarioConfig {
        name: "arrivals".to_string(),
        exec: "stamp".to_string(),
        executor: Executor::OpenLoop {
            start_rate,
            time_unit: Duration::from_secs(1),
            pre_allocated_vus: pre,
            max_vus: max,
            stages,
        },
        start_offset: Duration::ZERO,
        graceful_stop: Duration::from_secs(2),
        tags: Vec::new(),
        think_time: Some(ThinkTime::NONE),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn arrival_rate_follows_a_linear_ramp() -> anyhow::Result<()> {
    let stamp = Stamp::new(Duration::from_millis(50));
    let workloads = WorkloadSet::new().with(stamp.clone());

    // 10/s rising to 50/s over 4s: 30 arrivals expected in [1.5s, 2.5s), 120 overall.
    let outcome = run_scenarios(
        vec![arrival(10, 5, 50, vec![Stage::new(Duration::from_secs(4), 50)])],
        RunContext::new(BASE_URL),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await?;

    let scenario = &outcome.scenarios[0];
    anyhow::ensure!(scenario.status == ScenarioStatus::Completed);
    anyhow::ensure!(scenario.dropped == 0, "dropped {}", scenario.dropped);

    let window = stamp.started_between(Duration::from_millis(1500), Duration::from_millis(2500));
    anyhow::ensure!(
        (24..=36).contains(&window),
        "expected ~30 arrivals in the window, got {window}"
    );
    anyhow::ensure!(
        (110..=130).contains(&scenario.iterations),
        "expected ~120 iterations, got {}",
        scenario.iterations
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_pool_drops_iterations() -> anyhow::Result<()> {
    // Two workers at 200ms each sustain 10/s; 100/s is offered.
    let stamp = Stamp::new(Duration::from_millis(200));
    let workloads = WorkloadSet::new().with(stamp.clone());
    let ctx = RunContext::new(BASE_URL);

    let outcome = run_scenarios(
        vec![arrival(100, 1, 2, vec![Stage::new(Duration::from_secs(1), 100)])],
        ctx.clone(),
        &workloads,
        CancellationToken::new(),
        None,
    )
    .await?;

    let scenario = &outcome.scenarios[0];
    anyhow::ensure!(scenario.status == ScenarioStatus::Completed);
    anyhow::ensure!(
        scenario.iterations <= 14,
        "two workers cannot run {} iterations in a second",
        scenario.iterations
    );
    anyhow::ensure!(
        scenario.dropped >= 80,
        "expected most arrivals to be dropped, got {}",
        scenario.dropped
    );

    let recorded = ctx
        .metrics
        .snapshot()
        .aggregate("dropped_iterations", &[])
        .map(|a| a.count())
        .unwrap_or(0);
    anyhow::ensure!(
        recorded == scenario.dropped,
        "dropped_iterations {recorded} != outcome {}",
        scenario.dropped
    );
    Ok(())
}
