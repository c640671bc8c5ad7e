use std::sync::Arc;
use std::time::{Duration, Instant};
use strain_metrics::Registry;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ScenarioConfig;
use crate::error::{Error, Result};
use crate::executor::{ScenarioExecutor, ScenarioOutcome, ScenarioRun, ScenarioStatus};
use crate::metrics::{HTTP_REQS, SCENARIO_ERRORS, TAG_KIND, TAG_SCENARIO};
use crate::probe::{HttpClient, resolve_base_url};
use crate::progress::{ProgressFn, ProgressUpdate};
use crate::vu::StartSignal;
use crate::workload::WorkloadSet;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Everything workers share for one run. The registry is created by the caller and frozen by
/// the caller once the run returns.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub metrics: Arc<Registry>,
    pub client: Arc<HttpClient>,
    pub base_url: Arc<str>,
    pub seed: u64,
    pub progress_interval: Duration,
}

impl RunContext {
    pub fn new(base_url: &str) -> Self {
        Self {
            metrics: Arc::new(Registry::default()),
            client: Arc::new(HttpClient::default()),
            base_url: Arc::from(base_url),
            seed: 0,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = Arc::new(client);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Registry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub scenarios: Vec<ScenarioOutcome>,
}

impl RunOutcome {
    pub fn was_cancelled(&self) -> bool {
        self.scenarios
            .iter()
            .any(|s| s.status == ScenarioStatus::Cancelled)
    }
}

/// Runs every scenario concurrently from a common start instant and joins them all.
///
/// A failing scenario is reported in its outcome and never stops its siblings.
pub async fn run_scenarios(
    scenarios: Vec<ScenarioConfig>,
    ctx: RunContext,
    workloads: &WorkloadSet,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
) -> Result<RunOutcome> {
    if scenarios.is_empty() {
        return Err(Error::NoScenarios);
    }
    resolve_base_url(&ctx.base_url)
        .await
        .map_err(|source| Error::Unresolvable {
            url: ctx.base_url.to_string(),
            source,
        })?;

    let start_signal = Arc::new(StartSignal::new());
    let mut next_vu_id: u64 = 1;
    let mut executors = Vec::with_capacity(scenarios.len());
    for scenario in &scenarios {
        let workload = workloads
            .get(&scenario.exec)
            .ok_or_else(|| Error::UnknownWorkload {
                scenario: scenario.name.clone(),
                exec: scenario.exec.clone(),
            })?;
        executors.push(ScenarioExecutor::spawn(
            scenario,
            workload,
            &ctx,
            &cancel,
            &mut next_vu_id,
        ));
    }

    let runs: Vec<Arc<ScenarioRun>> = executors.iter().map(|e| e.scenario_run()).collect();
    let handles: Vec<_> = executors
        .into_iter()
        .map(|e| tokio::spawn(e.run(start_signal.clone())))
        .collect();

    tracing::info!(
        scenarios = runs.len(),
        workers = next_vu_id.saturating_sub(1),
        base_url = %ctx.base_url,
        "run starting"
    );
    let started = Instant::now();
    start_signal.start();

    let progress_handle = progress.map(|progress| {
        let runs = runs.clone();
        let metrics = ctx.metrics.clone();
        let every = ctx.progress_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut tick: u64 = 0;
            loop {
                interval.tick().await;
                tick = tick.saturating_add(1);
                emit_progress(&progress, &runs, &metrics, tick, started.elapsed());
            }
        })
    });

    let mut outcomes = Vec::with_capacity(handles.len());
    for (handle, run) in handles.into_iter().zip(&runs) {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                tracing::error!(scenario = run.name(), error = %err, "scenario executor failed");
                let kind = if err.is_panic() { "executor_panic" } else { "executor_aborted" };
                let _ = ctx.metrics.record(
                    SCENARIO_ERRORS,
                    strain_metrics::MetricKind::Counter,
                    1.0,
                    &[(TAG_SCENARIO, run.name()), (TAG_KIND, kind)],
                );
                outcomes.push(ScenarioOutcome {
                    name: run.name().to_string(),
                    exec: run.exec().to_string(),
                    status: ScenarioStatus::Failed(err.to_string()),
                    iterations: run.iterations(),
                    dropped: run.dropped(),
                });
            }
        }
    }

    let elapsed = started.elapsed();
    if let Some(h) = progress_handle {
        h.abort();
        let _ = h.await;
    }

    tracing::info!(elapsed = ?elapsed, "run finished");
    Ok(RunOutcome {
        elapsed,
        scenarios: outcomes,
    })
}

fn emit_progress(
    progress: &ProgressFn,
    runs: &[Arc<ScenarioRun>],
    metrics: &Registry,
    tick: u64,
    elapsed: Duration,
) {
    for run in runs {
        (progress)(ProgressUpdate {
            tick,
            elapsed,
            scenario: run.name().to_string(),
            exec: run.exec().to_string(),
            state: run.state(),
            requests_total: metrics.counter_total(HTTP_REQS, TAG_SCENARIO, run.name()),
        });
    }
}
