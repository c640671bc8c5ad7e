use futures::FutureExt as _;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use strain_metrics::{MetricKind, Registry};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{Executor, ScenarioConfig};
use crate::metrics::{
    DROPPED_ITERATIONS, ITERATION_DURATION, ITERATIONS, SCENARIO_ERRORS, TAG_KIND, TAG_SCENARIO,
};
use crate::pacer::ArrivalPacer;
use crate::progress::{ScenarioPhase, ScenarioState};
use crate::run::RunContext;
use crate::schedule::RampingSchedule;
use crate::vu::{ActiveGuard, StartSignal, VuContext};
use crate::workload::{ThinkTime, Workload};

const PACER_TICK: Duration = Duration::from_millis(10);
const RAMP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioStatus {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioOutcome {
    pub name: String,
    pub exec: String,
    pub status: ScenarioStatus,
    pub iterations: u64,
    pub dropped: u64,
}

/// Runtime state of one scenario. Only its executor and the executor's workers write to it.
#[derive(Debug)]
pub struct ScenarioRun {
    name: Arc<str>,
    exec: Arc<str>,
    tags: Arc<[(String, String)]>,
    schedule: Arc<RampingSchedule>,
    open_loop: bool,
    max_workers: u64,

    stop: CancellationToken,
    begin: StartSignal,
    started_at: OnceLock<Instant>,
    finished: AtomicBool,

    active: AtomicU64,
    iterations: AtomicU64,
    dropped: AtomicU64,
}

impl ScenarioRun {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exec(&self) -> &str {
        &self.exec
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> ScenarioState {
        let phase = if self.finished.load(Ordering::Acquire) {
            ScenarioPhase::Finished
        } else if self.started_at.get().is_none() {
            ScenarioPhase::Waiting
        } else if self.stop.is_cancelled() {
            ScenarioPhase::Stopping
        } else {
            ScenarioPhase::Running
        };
        let elapsed = self
            .started_at
            .get()
            .map(Instant::elapsed)
            .unwrap_or(Duration::ZERO);
        let stage = self.schedule.stage_snapshot_at(elapsed);

        ScenarioState {
            phase,
            open_loop: self.open_loop,
            elapsed,
            timeline: self.schedule.total_duration(),
            stage,
            level: stage.map(|s| s.current).unwrap_or(0.0),
            max_workers: self.max_workers,
            active: self.active(),
            iterations: self.iterations(),
            dropped: self.dropped(),
        }
    }

    fn record(&self, metrics: &Registry, name: &str, kind: MetricKind, value: f64, extra: &[(&str, &str)]) {
        let mut tags: Vec<(&str, &str)> = Vec::with_capacity(1 + self.tags.len() + extra.len());
        tags.push((TAG_SCENARIO, &self.name));
        tags.extend(self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        tags.extend_from_slice(extra);
        if let Err(err) = metrics.record(name, kind, value, &tags) {
            tracing::warn!(metric = name, error = %err, "dropping metric sample");
        }
    }

    fn record_error(&self, metrics: &Registry, kind: &str) {
        self.record(metrics, SCENARIO_ERRORS, MetricKind::Counter, 1.0, &[(TAG_KIND, kind)]);
    }
}

struct Shared {
    run: Arc<ScenarioRun>,
    workload: Arc<dyn Workload>,
    think: ThinkTime,
}

enum Mode {
    ClosedLoop,
    OpenLoop {
        pacer: Arc<ArrivalPacer>,
        time_unit: Duration,
    },
}

/// Drives one scenario: its workers are spawned up front and released after the start offset.
pub struct ScenarioExecutor {
    run: Arc<ScenarioRun>,
    ctx: RunContext,
    mode: Mode,
    start_offset: Duration,
    graceful_stop: Duration,
    workers: JoinSet<()>,
}

impl ScenarioExecutor {
    /// Spawns every worker of `cfg`; they idle until [`ScenarioExecutor::run`] releases them.
    pub fn spawn(
        cfg: &ScenarioConfig,
        workload: Arc<dyn Workload>,
        ctx: &RunContext,
        cancel: &CancellationToken,
        next_vu_id: &mut u64,
    ) -> Self {
        let (schedule, mode, ramp_down) = match &cfg.executor {
            Executor::ClosedLoop {
                start_vus,
                stages,
                graceful_ramp_down,
            } => (
                RampingSchedule::new(*start_vus, stages),
                Mode::ClosedLoop,
                *graceful_ramp_down,
            ),
            Executor::OpenLoop {
                start_rate,
                time_unit,
                pre_allocated_vus,
                max_vus,
                stages,
            } => (
                RampingSchedule::new(*start_rate, stages),
                Mode::OpenLoop {
                    pacer: Arc::new(ArrivalPacer::new(*pre_allocated_vus, *max_vus)),
                    time_unit: *time_unit,
                },
                Duration::ZERO,
            ),
        };
        let schedule = Arc::new(schedule);
        let max_workers = cfg.max_workers();
        let tags: Arc<[(String, String)]> = Arc::from(cfg.tags.clone());

        let run = Arc::new(ScenarioRun {
            name: Arc::from(cfg.name.as_str()),
            exec: Arc::from(cfg.exec.as_str()),
            tags: tags.clone(),
            schedule: schedule.clone(),
            open_loop: matches!(mode, Mode::OpenLoop { .. }),
            max_workers,
            stop: cancel.child_token(),
            begin: StartSignal::new(),
            started_at: OnceLock::new(),
            finished: AtomicBool::new(false),
            active: AtomicU64::new(0),
            iterations: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let shared = Arc::new(Shared {
            run: run.clone(),
            think: cfg.think_time.unwrap_or_else(|| workload.think_time()),
            workload,
        });

        let mut workers = JoinSet::new();
        for scenario_vu in 1..=max_workers {
            let vu = VuContext::new(
                *next_vu_id,
                scenario_vu,
                run.name.clone(),
                tags.clone(),
                ctx.base_url.clone(),
                ctx.client.clone(),
                ctx.metrics.clone(),
                ctx.seed,
            );
            *next_vu_id = next_vu_id.saturating_add(1);

            let shared = shared.clone();
            match &mode {
                Mode::ClosedLoop => {
                    workers.spawn(closed_loop_worker(shared, schedule.clone(), ramp_down, vu));
                }
                Mode::OpenLoop { pacer, .. } => {
                    workers.spawn(open_loop_worker(shared, pacer.clone(), vu));
                }
            }
        }

        Self {
            run,
            ctx: ctx.clone(),
            mode,
            start_offset: cfg.start_offset,
            graceful_stop: cfg.graceful_stop,
            workers,
        }
    }

    pub fn scenario_run(&self) -> Arc<ScenarioRun> {
        self.run.clone()
    }

    pub async fn run(mut self, global_start: Arc<StartSignal>) -> ScenarioOutcome {
        let run = self.run.clone();
        global_start.wait().await;

        let mut cancelled = false;
        if !self.start_offset.is_zero() {
            tokio::select! {
                _ = run.stop.cancelled() => cancelled = true,
                _ = tokio::time::sleep(self.start_offset) => {}
            }
        }

        if cancelled {
            tracing::debug!(scenario = %run.name, "cancelled before start");
        } else {
            let started = Instant::now();
            let _ = run.started_at.set(started);
            tracing::info!(
                scenario = %run.name,
                exec = %run.exec,
                workers = run.max_workers,
                timeline = ?run.schedule.total_duration(),
                "scenario started"
            );
            run.begin.start();

            cancelled = match &self.mode {
                Mode::ClosedLoop => {
                    let end = tokio::time::Instant::from_std(started + run.schedule.total_duration());
                    tokio::select! {
                        _ = run.stop.cancelled() => true,
                        _ = tokio::time::sleep_until(end) => false,
                    }
                }
                Mode::OpenLoop { pacer, time_unit } => {
                    drive_arrivals(&run, &self.ctx.metrics, pacer, *time_unit, started).await
                }
            };
        }

        // No new iterations from here on; in-flight ones get `graceful_stop` to finish.
        run.stop.cancel();
        if let Mode::OpenLoop { pacer, .. } = &self.mode {
            pacer.mark_done();
        }
        run.begin.start();

        let drained = tokio::time::timeout(
            self.graceful_stop,
            drain(&mut self.workers, &run, &self.ctx.metrics),
        )
        .await
        .is_ok();
        if !drained {
            tracing::warn!(
                scenario = %run.name,
                in_flight = run.active(),
                graceful_stop = ?self.graceful_stop,
                "graceful stop elapsed; aborting in-flight iterations"
            );
            self.workers.abort_all();
            drain(&mut self.workers, &run, &self.ctx.metrics).await;
        }

        run.finished.store(true, Ordering::Release);
        let status = if cancelled {
            ScenarioStatus::Cancelled
        } else {
            ScenarioStatus::Completed
        };
        tracing::info!(
            scenario = %run.name,
            status = ?status,
            iterations = run.iterations(),
            dropped = run.dropped(),
            "scenario finished"
        );

        ScenarioOutcome {
            name: run.name.to_string(),
            exec: run.exec.to_string(),
            status,
            iterations: run.iterations(),
            dropped: run.dropped(),
        }
    }
}

async fn drain(workers: &mut JoinSet<()>, run: &ScenarioRun, metrics: &Registry) {
    while let Some(res) = workers.join_next().await {
        if let Err(err) = res
            && err.is_panic()
        {
            tracing::warn!(scenario = %run.name, "worker panicked outside an iteration");
            run.record_error(metrics, "panic");
        }
    }
}

/// Paces arrivals until the timeline ends. Returns `true` when cancelled first.
async fn drive_arrivals(
    run: &ScenarioRun,
    metrics: &Registry,
    pacer: &ArrivalPacer,
    time_unit: Duration,
    started: Instant,
) -> bool {
    let mut interval = tokio::time::interval(PACER_TICK);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let unit_s = time_unit.as_secs_f64().max(1e-9);
    let total = run.schedule.total_duration();
    let mut carry = 0.0f64;
    let mut last = Duration::ZERO;

    loop {
        tokio::select! {
            _ = run.stop.cancelled() => return true,
            _ = interval.tick() => {}
        }

        let elapsed = started.elapsed().min(total);
        let dt = elapsed.saturating_sub(last).as_secs_f64();
        // Midpoint of the interval keeps ramps unbiased.
        let rate = run.schedule.value_at(last + (elapsed.saturating_sub(last)) / 2);
        last = elapsed;

        carry += rate * dt / unit_s;
        let due = carry.floor().max(0.0) as u64;
        carry -= due as f64;

        let dropped = pacer.update_due(due);
        if dropped != 0 {
            run.dropped.fetch_add(dropped, Ordering::Relaxed);
            run.record(metrics, DROPPED_ITERATIONS, MetricKind::Counter, dropped as f64, &[]);
            tracing::debug!(
                scenario = %run.name,
                dropped,
                allocated = pacer.allocated(),
                "worker pool exhausted"
            );
        }

        if elapsed >= total {
            return false;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs one workload iteration; a panic is recorded and swallowed.
async fn iteration(shared: &Shared, vu: &mut VuContext) {
    let started = Instant::now();
    let res = AssertUnwindSafe(shared.workload.iterate(vu))
        .catch_unwind()
        .await;

    match res {
        Ok(()) => {
            shared.run.iterations.fetch_add(1, Ordering::Relaxed);
            vu.record(ITERATIONS, MetricKind::Counter, 1.0, &[]);
            vu.record(
                ITERATION_DURATION,
                MetricKind::Trend,
                started.elapsed().as_secs_f64() * 1000.0,
                &[],
            );
        }
        Err(payload) => {
            tracing::warn!(
                scenario = %shared.run.name,
                vu = vu.vu_id,
                panic = %panic_message(payload.as_ref()),
                "workload iteration panicked"
            );
            vu.record(SCENARIO_ERRORS, MetricKind::Counter, 1.0, &[(TAG_KIND, "panic")]);
        }
    }
}

/// Resolves once `vu` falls outside the ramp. Never resolves after the timeline ends; the
/// executor's stop signal covers that.
async fn deactivated(schedule: &RampingSchedule, started: Instant, vu: u64) {
    loop {
        let elapsed = started.elapsed();
        if schedule.is_done(elapsed) {
            std::future::pending::<()>().await;
        }
        if vu > schedule.target_at(elapsed) {
            return;
        }
        tokio::time::sleep(RAMP_POLL).await;
    }
}

async fn closed_loop_worker(
    shared: Arc<Shared>,
    schedule: Arc<RampingSchedule>,
    graceful_ramp_down: Duration,
    mut vu: VuContext,
) {
    let run = shared.run.clone();
    run.begin.wait().await;
    let Some(&started) = run.started_at.get() else {
        return;
    };
    let me = vu.scenario_vu;

    loop {
        if run.stop.is_cancelled() {
            break;
        }
        let elapsed = started.elapsed();
        if schedule.is_done(elapsed) {
            break;
        }

        if me > schedule.target_at(elapsed) {
            let wait = schedule
                .next_recheck_in(elapsed, me)
                .max(Duration::from_millis(1));
            tokio::select! {
                _ = run.stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => continue,
            }
        }

        let _active = ActiveGuard::new(&run.active);

        {
            let it = iteration(&shared, &mut vu);
            tokio::pin!(it);
            let ramp_down_deadline = async {
                deactivated(&schedule, started, me).await;
                tokio::time::sleep(graceful_ramp_down).await;
            };
            tokio::select! {
                biased;
                () = &mut it => {}
                () = ramp_down_deadline => {
                    tracing::debug!(scenario = %run.name, vu = me, "iteration interrupted by ramp-down");
                }
            }
        }

        let think = shared.think.sample(vu.rng());
        if !think.is_zero() {
            tokio::select! {
                _ = run.stop.cancelled() => break,
                () = deactivated(&schedule, started, me) => {}
                _ = tokio::time::sleep(think) => {}
            }
        }
    }
}

async fn open_loop_worker(shared: Arc<Shared>, pacer: Arc<ArrivalPacer>, mut vu: VuContext) {
    let run = shared.run.clone();
    run.begin.wait().await;

    while pacer.claim_next().await {
        {
            let _active = ActiveGuard::new(&run.active);
            iteration(&shared, &mut vu).await;

            let think = shared.think.sample(vu.rng());
            if !think.is_zero() {
                tokio::select! {
                    _ = run.stop.cancelled() => {}
                    _ = tokio::time::sleep(think) => {}
                }
            }
        }
        pacer.release();
    }
}
