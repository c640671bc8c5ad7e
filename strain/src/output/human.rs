use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod duration;
mod format;
mod progress;
mod summary;

use duration::format_duration_single;
use format::format_rate;
use progress::HumanProgress;
use strain_core::chaos::ExperimentReport;
use strain_core::config::{Executor, ScenarioConfig};
use strain_core::progress::{ProgressFn, ProgressUpdate, ScenarioPhase};
use strain_core::RunSummary;
use summary::render;

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
        }
    }
}

/// Last observed (elapsed, iterations, requests) per scenario.
type Previous = HashMap<String, (Duration, u64, u64)>;

impl OutputFormatter for HumanReadableOutput {
    fn print_header(&self, plan: &str, base_url: &str, scenarios: &[ScenarioConfig]) {
        println!("plan: {plan}");
        println!("target: {base_url}");
        for s in scenarios {
            let shape = match &s.executor {
                Executor::ClosedLoop { .. } => {
                    format!("executor=ramping-vus max_vus={}", s.max_workers())
                }
                Executor::OpenLoop {
                    time_unit,
                    pre_allocated_vus,
                    max_vus,
                    ..
                } => format!(
                    "executor=ramping-arrival-rate time_unit={} vus={pre_allocated_vus}..{max_vus}",
                    format_duration_single(*time_unit)
                ),
            };
            println!(
                "scenario: {} exec={} {shape} start={} duration={}",
                s.name,
                s.exec,
                format_duration_single(s.start_offset),
                format_duration_single(s.timeline())
            );
        }
        if !scenarios.is_empty() {
            println!();
        }
    }

    fn progress(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let previous: Arc<Mutex<Previous>> = Arc::new(Mutex::new(HashMap::new()));

        Some(Arc::new(move |u: ProgressUpdate| {
            let s = &u.state;
            let prev = {
                let mut inner = previous
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                inner.insert(u.scenario.clone(), (s.elapsed, s.iterations, u.requests_total))
            };
            let (prev_elapsed, prev_iters, prev_reqs) = prev.unwrap_or_default();
            let dt = s.elapsed.saturating_sub(prev_elapsed).as_secs_f64().max(1e-9);
            let iters_per_sec = s.iterations.saturating_sub(prev_iters) as f64 / dt;
            let rps = u.requests_total.saturating_sub(prev_reqs) as f64 / dt;

            let message = progress_message(&u, iters_per_sec, rps);
            progress.update(&u.scenario, s.timeline, s.elapsed, message);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(summary));

        let failed: Vec<_> = summary.failed_thresholds().collect();
        if !failed.is_empty() {
            eprintln!("thresholds failed:");
            for v in failed {
                match v.observed {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", v.key(), v.expression),
                    None => eprintln!("  {}: {} (no data)", v.key(), v.expression),
                }
            }
        }

        Ok(())
    }

    fn print_experiment(&self, report: &ExperimentReport) -> anyhow::Result<()> {
        self.progress.finish();

        let path = report
            .transitions
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" -> ");

        println!("experiment");
        println!("  states: {path}");
        println!("  outcome: {}", report.outcome);
        if let Some(err) = &report.configure_error {
            println!("  configure: not acknowledged ({err})");
        }
        match &report.restore {
            Some(res) if res.acknowledged() => println!("  restore: acknowledged ({})", res.describe()),
            Some(res) => println!("  restore: FAILED ({})", res.describe()),
            None => println!("  restore: not attempted"),
        }
        Ok(())
    }

    fn print_artifact(&self, path: &Path) {
        println!("summary written to {}", path.display());
    }
}

fn progress_message(u: &ProgressUpdate, iters_per_sec: f64, rps: f64) -> String {
    let s = &u.state;
    if s.phase == ScenarioPhase::Waiting {
        return "waiting for start".to_string();
    }

    let mut msg = if s.open_loop {
        format!(
            "rate={:.1} vus={}/{} dropped={}",
            s.level, s.active, s.max_workers, s.dropped
        )
    } else {
        format!("vus={}/{}", s.active, s.max_workers)
    };
    if let Some(stage) = &s.stage {
        msg.push_str(&format!(
            " stage={}/{} target={}",
            stage.index + 1,
            stage.count,
            stage.end_target
        ));
    }
    msg.push_str(&format!(
        " elapsed={} iters/s={} rps={}",
        format_duration_single(s.elapsed),
        format_rate(iters_per_sec),
        format_rate(rps)
    ));
    match s.phase {
        ScenarioPhase::Stopping => msg.push_str(" (stopping)"),
        ScenarioPhase::Finished => msg.push_str(" (done)"),
        _ => {}
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use strain_core::StageSnapshot;
    use strain_core::progress::ScenarioState;

    fn update(open_loop: bool, phase: ScenarioPhase) -> ProgressUpdate {
        ProgressUpdate {
            tick: 3,
            elapsed: Duration::from_secs(3),
            scenario: "mixed_load".to_string(),
            exec: "mixed_load".to_string(),
            state: ScenarioState {
                phase,
                open_loop,
                elapsed: Duration::from_secs(3),
                timeline: Duration::from_secs(60),
                stage: Some(StageSnapshot {
                    index: 0,
                    count: 4,
                    stage_elapsed: Duration::from_secs(3),
                    stage_remaining: Duration::from_secs(57),
                    start_target: 10,
                    end_target: 50,
                    current: 12.0,
                }),
                level: 12.0,
                max_workers: 100,
                active: 4,
                iterations: 30,
                dropped: 2,
            },
            requests_total: 45,
        }
    }

    #[test]
    fn open_loop_message_shows_rate_and_drops() {
        let msg = progress_message(&update(true, ScenarioPhase::Running), 10.0, 15.0);
        assert_eq!(
            msg,
            "rate=12.0 vus=4/100 dropped=2 stage=1/4 target=50 elapsed=3s iters/s=10 rps=15"
        );
    }

    #[test]
    fn closed_loop_message_marks_phase() {
        let msg = progress_message(&update(false, ScenarioPhase::Stopping), 1.0, 2.0);
        assert!(msg.starts_with("vus=4/100 stage=1/4"));
        assert!(msg.ends_with("(stopping)"));

        let waiting = progress_message(&update(false, ScenarioPhase::Waiting), 0.0, 0.0);
        assert_eq!(waiting, "waiting for start");
    }
}
