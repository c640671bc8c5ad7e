use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use strain_core::chaos::ExperimentReport;
use strain_core::config::ScenarioConfig;
use strain_core::progress::{ProgressFn, ProgressUpdate};
use strain_core::RunSummary;

use super::{Headline, OutputFormatter, status_label};

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan: &str, _base_url: &str, _scenarios: &[ScenarioConfig]) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = build_summary_line(summary);
        emit_json_line(&line);
        Ok(())
    }

    fn print_experiment(&self, report: &ExperimentReport) -> anyhow::Result<()> {
        let line = build_experiment_line(report);
        emit_json_line(&line);
        Ok(())
    }

    fn print_artifact(&self, path: &Path) {
        emit_json_line(&JsonArtifactLine {
            kind: "artifact",
            path: path.display().to_string(),
        });
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenario: String,
    pub exec: String,
    pub phase: &'static str,
    pub open_loop: bool,
    pub scenario_elapsed_secs: f64,
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    /// Target worker count (closed loop) or arrival rate per time unit (open loop).
    pub level: f64,
    pub active_vus: u64,
    pub max_vus: u64,
    pub iterations_total: u64,
    pub dropped_iterations_total: u64,
    pub requests_total: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    let s = &u.state;
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenario: u.scenario.clone(),
        exec: u.exec.clone(),
        phase: s.phase.into(),
        open_loop: s.open_loop,
        scenario_elapsed_secs: s.elapsed.as_secs_f64(),
        stage: s.stage.map(|st| st.index + 1),
        stages: s.stage.map(|st| st.count),
        level: s.level,
        active_vus: s.active,
        max_vus: s.max_workers,
        iterations_total: s.iterations,
        dropped_iterations_total: s.dropped,
        requests_total: u.requests_total,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub elapsed_secs: f64,
    pub requests_total: u64,
    pub request_rate: f64,
    pub failed_rate: Option<f64>,
    pub latency: JsonLatency,
    pub scenarios: Vec<JsonScenario>,
    pub thresholds: Vec<JsonThreshold>,
    pub thresholds_passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLatency {
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonScenario {
    pub name: String,
    pub exec: String,
    pub status: String,
    pub iterations: u64,
    pub dropped_iterations: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine {
    let head = Headline::from_summary(summary);
    JsonSummaryLine {
        kind: "summary",
        elapsed_secs: summary.elapsed.as_secs_f64(),
        requests_total: head.requests_total,
        request_rate: head.request_rate,
        failed_rate: head.failed_rate,
        latency: JsonLatency {
            p50: head.p50,
            p95: head.p95,
            p99: head.p99,
        },
        scenarios: summary
            .scenarios
            .iter()
            .map(|s| JsonScenario {
                name: s.name.clone(),
                exec: s.exec.clone(),
                status: status_label(&s.status),
                iterations: s.iterations,
                dropped_iterations: s.dropped,
            })
            .collect(),
        thresholds: summary
            .thresholds
            .iter()
            .map(|v| JsonThreshold {
                metric: v.key(),
                expression: v.expression.clone(),
                observed: v.observed,
                passed: v.passed,
            })
            .collect(),
        thresholds_passed: summary.thresholds_passed(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonExperimentLine {
    pub kind: &'static str,
    pub states: Vec<&'static str>,
    pub outcome: &'static str,
    pub configure_error: Option<String>,
    pub restore: Option<String>,
    pub restored: bool,
}

fn build_experiment_line(report: &ExperimentReport) -> JsonExperimentLine {
    JsonExperimentLine {
        kind: "experiment",
        states: report.transitions.iter().map(|s| (*s).into()).collect(),
        outcome: report.outcome.into(),
        configure_error: report.configure_error.clone(),
        restore: report.restore.as_ref().map(|r| r.describe()),
        restored: report.restored(),
    }
}

#[derive(Debug, Serialize)]
struct JsonArtifactLine {
    kind: &'static str,
    path: String,
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
