use std::path::Path;

use strain_core::chaos::ExperimentReport;
use strain_core::config::ScenarioConfig;
use strain_core::progress::ProgressFn;
use strain_core::{RunSummary, ScenarioStatus};

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, plan: &str, base_url: &str, scenarios: &[ScenarioConfig]);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()>;
    fn print_experiment(&self, report: &ExperimentReport) -> anyhow::Result<()>;
    fn print_artifact(&self, path: &Path);
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}

pub(crate) fn status_label(status: &ScenarioStatus) -> String {
    match status {
        ScenarioStatus::Completed => "completed".to_string(),
        ScenarioStatus::Cancelled => "cancelled".to_string(),
        ScenarioStatus::Failed(reason) => format!("failed: {reason}"),
    }
}

/// Figures shared by the text digest and the JSON summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Headline {
    pub requests_total: u64,
    pub request_rate: f64,
    pub failed_rate: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl Headline {
    pub(crate) fn from_summary(summary: &RunSummary) -> Self {
        use strain_core::metrics::{HTTP_REQ_DURATION, HTTP_REQ_FAILED, HTTP_REQS};

        let requests_total = summary
            .metrics
            .aggregate(HTTP_REQS, &[])
            .map(|a| a.count())
            .unwrap_or(0);
        let secs = summary.elapsed.as_secs_f64();
        let request_rate = if secs > 0.0 {
            requests_total as f64 / secs
        } else {
            0.0
        };
        let failed_rate = summary
            .metrics
            .aggregate(HTTP_REQ_FAILED, &[])
            .and_then(|a| a.rate());
        let latency = summary.metrics.aggregate(HTTP_REQ_DURATION, &[]);
        let pct = |p: f64| latency.as_ref().and_then(|a| a.percentile(p));

        Self {
            requests_total,
            request_rate,
            failed_rate,
            p50: pct(50.0),
            p95: pct(95.0),
            p99: pct(99.0),
        }
    }
}
