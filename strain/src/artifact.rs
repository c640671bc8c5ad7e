//! Machine-readable run summary written to disk after every run.
//!
//! Every map is a `BTreeMap` and series are emitted in snapshot order, so rendering the same
//! summary twice yields byte-identical files.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use serde_json::{Value, json};
use strain_core::RunSummary;
use strain_core::chaos::{Experiment, ExperimentReport, FaultInjectionConfig};
use strain_core::strain_metrics::{Aggregate, MetricKind};

use crate::output::status_label;

#[derive(Debug, Serialize)]
pub(crate) struct SummaryArtifact {
    pub state: ArtifactState,
    pub metrics: BTreeMap<String, ArtifactMetric>,
    pub thresholds: BTreeMap<String, Vec<ArtifactVerdict>>,
    pub scenarios: BTreeMap<String, ArtifactScenario>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ArtifactExperiment>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactState {
    pub test_run_duration_ms: f64,
    pub thresholds_passed: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactMetric {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub values: BTreeMap<&'static str, Value>,
    pub series: Vec<ArtifactSeries>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactSeries {
    pub tags: BTreeMap<String, String>,
    pub values: BTreeMap<&'static str, Value>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactVerdict {
    pub expression: String,
    pub observed: Option<f64>,
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactScenario {
    pub exec: String,
    pub status: String,
    pub iterations: u64,
    pub dropped_iterations: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ArtifactExperiment {
    pub elevated: FaultInjectionConfig,
    pub baseline: FaultInjectionConfig,
    pub states: Vec<&'static str>,
    pub outcome: &'static str,
    pub configure_error: Option<String>,
    pub restore: Option<String>,
    pub restored: bool,
}

impl ArtifactExperiment {
    pub(crate) fn new(experiment: &Experiment, report: &ExperimentReport) -> Self {
        Self {
            elevated: experiment.elevated,
            baseline: experiment.baseline,
            states: report.transitions.iter().map(|s| (*s).into()).collect(),
            outcome: report.outcome.into(),
            configure_error: report.configure_error.clone(),
            restore: report.restore.as_ref().map(|r| r.describe()),
            restored: report.restored(),
        }
    }
}

fn values_of(agg: &Aggregate, summary: &RunSummary) -> BTreeMap<&'static str, Value> {
    let mut out = BTreeMap::new();
    match agg.kind() {
        MetricKind::Counter => {
            out.insert("count", json!(agg.count()));
            if let Some(rate) = agg.per_second(summary.elapsed) {
                out.insert("rate", json!(rate));
            }
        }
        MetricKind::Rate => {
            let total = agg.count();
            let rate = agg.rate();
            let passes = rate.map(|r| (r * total as f64).round() as u64).unwrap_or(0);
            out.insert("rate", json!(rate));
            out.insert("passes", json!(passes));
            out.insert("fails", json!(total.saturating_sub(passes)));
        }
        MetricKind::Trend => {
            if let Some(t) = agg.trend_summary() {
                out.insert("count", json!(t.count));
                out.insert("avg", json!(t.avg));
                out.insert("min", json!(t.min));
                out.insert("med", json!(t.med));
                out.insert("max", json!(t.max));
                out.insert("p(90)", json!(t.p90));
                out.insert("p(95)", json!(t.p95));
                out.insert("p(99)", json!(t.p99));
            }
        }
    }
    out
}

pub(crate) fn build(summary: &RunSummary, experiment: Option<ArtifactExperiment>) -> SummaryArtifact {
    let mut metrics = BTreeMap::new();
    for (name, kind) in summary.metrics.metrics() {
        let Some(agg) = summary.metrics.aggregate(name, &[]) else {
            continue;
        };
        let series = summary
            .metrics
            .series_of(name)
            .map(|s| ArtifactSeries {
                tags: s.tags.iter().cloned().collect(),
                values: values_of(&s.aggregate(), summary),
            })
            .collect();
        metrics.insert(
            name.to_string(),
            ArtifactMetric {
                kind: kind.into(),
                values: values_of(&agg, summary),
                series,
            },
        );
    }

    let mut thresholds: BTreeMap<String, Vec<ArtifactVerdict>> = BTreeMap::new();
    for v in &summary.thresholds {
        thresholds.entry(v.key()).or_default().push(ArtifactVerdict {
            expression: v.expression.clone(),
            observed: v.observed,
            ok: v.passed,
        });
    }

    let scenarios = summary
        .scenarios
        .iter()
        .map(|s| {
            (
                s.name.clone(),
                ArtifactScenario {
                    exec: s.exec.clone(),
                    status: status_label(&s.status),
                    iterations: s.iterations,
                    dropped_iterations: s.dropped,
                },
            )
        })
        .collect();

    SummaryArtifact {
        state: ArtifactState {
            test_run_duration_ms: summary.elapsed.as_secs_f64() * 1000.0,
            thresholds_passed: summary.thresholds_passed(),
        },
        metrics,
        thresholds,
        scenarios,
        experiment,
    }
}

pub(crate) fn render(artifact: &SummaryArtifact) -> anyhow::Result<String> {
    let mut text =
        serde_json::to_string_pretty(artifact).context("failed to serialize summary artifact")?;
    text.push('\n');
    Ok(text)
}

/// Writes the artifact, creating parent directories as needed.
pub(crate) async fn write(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write summary artifact: {}", path.display()))
}
