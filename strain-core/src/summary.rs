use std::time::Duration;
use strain_metrics::Snapshot;

use crate::error::Result;
use crate::executor::ScenarioOutcome;
use crate::run::RunOutcome;
use crate::thresholds::{ThresholdSet, ThresholdVerdict, evaluate_thresholds};

/// Frozen result of a run: metrics, verdicts and scenario outcomes. Built exactly once.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub metrics: Snapshot,
    pub thresholds: Vec<ThresholdVerdict>,
    pub scenarios: Vec<ScenarioOutcome>,
}

impl RunSummary {
    pub fn build(outcome: RunOutcome, metrics: Snapshot, thresholds: &[ThresholdSet]) -> Result<Self> {
        let verdicts = evaluate_thresholds(&metrics, thresholds, outcome.elapsed)?;
        Ok(Self {
            elapsed: outcome.elapsed,
            metrics,
            thresholds: verdicts,
            scenarios: outcome.scenarios,
        })
    }

    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|v| v.passed)
    }

    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdVerdict> {
        self.thresholds.iter().filter(|v| !v.passed)
    }
}
