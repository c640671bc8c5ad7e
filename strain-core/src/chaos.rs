//! Staged fault-injection experiment: raise the service's failure rate, probe the
//! fallback-sensitive endpoint, then put the baseline configuration back.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use parking_lot::Mutex;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

use crate::config::ScenarioConfig;
use crate::probe::{HttpClient, ProbeErrorKind, ProbeRequest, ProbeResult, resolve_base_url};
use crate::progress::ProgressFn;
use crate::run::{RunContext, run_scenarios};
use crate::summary::RunSummary;
use crate::thresholds::{ThresholdSet, validate_thresholds};
use crate::workload::WorkloadSet;

pub const ADMIN_CONFIGURE_PATH: &str = "/admin/mock/configure";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultInjectionConfig {
    pub failure_rate: f64,
    pub delay_ms: u64,
}

impl FaultInjectionConfig {
    pub const ELEVATED: Self = Self {
        failure_rate: 0.6,
        delay_ms: 100,
    };

    pub const BASELINE: Self = Self {
        failure_rate: 0.1,
        delay_ms: 50,
    };

    pub fn validate(&self) -> Result<(), ChaosError> {
        if !self.failure_rate.is_finite() || !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(ChaosError::InvalidConfig(format!(
                "failureRate must be within [0, 1], got {}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    #[error("a fault-injection experiment is already running against `{0}`")]
    AlreadyRunning(String),

    #[error("invalid fault-injection config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Run(#[from] crate::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ControllerState {
    Configuring,
    Probing,
    Restoring,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ExperimentOutcome {
    Completed,
    /// The elevated configuration was not acknowledged.
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminResponse {
    pub status: u16,
    pub error: Option<ProbeErrorKind>,
}

impl AdminResponse {
    fn from_probe(res: &ProbeResult) -> Self {
        Self {
            status: res.status,
            error: res.error,
        }
    }

    pub fn acknowledged(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn describe(&self) -> String {
        match self.error {
            Some(kind) => format!("transport error ({kind})"),
            None => format!("HTTP {}", self.status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Experiment {
    pub elevated: FaultInjectionConfig,
    pub baseline: FaultInjectionConfig,
    pub probe: ScenarioConfig,
    pub thresholds: Vec<ThresholdSet>,
}

#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub transitions: Vec<ControllerState>,
    pub configure_error: Option<String>,
    pub restore: Option<AdminResponse>,
    pub outcome: ExperimentOutcome,
    pub summary: Option<RunSummary>,
}

impl ExperimentReport {
    fn enter(&mut self, state: ControllerState) {
        tracing::info!(state = %state, "fault-injection controller");
        self.transitions.push(state);
    }

    pub fn restored(&self) -> bool {
        self.restore.as_ref().is_some_and(AdminResponse::acknowledged)
    }
}

static ACTIVE_TARGETS: LazyLock<Mutex<HashSet<String>>> =
    LazyLock::new(|| Mutex::new(HashSet::new()));

/// Marks a target as under experiment for the guard's lifetime.
#[derive(Debug)]
struct TargetLock {
    target: String,
}

impl TargetLock {
    fn acquire(target: &str) -> Result<Self, ChaosError> {
        let mut active = ACTIVE_TARGETS.lock();
        if !active.insert(target.to_string()) {
            return Err(ChaosError::AlreadyRunning(target.to_string()));
        }
        Ok(Self {
            target: target.to_string(),
        })
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        ACTIVE_TARGETS.lock().remove(&self.target);
    }
}

async fn post_config(client: &HttpClient, url: &str, cfg: &FaultInjectionConfig) -> AdminResponse {
    let body = match serde_json::to_vec(cfg) {
        Ok(b) => b,
        Err(err) => {
            tracing::error!(error = %err, "failed to encode fault-injection config");
            return AdminResponse {
                status: 0,
                error: Some(ProbeErrorKind::RequestBuild),
            };
        }
    };
    let res = client.probe(ProbeRequest::post_json(url, body)).await;
    AdminResponse::from_probe(&res)
}

/// Holds the elevated configuration. Restore with [`FaultGuard::restore`]; dropping the guard
/// without it schedules a best-effort restore.
#[derive(Debug)]
pub struct FaultGuard {
    client: Arc<HttpClient>,
    url: String,
    baseline: FaultInjectionConfig,
    restored: bool,
}

impl FaultGuard {
    fn new(client: Arc<HttpClient>, url: String, baseline: FaultInjectionConfig) -> Self {
        Self {
            client,
            url,
            baseline,
            restored: false,
        }
    }

    pub async fn restore(mut self) -> AdminResponse {
        self.restored = true;
        let res = post_config(&self.client, &self.url, &self.baseline).await;
        if res.acknowledged() {
            tracing::info!(config = ?self.baseline, "baseline configuration restored");
        } else {
            tracing::error!(response = %res.describe(), "failed to restore baseline configuration");
        }
        res
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        tracing::warn!("fault guard dropped without restore; restoring in background");
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!("no runtime available; baseline configuration NOT restored");
            return;
        };
        let client = self.client.clone();
        let url = std::mem::take(&mut self.url);
        let baseline = self.baseline;
        handle.spawn(async move {
            let res = post_config(&client, &url, &baseline).await;
            if !res.acknowledged() {
                tracing::error!(response = %res.describe(), "background restore failed");
            }
        });
    }
}

pub struct FaultInjectionController {
    ctx: RunContext,
}

impl FaultInjectionController {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx }
    }

    fn admin_url(&self) -> String {
        format!(
            "{}{}",
            self.ctx.base_url.trim_end_matches('/'),
            ADMIN_CONFIGURE_PATH
        )
    }

    /// Configuring -> Probing -> Restoring -> Done. Restoring runs on every path once the
    /// elevated configuration may have reached the service.
    pub async fn run(
        &self,
        experiment: &Experiment,
        workloads: &WorkloadSet,
        cancel: CancellationToken,
        progress: Option<ProgressFn>,
    ) -> Result<ExperimentReport, ChaosError> {
        experiment.elevated.validate()?;
        experiment.baseline.validate()?;
        let mut thresholds = experiment.thresholds.clone();
        validate_thresholds(&mut thresholds, &workloads.catalog())?;
        resolve_base_url(&self.ctx.base_url)
            .await
            .map_err(|source| crate::Error::Unresolvable {
                url: self.ctx.base_url.to_string(),
                source,
            })?;

        let _lock = TargetLock::acquire(&self.ctx.base_url)?;
        let url = self.admin_url();

        let mut report = ExperimentReport {
            transitions: Vec::with_capacity(4),
            configure_error: None,
            restore: None,
            outcome: ExperimentOutcome::Completed,
            summary: None,
        };

        report.enter(ControllerState::Configuring);
        let configured = post_config(&self.ctx.client, &url, &experiment.elevated).await;

        // A request that got a response, or timed out after sending, may have been applied.
        let maybe_applied = configured.status != 0
            || matches!(
                configured.error,
                Some(ProbeErrorKind::Timeout | ProbeErrorKind::BodyRead)
            );
        let guard = maybe_applied.then(|| {
            FaultGuard::new(self.ctx.client.clone(), url.clone(), experiment.baseline)
        });

        if !configured.acknowledged() {
            let reason = configured.describe();
            tracing::error!(response = %reason, "fault-injection config not acknowledged; aborting");
            report.configure_error = Some(reason);
            report.outcome = ExperimentOutcome::Aborted;
            if let Some(guard) = guard {
                report.enter(ControllerState::Restoring);
                report.restore = Some(guard.restore().await);
            }
            report.enter(ControllerState::Done);
            return Ok(report);
        }
        tracing::info!(config = ?experiment.elevated, "fault injection configured");

        report.enter(ControllerState::Probing);
        let probed = run_scenarios(
            vec![experiment.probe.clone()],
            self.ctx.clone(),
            workloads,
            cancel,
            progress,
        )
        .await;

        report.enter(ControllerState::Restoring);
        if let Some(guard) = guard {
            report.restore = Some(guard.restore().await);
        }
        report.enter(ControllerState::Done);

        let outcome = probed?;
        let summary = RunSummary::build(outcome, self.ctx.metrics.snapshot(), &thresholds)?;
        report.summary = Some(summary);
        Ok(report)
    }
}
