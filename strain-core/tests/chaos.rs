use std::time::Duration;

use anyhow::Context as _;
use strain_core::chaos::{
    ChaosError, ControllerState, Experiment, ExperimentOutcome, ExperimentReport,
    FaultInjectionConfig, FaultInjectionController,
};
use strain_core::config::{Executor, ScenarioConfig, Stage};
use strain_core::thresholds::ThresholdSet;
use strain_core::workload::{ThinkTime, WorkloadSet};
use strain_core::{Error, RunContext, ScenarioStatus};
use strain_testserver::{MockConfig, TestServer};
use tokio_util::sync::CancellationToken;

fn probe_scenario() -> ScenarioConfig {
    ScenarioConfig {
        name: "fallback_probe".to_string(),
        exec: "external_probe".to_string(),
        executor: Executor::ClosedLoop {
            start_vus: 2,
            stages: vec![Stage::new(Duration::from_secs(1), 2)],
            graceful_ramp_down: Duration::from_secs(1),
        },
        start_offset: Duration::ZERO,
        graceful_stop: Duration::from_secs(2),
        tags: Vec::new(),
        think_time: Some(ThinkTime::fixed(Duration::from_millis(20))),
    }
}

fn experiment(thresholds: Vec<ThresholdSet>) -> Experiment {
    Experiment {
        elevated: FaultInjectionConfig::ELEVATED,
        baseline: FaultInjectionConfig::BASELINE,
        probe: probe_scenario(),
        thresholds,
    }
}

fn mock(cfg: FaultInjectionConfig) -> MockConfig {
    MockConfig {
        failure_rate: cfg.failure_rate,
        delay_ms: cfg.delay_ms,
    }
}

async fn run(server_url: &str, exp: &Experiment) -> Result<ExperimentReport, ChaosError> {
    FaultInjectionController::new(RunContext::new(server_url))
        .run(exp, &WorkloadSet::builtin(), CancellationToken::new(), None)
        .await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn elevated_faults_are_probed_then_restored_once() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let exp = experiment(vec![ThresholdSet::from_key(
        "checks",
        vec!["rate>0.99".to_string()],
    )?]);
    let report = run(server.base_url(), &exp).await?;

    let stats = server.stats().clone();
    let during = stats.external_requests();
    let failures = stats.external_failures();
    server.shutdown().await;

    anyhow::ensure!(
        report.transitions
            == [
                ControllerState::Configuring,
                ControllerState::Probing,
                ControllerState::Restoring,
                ControllerState::Done,
            ],
        "transitions {:?}",
        report.transitions
    );
    anyhow::ensure!(report.outcome == ExperimentOutcome::Completed);
    anyhow::ensure!(report.restored());
    anyhow::ensure!(stats.configure_calls() == 2);
    anyhow::ensure!(
        stats.configure_history()
            == [
                mock(FaultInjectionConfig::ELEVATED),
                mock(FaultInjectionConfig::BASELINE)
            ],
        "history {:?}",
        stats.configure_history()
    );
    anyhow::ensure!(during > 0, "probe never reached the service");

    let summary = report.summary.context("completed experiment has a summary")?;
    anyhow::ensure!(summary.scenarios[0].status == ScenarioStatus::Completed);
    // Fallback answers are 200 with the marker, so every check passes.
    anyhow::ensure!(summary.thresholds_passed(), "verdicts {:?}", summary.thresholds);

    let fallback = summary
        .metrics
        .aggregate("fallback_responses", &[])
        .context("fallback_responses missing")?;
    anyhow::ensure!(fallback.count() == during);
    if failures > 0 {
        anyhow::ensure!(fallback.rate().is_some_and(|r| r > 0.0));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unavailable_answers_still_pass_the_probe_check() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    server.control().set_fallback_enabled(false);

    let mut exp = experiment(vec![ThresholdSet::from_key(
        "checks",
        vec!["rate==1".to_string()],
    )?]);
    exp.elevated = FaultInjectionConfig {
        failure_rate: 1.0,
        delay_ms: 5,
    };
    let report = run(server.base_url(), &exp).await?;
    server.shutdown().await;

    let summary = report.summary.context("summary")?;
    let unavailable = summary
        .metrics
        .aggregate(
            "http_reqs",
            &[("status".to_string(), "503".to_string())],
        )
        .map(|a| a.count())
        .unwrap_or(0);
    anyhow::ensure!(unavailable > 0, "expected 503 answers");
    anyhow::ensure!(summary.thresholds_passed(), "verdicts {:?}", summary.thresholds);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_checks_do_not_skip_the_restore() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    server.control().set_hard_failures(true);

    let mut exp = experiment(vec![ThresholdSet::from_key(
        "checks",
        vec!["rate>0.99".to_string()],
    )?]);
    exp.elevated = FaultInjectionConfig {
        failure_rate: 1.0,
        delay_ms: 5,
    };
    let report = run(server.base_url(), &exp).await?;

    let stats = server.stats().clone();
    server.shutdown().await;

    anyhow::ensure!(report.outcome == ExperimentOutcome::Completed);
    anyhow::ensure!(
        report.transitions
            == [
                ControllerState::Configuring,
                ControllerState::Probing,
                ControllerState::Restoring,
                ControllerState::Done,
            ],
        "transitions {:?}",
        report.transitions
    );
    anyhow::ensure!(report.restored());
    anyhow::ensure!(stats.configure_calls() == 2);
    anyhow::ensure!(
        stats.configure_history() == [mock(exp.elevated), mock(FaultInjectionConfig::BASELINE)],
        "history {:?}",
        stats.configure_history()
    );

    let summary = report.summary.context("summary")?;
    anyhow::ensure!(summary.scenarios[0].status == ScenarioStatus::Completed);
    let checks = summary
        .metrics
        .aggregate("checks", &[])
        .context("checks missing")?;
    anyhow::ensure!(checks.count() > 0, "no checks recorded");
    anyhow::ensure!(checks.rate() == Some(0.0), "checks rate {:?}", checks.rate());
    anyhow::ensure!(!summary.thresholds_passed(), "verdicts {:?}", summary.thresholds);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_configuration_aborts_and_still_restores() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;
    server.control().reject_next_configures(1);

    let report = run(server.base_url(), &experiment(Vec::new())).await?;
    let stats = server.stats().clone();
    server.shutdown().await;

    anyhow::ensure!(report.outcome == ExperimentOutcome::Aborted);
    anyhow::ensure!(
        report.transitions
            == [
                ControllerState::Configuring,
                ControllerState::Restoring,
                ControllerState::Done,
            ],
        "transitions {:?}",
        report.transitions
    );
    anyhow::ensure!(report.configure_error.as_deref() == Some("HTTP 400"));
    anyhow::ensure!(report.summary.is_none());
    anyhow::ensure!(report.restored());
    anyhow::ensure!(stats.configure_calls() == 2);
    anyhow::ensure!(stats.configure_history() == [mock(FaultInjectionConfig::BASELINE)]);
    anyhow::ensure!(stats.external_requests() == 0, "probing must not start");
    Ok(())
}

#[tokio::test]
async fn unreachable_admin_endpoint_aborts_without_restore() -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let report = run(&format!("http://{addr}"), &experiment(Vec::new())).await?;

    anyhow::ensure!(report.outcome == ExperimentOutcome::Aborted);
    anyhow::ensure!(
        report.transitions == [ControllerState::Configuring, ControllerState::Done],
        "transitions {:?}",
        report.transitions
    );
    anyhow::ensure!(report.restore.is_none());
    Ok(())
}

#[tokio::test]
async fn invalid_inputs_fail_before_any_request() -> anyhow::Result<()> {
    let server = TestServer::start().await.context("start test server")?;

    let mut bad_rate = experiment(Vec::new());
    bad_rate.elevated.failure_rate = 1.5;
    let err = run(server.base_url(), &bad_rate).await;
    anyhow::ensure!(matches!(err, Err(ChaosError::InvalidConfig(_))), "got {err:?}");

    let unknown = experiment(vec![ThresholdSet::from_key(
        "fallback_ratio",
        vec!["rate>0.5".to_string()],
    )?]);
    let err = run(server.base_url(), &unknown).await;
    anyhow::ensure!(
        matches!(err, Err(ChaosError::Run(Error::UnknownMetric(ref m))) if m == "fallback_ratio"),
        "got {err:?}"
    );

    let unresolvable = run("http://host.invalid:8080", &experiment(Vec::new())).await;
    anyhow::ensure!(
        matches!(unresolvable, Err(ChaosError::Run(Error::Unresolvable { .. }))),
        "got {unresolvable:?}"
    );

    let stats = server.stats().clone();
    server.shutdown().await;
    anyhow::ensure!(stats.configure_calls() == 0);
    Ok(())
}
