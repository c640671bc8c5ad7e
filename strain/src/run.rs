use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use strain_core::config::scenarios_from_options;
use strain_core::thresholds::validate_thresholds;
use strain_core::workload::WorkloadSet;
use strain_core::{HttpClient, RunContext, RunSummary, run_scenarios};
use tokio_util::sync::CancellationToken;

use crate::artifact::{self, ArtifactExperiment};
use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output::{self, OutputFormatter};
use crate::plan;
use crate::run_error::RunError;

pub async fn run(args: RunArgs, cancel: CancellationToken) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let mut plan = plan::load_run_plan(args.plan.as_deref())
        .await
        .map_err(RunError::InvalidInput)?;

    let workloads = WorkloadSet::builtin();
    let scenarios = scenarios_from_options(plan.scenarios, &workloads)
        .map_err(|err| RunError::from_core("invalid scenario config", err))?;
    validate_thresholds(&mut plan.thresholds, &workloads.catalog())
        .map_err(|err| RunError::from_core("invalid thresholds", err))?;

    let ctx = run_context(&args);
    out.print_header(&plan_label(args.plan.as_deref()), &args.base_url, &scenarios);

    let outcome = run_scenarios(scenarios, ctx.clone(), &workloads, cancel, out.progress())
        .await
        .map_err(|err| RunError::from_core("run failed", err))?;
    if outcome.was_cancelled() {
        tracing::warn!("run cancelled; summarizing partial results");
    }

    let summary = RunSummary::build(outcome, ctx.metrics.snapshot(), &plan.thresholds)
        .map_err(|err| RunError::from_core("threshold evaluation failed", err))?;

    out.print_summary(&summary).map_err(RunError::RuntimeError)?;
    export_summary(out.as_ref(), &args.summary_export, &summary, None).await?;

    Ok(ExitCode::from_thresholds(summary.thresholds_passed()))
}

/// Shared run context for both subcommands. Without `--seed` the seed is taken from the clock
/// and logged so the run can be replayed.
pub(crate) fn run_context(args: &RunArgs) -> RunContext {
    let seed = args.seed.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    });
    tracing::info!(seed, base_url = %args.base_url, timeout = ?args.timeout, "run context");

    RunContext::new(&args.base_url)
        .with_seed(seed)
        .with_client(HttpClient::new(args.timeout))
}

pub(crate) fn plan_label(path: Option<&Path>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "<built-in>".to_string(),
    }
}

pub(crate) async fn export_summary(
    out: &dyn OutputFormatter,
    path: &Path,
    summary: &RunSummary,
    experiment: Option<ArtifactExperiment>,
) -> Result<(), RunError> {
    let text = artifact::render(&artifact::build(summary, experiment))
        .map_err(RunError::RuntimeError)?;
    artifact::write(path, &text)
        .await
        .map_err(RunError::RuntimeError)?;
    tracing::info!(path = %path.display(), "summary artifact written");
    out.print_artifact(path);
    Ok(())
}
