use strain_core::chaos::{ChaosError, Experiment, ExperimentOutcome, FaultInjectionController};
use strain_core::config::scenarios_from_options;
use strain_core::workload::WorkloadSet;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactExperiment;
use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::plan;
use crate::run::{export_summary, plan_label, run_context};
use crate::run_error::RunError;

pub async fn chaos(args: RunArgs, cancel: CancellationToken) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let plan = plan::load_chaos_plan(args.plan.as_deref())
        .await
        .map_err(RunError::InvalidInput)?;

    let workloads = WorkloadSet::builtin();
    let mut probes = scenarios_from_options(vec![plan.probe], &workloads)
        .map_err(|err| RunError::from_core("invalid probe scenario", err))?;
    let Some(probe) = probes.pop() else {
        return Err(RunError::InvalidInput(anyhow::anyhow!("chaos plan has no probe scenario")));
    };

    let experiment = Experiment {
        elevated: plan.elevated,
        baseline: plan.baseline,
        probe,
        thresholds: plan.thresholds,
    };

    out.print_header(
        &plan_label(args.plan.as_deref()),
        &args.base_url,
        std::slice::from_ref(&experiment.probe),
    );

    let controller = FaultInjectionController::new(run_context(&args));
    let report = controller
        .run(&experiment, &workloads, cancel, out.progress())
        .await
        .map_err(|err| match err {
            ChaosError::Run(core) => RunError::from_core("fault-injection experiment failed", core),
            other => RunError::InvalidInput(anyhow::Error::new(other)),
        })?;

    if report.restore.is_some() && !report.restored() {
        tracing::warn!("baseline configuration was not restored; the service may still be degraded");
    }

    match (report.outcome, &report.summary) {
        (ExperimentOutcome::Aborted, _) => {
            out.print_experiment(&report).map_err(RunError::RuntimeError)?;
            Ok(ExitCode::ConfigureRejected)
        }
        (ExperimentOutcome::Completed, Some(summary)) => {
            out.print_summary(summary).map_err(RunError::RuntimeError)?;
            out.print_experiment(&report).map_err(RunError::RuntimeError)?;
            let record = ArtifactExperiment::new(&experiment, &report);
            export_summary(out.as_ref(), &args.summary_export, summary, Some(record)).await?;
            Ok(ExitCode::from_thresholds(summary.thresholds_passed()))
        }
        (ExperimentOutcome::Completed, None) => Err(RunError::RuntimeError(anyhow::anyhow!(
            "experiment completed without a run summary"
        ))),
    }
}
