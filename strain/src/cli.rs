use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_SUMMARY_PATH: &str = "load/summary.json";

fn parse_duration(input: &str) -> Result<Duration, String> {
    let d = humantime::parse_duration(input.trim())
        .map_err(|err| format!("invalid duration '{input}' (expected e.g. 10s, 250ms, 1m): {err}"))?;
    if d.is_zero() {
        return Err(format!("duration '{input}' must be greater than zero"));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bars and a text summary.
    HumanReadable,
    /// Emit JSON progress lines (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "strain",
    author,
    version,
    about = "Load generation and resilience harness for HTTP services",
    long_about = "strain drives closed-loop (ramping virtual users) and open-loop (arrival rate) load against an HTTP service, evaluates threshold rules over the collected metrics, and runs fault-injection experiments that verify graceful degradation.\n\nPlans are YAML files; without --plan the built-in plan for the subcommand is used.",
    after_help = "Examples:\n  strain run\n  strain run --plan plans/stress.yaml --base-url http://localhost:8080\n  strain run --output json --summary-export out/summary.json\n  BASE_URL=http://sut:8080 strain chaos"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a load plan and evaluate its thresholds
    Run(RunArgs),

    /// Run a fault-injection experiment: elevate faults, probe, restore
    Chaos(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Plan file (.yaml); the built-in plan is used when omitted
    #[arg(long)]
    pub plan: Option<PathBuf>,

    /// Base URL of the service under test
    #[arg(long, env = "BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// Where to write the JSON summary artifact
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SUMMARY_PATH)]
    pub summary_export: PathBuf,

    /// Seed for think-times and request mixes
    #[arg(long)]
    pub seed: Option<u64>,

    /// Default per-request timeout (e.g. 10s, 500ms)
    #[arg(long, value_parser = parse_duration, default_value = "60s")]
    pub timeout: Duration,

    /// Log filter (e.g. info, strain_core=debug); overrides RUST_LOG
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}
