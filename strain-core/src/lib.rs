mod error;
mod executor;
mod pacer;
mod probe;
mod run;
mod schedule;
mod summary;
mod vu;

pub mod chaos;
pub mod config;
pub mod metrics;
pub mod progress;
pub mod thresholds;
pub mod workload;

pub use error::{Error, Result};
pub use executor::{ScenarioOutcome, ScenarioStatus};
pub use probe::{
    DEFAULT_TIMEOUT, HttpClient, ProbeError, ProbeErrorKind, ProbeRequest, ProbeResult,
    resolve_base_url,
};
pub use run::{DEFAULT_PROGRESS_INTERVAL, RunContext, RunOutcome, run_scenarios};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use summary::RunSummary;
pub use vu::{StartSignal, VuContext};

pub use strain_metrics;
