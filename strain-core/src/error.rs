pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Metrics(#[from] strain_metrics::Error),

    #[error("scenario `{scenario}`: invalid `executor` `{executor}` (expected `ramping-vus`, `constant-vus`, or `ramping-arrival-rate`)")]
    InvalidExecutor { scenario: String, executor: String },

    #[error("scenario `{0}`: `stages` must be a non-empty array of {{ duration, target }}")]
    InvalidStages(String),

    #[error("scenario `{0}`: every stage has zero duration")]
    EmptyTimeline(String),

    #[error("scenario `{0}`: peak virtual user count must be positive")]
    InvalidVus(String),

    #[error("scenario `{0}`: `timeUnit` must be a positive duration")]
    InvalidTimeUnit(String),

    #[error("scenario `{0}`: `preAllocatedVUs` must be a positive integer")]
    InvalidPreAllocatedVus(String),

    #[error("scenario `{0}`: `maxVUs` must be >= `preAllocatedVUs`")]
    InvalidMaxVus(String),

    #[error("scenario `{0}`: `duration` is required for `constant-vus`")]
    MissingDuration(String),

    #[error("scenario `{scenario}`: unknown workload `{exec}`")]
    UnknownWorkload { scenario: String, exec: String },

    #[error("duplicate scenario name `{0}`")]
    DuplicateScenario(String),

    #[error("no scenarios configured")]
    NoScenarios,

    #[error("invalid threshold for metric `{metric}`: {error}")]
    InvalidThreshold { metric: String, error: String },

    #[error("threshold references unknown metric `{0}`")]
    UnknownMetric(String),

    #[error("cannot resolve base url `{url}`: {source}")]
    Unresolvable {
        url: String,
        #[source]
        source: crate::probe::ProbeError,
    },
}

impl Error {
    /// True for failures detected before any traffic is generated.
    pub fn is_config(&self) -> bool {
        !matches!(self, Self::Join(_) | Self::Metrics(_))
    }
}
