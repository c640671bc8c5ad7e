use crate::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {existing}, cannot record it as {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("invalid value {value} for {kind} metric `{name}`")]
    InvalidValue {
        name: String,
        kind: MetricKind,
        value: f64,
    },
}
