mod error;
pub mod key;
pub mod metrics;
pub mod registry;
pub mod snapshot;
pub mod tags;

pub use error::{Error, Result};
pub use key::KeyId;
pub use metrics::{MetricHandle, MetricKind};
pub use registry::{MetricId, Registry};
pub use snapshot::{Aggregate, SeriesSnapshot, SeriesValue, Snapshot, TrendSummary};
pub use tags::TagSet;
