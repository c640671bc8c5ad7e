use std::collections::BTreeMap;
use strain_metrics::MetricKind;

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const CHECKS: &str = "checks";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
pub const SCENARIO_ERRORS: &str = "scenario_errors";

pub const TAG_SCENARIO: &str = "scenario";
pub const TAG_ENDPOINT: &str = "endpoint";
pub const TAG_METHOD: &str = "method";
pub const TAG_STATUS: &str = "status";
pub const TAG_CHECK: &str = "check";
pub const TAG_KIND: &str = "kind";

/// Every metric name a run can produce, with its kind.
pub type MetricCatalog = BTreeMap<String, MetricKind>;

pub fn builtin_catalog() -> MetricCatalog {
    [
        (HTTP_REQS, MetricKind::Counter),
        (HTTP_REQ_DURATION, MetricKind::Trend),
        (HTTP_REQ_FAILED, MetricKind::Rate),
        (CHECKS, MetricKind::Rate),
        (ITERATIONS, MetricKind::Counter),
        (ITERATION_DURATION, MetricKind::Trend),
        (DROPPED_ITERATIONS, MetricKind::Counter),
        (SCENARIO_ERRORS, MetricKind::Counter),
    ]
    .into_iter()
    .map(|(name, kind)| (name.to_string(), kind))
    .collect()
}
