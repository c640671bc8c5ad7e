use std::sync::Arc;
use std::time::Duration;

use crate::schedule::StageSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ScenarioPhase {
    /// Waiting for its start offset.
    Waiting,
    Running,
    /// Timeline over or cancelled; in-flight iterations are draining.
    Stopping,
    Finished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioState {
    pub phase: ScenarioPhase,
    pub open_loop: bool,
    pub elapsed: Duration,
    pub timeline: Duration,
    pub stage: Option<StageSnapshot>,
    /// Interpolated worker count (closed loop) or arrival rate per time unit (open loop).
    pub level: f64,
    pub max_workers: u64,
    pub active: u64,
    pub iterations: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based tick counter.
    pub tick: u64,
    /// Time since the global start.
    pub elapsed: Duration,
    pub scenario: String,
    pub exec: String,
    pub state: ScenarioState,
    /// Requests recorded by this scenario so far.
    pub requests_total: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;
