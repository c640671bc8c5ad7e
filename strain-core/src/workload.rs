use async_trait::async_trait;
use rand::Rng as _;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strain_metrics::MetricKind;

use crate::metrics::{MetricCatalog, builtin_catalog};
use crate::vu::VuContext;

mod builtin;

pub use builtin::{
    CpuHeavy, DbHeavy, ExternalProbe, FALLBACK_MARKER, MixedLoad, cpu_path, db_path,
    external_path,
};

/// Randomized pause between iterations, uniform over `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    pub const NONE: Self = Self::fixed(Duration::ZERO);

    pub const fn fixed(d: Duration) -> Self {
        Self { min: d, max: d }
    }

    pub const fn between(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let lo = self.min.as_secs_f64();
        let hi = self.max.as_secs_f64();
        Duration::from_secs_f64(rng.gen_range(lo..=hi))
    }
}

/// A named unit of work run once per iteration.
///
/// Implementations record their own custom metrics through [`VuContext`] and must declare them
/// in [`Workload::metrics`] so thresholds can be validated before the run.
#[async_trait]
pub trait Workload: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn think_time(&self) -> ThinkTime {
        ThinkTime::NONE
    }

    fn metrics(&self) -> &'static [(&'static str, MetricKind)] {
        &[]
    }

    async fn iterate(&self, vu: &mut VuContext);
}

#[derive(Clone, Default)]
pub struct WorkloadSet {
    by_name: BTreeMap<String, Arc<dyn Workload>>,
}

impl std::fmt::Debug for WorkloadSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.by_name.keys()).finish()
    }
}

impl WorkloadSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        Self::new()
            .with(CpuHeavy)
            .with(DbHeavy)
            .with(MixedLoad)
            .with(ExternalProbe)
    }

    pub fn with(mut self, workload: impl Workload) -> Self {
        self.insert(Arc::new(workload));
        self
    }

    pub fn insert(&mut self, workload: Arc<dyn Workload>) {
        self.by_name.insert(workload.name().to_string(), workload);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Workload>> {
        self.by_name.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Built-in metrics plus everything the registered workloads declare.
    pub fn catalog(&self) -> MetricCatalog {
        let mut out = builtin_catalog();
        for w in self.by_name.values() {
            for (name, kind) in w.metrics() {
                out.entry((*name).to_string()).or_insert(*kind);
            }
        }
        out
    }
}
