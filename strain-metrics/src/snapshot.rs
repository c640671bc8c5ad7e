use hdrhistogram::Histogram;
use std::time::Duration;

use crate::metrics::{MetricKind, TREND_UNITS_PER_MS, new_trend_histogram};

#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(u64),
    Rate { total: u64, hits: u64 },
    Trend(Histogram<u64>),
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub name: String,
    pub kind: MetricKind,
    /// Sorted by key.
    pub tags: Vec<(String, String)>,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    fn matches(&self, selector: &[(String, String)]) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.tags.iter().any(|(tk, tv)| tk == k && tv == v))
    }

    pub fn aggregate(&self) -> Aggregate {
        let mut agg = Aggregate::empty(self.kind);
        agg.merge(&self.value);
        agg
    }
}

/// Frozen copy of a registry. Every derived value is computed from it without mutation.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    series: Vec<SeriesSnapshot>,
}

impl Snapshot {
    pub fn from_series(mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        Self { series }
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    pub fn series_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a SeriesSnapshot> + 'a {
        self.series.iter().filter(move |s| s.name == name)
    }

    /// Distinct metric names with their kinds, in name order.
    pub fn metrics(&self) -> Vec<(&str, MetricKind)> {
        let mut out: Vec<(&str, MetricKind)> = Vec::new();
        for s in &self.series {
            if out.last().is_none_or(|(n, _)| *n != s.name) {
                out.push((s.name.as_str(), s.kind));
            }
        }
        out
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series_of(name).next().map(|s| s.kind)
    }

    /// Merges every series of `name` whose tags include all of `selector`.
    ///
    /// Returns `None` when the metric was never recorded. A selector matching no series yields
    /// an empty aggregate of the metric's kind.
    pub fn aggregate(&self, name: &str, selector: &[(String, String)]) -> Option<Aggregate> {
        let kind = self.kind_of(name)?;
        let mut agg = Aggregate::empty(kind);
        for s in self.series_of(name).filter(|s| s.matches(selector)) {
            agg.merge(&s.value);
        }
        Some(agg)
    }
}

#[derive(Debug, Clone)]
pub enum Aggregate {
    Counter { sum: u64 },
    Rate { total: u64, hits: u64 },
    Trend(Histogram<u64>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSummary {
    pub count: u64,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
}

impl Aggregate {
    /// An aggregate over no observations.
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter { sum: 0 },
            MetricKind::Rate => Self::Rate { total: 0, hits: 0 },
            MetricKind::Trend => Self::Trend(new_trend_histogram()),
        }
    }

    fn merge(&mut self, value: &SeriesValue) {
        match (self, value) {
            (Self::Counter { sum }, SeriesValue::Counter(v)) => *sum = sum.saturating_add(*v),
            (Self::Rate { total, hits }, SeriesValue::Rate { total: t, hits: h }) => {
                *total = total.saturating_add(*t);
                *hits = hits.saturating_add(*h);
            }
            (Self::Trend(acc), SeriesValue::Trend(h)) => {
                let _ = acc.add(h);
            }
            _ => {}
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of recorded observations (the sum for counters).
    pub fn count(&self) -> u64 {
        match self {
            Self::Counter { sum } => *sum,
            Self::Rate { total, .. } => *total,
            Self::Trend(h) => h.len(),
        }
    }

    /// Fraction of hits for rates; `None` for other kinds or an empty rate.
    pub fn rate(&self) -> Option<f64> {
        match self {
            Self::Rate { total, hits } if *total > 0 => Some(*hits as f64 / *total as f64),
            _ => None,
        }
    }

    /// Counter sum divided by the run duration.
    pub fn per_second(&self, elapsed: Duration) -> Option<f64> {
        match self {
            Self::Counter { sum } => Some(*sum as f64 / elapsed.as_secs_f64().max(1e-9)),
            _ => None,
        }
    }

    fn trend(&self) -> Option<&Histogram<u64>> {
        match self {
            Self::Trend(h) if !h.is_empty() => Some(h),
            _ => None,
        }
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        if !(p > 0.0 && p <= 100.0) {
            return None;
        }
        self.trend()
            .map(|h| h.value_at_quantile(p / 100.0) as f64 / TREND_UNITS_PER_MS)
    }

    pub fn avg(&self) -> Option<f64> {
        self.trend().map(|h| h.mean() / TREND_UNITS_PER_MS)
    }

    pub fn min(&self) -> Option<f64> {
        self.trend().map(|h| h.min() as f64 / TREND_UNITS_PER_MS)
    }

    pub fn max(&self) -> Option<f64> {
        self.trend().map(|h| h.max() as f64 / TREND_UNITS_PER_MS)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn trend_summary(&self) -> Option<TrendSummary> {
        let Self::Trend(h) = self else {
            return None;
        };
        Some(TrendSummary {
            count: h.len(),
            avg: self.avg(),
            min: self.min(),
            med: self.med(),
            max: self.max(),
            p90: self.percentile(90.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
        })
    }
}
