use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic sum of non-negative integers.
    Counter,
    /// Fraction of non-zero observations.
    Rate,
    /// Distribution of millisecond values.
    Trend,
}

/// Trend values are milliseconds; the histogram stores microseconds.
pub(crate) const TREND_UNITS_PER_MS: f64 = 1000.0;

pub(crate) fn new_trend_histogram() -> Histogram<u64> {
    // 1us .. 1h with 3 significant digits.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

#[derive(Debug, Default)]
pub struct RateCell {
    pub(crate) total: AtomicU64,
    pub(crate) hits: AtomicU64,
}

/// Write handle for one series. Cloning is cheap and every clone writes to the same storage.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Rate(Arc<RateCell>),
    Trend(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(RateCell::default())),
            MetricKind::Trend => Self::Trend(Arc::new(Mutex::new(new_trend_histogram()))),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Rate(_) => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    #[inline]
    pub fn add(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_rate(&self, hit: bool) {
        if let Self::Rate(r) = self {
            if hit {
                r.hits.fetch_add(1, Ordering::Relaxed);
            }
            r.total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn observe_ms(&self, ms: f64) {
        if let Self::Trend(h) = self {
            let scaled = (ms.max(0.0) * TREND_UNITS_PER_MS).round() as u64;
            h.lock().saturating_record(scaled.max(1));
        }
    }

    #[inline]
    pub fn observe(&self, d: Duration) {
        self.observe_ms(d.as_secs_f64() * 1000.0);
    }

    /// Records a raw value according to the handle's kind. Callers validate `value` first.
    pub(crate) fn record(&self, value: f64) {
        match self {
            Self::Counter(_) => self.add(value as u64),
            Self::Rate(_) => self.add_rate(value != 0.0),
            Self::Trend(_) => self.observe_ms(value),
        }
    }
}

pub(crate) fn validate_value(kind: MetricKind, value: f64) -> bool {
    match kind {
        MetricKind::Counter => value.is_finite() && value >= 0.0,
        MetricKind::Rate => !value.is_nan(),
        MetricKind::Trend => value.is_finite(),
    }
}
