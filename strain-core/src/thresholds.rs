use std::time::Duration;
use strain_metrics::{Aggregate, MetricKind, Snapshot};

use crate::error::{Error, Result};
use crate::metrics::MetricCatalog;

/// All expressions declared for one metric (optionally narrowed by a tag selector).
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub selector: Vec<(String, String)>,
    pub expressions: Vec<String>,
    /// Filled in by [`validate_thresholds`] from the metric catalog.
    pub kind: Option<MetricKind>,
}

impl ThresholdSet {
    /// Builds a set from a key such as `http_req_duration{endpoint:cpu}`.
    pub fn from_key(key: &str, expressions: Vec<String>) -> Result<Self> {
        let (metric, selector) = parse_threshold_key(key).map_err(|error| Error::InvalidThreshold {
            metric: key.to_string(),
            error,
        })?;
        Ok(Self {
            metric,
            selector,
            expressions,
            kind: None,
        })
    }

    /// The key as written back: `metric` or `metric{k:v,...}`.
    pub fn key(&self) -> String {
        render_threshold_key(&self.metric, &self.selector)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ThresholdOp {
    #[strum(serialize = "<")]
    Lt,
    #[strum(serialize = "<=")]
    Lte,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = ">=")]
    Gte,
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = "!=")]
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Count,
    Rate,
    Avg,
    Min,
    Max,
    Med,
    P(f64),
}

impl ThresholdAgg {
    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Self::Count | Self::Rate => true,
            Self::Avg | Self::Min | Self::Max | Self::Med | Self::P(_) => kind == MetricKind::Trend,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdVerdict {
    pub metric: String,
    pub selector: Vec<(String, String)>,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

impl ThresholdVerdict {
    pub fn key(&self) -> String {
        render_threshold_key(&self.metric, &self.selector)
    }
}

pub fn render_threshold_key(metric: &str, selector: &[(String, String)]) -> String {
    if selector.is_empty() {
        return metric.to_string();
    }
    let inner: Vec<String> = selector.iter().map(|(k, v)| format!("{k}:{v}")).collect();
    format!("{metric}{{{}}}", inner.join(","))
}

/// Splits `name{k:v,k2=v2}` into the metric name and a sorted selector.
pub fn parse_threshold_key(raw: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let raw = raw.trim();
    let Some(open) = raw.find('{') else {
        if raw.is_empty() || raw.contains('}') {
            return Err(format!("invalid metric name: `{raw}`"));
        }
        return Ok((raw.to_string(), Vec::new()));
    };

    let name = raw[..open].trim();
    let rest = &raw[open + 1..];
    let inner = rest
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag selector: `{raw}`"))?;
    if name.is_empty() {
        return Err(format!("missing metric name: `{raw}`"));
    }

    let mut selector = Vec::new();
    for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = part
            .split_once(':')
            .or_else(|| part.split_once('='))
            .ok_or_else(|| format!("invalid tag filter `{part}` in `{raw}`"))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() {
            return Err(format!("empty tag name in `{raw}`"));
        }
        selector.push((k.to_string(), v.to_string()));
    }
    selector.sort();
    Ok((name.to_string(), selector))
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` is not read as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("!=", ThresholdOp::Ne),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = match left.to_ascii_lowercase().as_str() {
        "count" => ThresholdAgg::Count,
        "rate" => ThresholdAgg::Rate,
        "avg" => ThresholdAgg::Avg,
        "min" => ThresholdAgg::Min,
        "max" => ThresholdAgg::Max,
        "med" => ThresholdAgg::Med,
        other => {
            let inner = other
                .strip_prefix("p(")
                .and_then(|v| v.strip_suffix(')'))
                .ok_or_else(|| format!("unknown aggregation `{left}` in threshold: {raw}"))?;
            let p: f64 = inner
                .parse()
                .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
            if !(p > 0.0 && p <= 100.0) {
                return Err(format!("percentile out of range in threshold: {raw}"));
            }
            ThresholdAgg::P(p)
        }
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;
    if !value.is_finite() {
        return Err(format!("invalid numeric value in threshold: {raw}"));
    }

    Ok(ThresholdExpr { agg, op, value })
}

/// Checks every set against the metrics a run can produce and records each metric's kind.
/// Runs before any traffic.
pub fn validate_thresholds(sets: &mut [ThresholdSet], catalog: &MetricCatalog) -> Result<()> {
    for set in sets {
        let kind = *catalog
            .get(&set.metric)
            .ok_or_else(|| Error::UnknownMetric(set.metric.clone()))?;
        set.kind = Some(kind);

        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(|error| Error::InvalidThreshold {
                metric: set.key(),
                error,
            })?;
            if !expr.agg.applies_to(kind) {
                return Err(Error::InvalidThreshold {
                    metric: set.key(),
                    error: format!("`{raw}` does not apply to a {kind} metric"),
                });
            }
        }
    }
    Ok(())
}

/// Evaluates every expression against the frozen snapshot.
///
/// A validated metric that was never recorded is read as an empty series of its kind: counts
/// are zero, rates and trend statistics are undefined and fail.
pub fn evaluate_thresholds(
    snapshot: &Snapshot,
    sets: &[ThresholdSet],
    elapsed: Duration,
) -> Result<Vec<ThresholdVerdict>> {
    let mut out = Vec::new();
    for set in sets {
        let agg = snapshot
            .aggregate(&set.metric, &set.selector)
            .or_else(|| set.kind.map(Aggregate::empty));
        for raw in &set.expressions {
            let expr = parse_threshold_expr(raw).map_err(|error| Error::InvalidThreshold {
                metric: set.key(),
                error,
            })?;
            let observed = agg
                .as_ref()
                .and_then(|a| observed_value(a, &expr.agg, elapsed));
            let passed = observed.is_some_and(|v| compare(v, expr.op, expr.value));
            out.push(ThresholdVerdict {
                metric: set.metric.clone(),
                selector: set.selector.clone(),
                expression: raw.clone(),
                observed,
                passed,
            });
        }
    }
    Ok(out)
}

fn observed_value(agg: &Aggregate, which: &ThresholdAgg, elapsed: Duration) -> Option<f64> {
    match which {
        ThresholdAgg::Count => Some(agg.count() as f64),
        ThresholdAgg::Rate => match agg.kind() {
            MetricKind::Counter => agg.per_second(elapsed),
            _ => agg.rate(),
        },
        ThresholdAgg::Avg => agg.avg(),
        ThresholdAgg::Min => agg.min(),
        ThresholdAgg::Max => agg.max(),
        ThresholdAgg::Med => agg.med(),
        ThresholdAgg::P(p) => agg.percentile(*p),
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => (observed - expected).abs() <= f64::EPSILON,
        ThresholdOp::Ne => (observed - expected).abs() > f64::EPSILON,
    }
}
