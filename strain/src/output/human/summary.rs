use std::fmt::Write as _;

use strain_core::RunSummary;
use strain_core::metrics::TAG_SCENARIO;
use strain_core::strain_metrics::{Aggregate, MetricKind};

use super::format::*;
use crate::output::{Headline, status_label};

const BANNER: &str = "================== LOAD TEST SUMMARY ==================";
const RULE: &str = "=======================================================";

pub(crate) fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let head = Headline::from_summary(summary);

    out.push('\n');
    writeln!(&mut out, "{BANNER}").ok();
    writeln!(&mut out, "Total requests: {}", head.requests_total).ok();
    writeln!(&mut out, "Request rate: {:.2} req/s", head.request_rate).ok();
    match head.failed_rate {
        Some(rate) => writeln!(&mut out, "Failed requests: {rate:.4}").ok(),
        None => writeln!(&mut out, "Failed requests: n/a").ok(),
    };
    out.push_str("\nLatency:\n");
    writeln!(&mut out, "  p50: {}", format_ms_opt(head.p50)).ok();
    writeln!(&mut out, "  p95: {}", format_ms_opt(head.p95)).ok();
    writeln!(&mut out, "  p99: {}", format_ms_opt(head.p99)).ok();
    writeln!(&mut out, "{RULE}").ok();
    out.push('\n');

    if !summary.scenarios.is_empty() {
        out.push_str("scenarios\n");
        for s in &summary.scenarios {
            writeln!(
                &mut out,
                "  {} (exec={}): {} iterations={} dropped={}",
                s.name,
                s.exec,
                status_label(&s.status),
                s.iterations,
                s.dropped
            )
            .ok();
        }
    }

    render_metrics(summary, &mut out);
    render_thresholds(summary, &mut out);

    out
}

fn render_metrics(summary: &RunSummary, out: &mut String) {
    let metrics = summary.metrics.metrics();
    if metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    for (name, _) in metrics {
        let Some(agg) = summary.metrics.aggregate(name, &[]) else {
            continue;
        };
        writeln!(out, "  {name} = {}", describe(&agg, summary)).ok();

        // Per-scenario breakdown only when more than one scenario recorded the metric.
        let per_scenario: Vec<_> = summary
            .metrics
            .series_of(name)
            .filter_map(|s| {
                s.tags
                    .iter()
                    .find(|(k, _)| k == TAG_SCENARIO)
                    .map(|(_, v)| v.clone())
            })
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if per_scenario.len() < 2 {
            continue;
        }
        for scenario in per_scenario {
            let selector = [(TAG_SCENARIO.to_string(), scenario)];
            if let Some(agg) = summary.metrics.aggregate(name, &selector) {
                let tags = format_tags_inline(&selector, &[]);
                writeln!(out, "    {tags} = {}", describe(&agg, summary)).ok();
            }
        }
    }
}

fn describe(agg: &Aggregate, summary: &RunSummary) -> String {
    match agg.kind() {
        MetricKind::Counter => {
            let per_sec = agg.per_second(summary.elapsed).unwrap_or(0.0);
            format!("{} ({}/s)", agg.count(), format_rate(per_sec))
        }
        MetricKind::Rate => match agg.rate() {
            Some(rate) => {
                let hits = (rate * agg.count() as f64).round();
                format!(
                    "{:.2}% ({} of {})",
                    rate * 100.0,
                    format_number(hits),
                    agg.count()
                )
            }
            None => "n/a".to_string(),
        },
        MetricKind::Trend => match agg.trend_summary() {
            Some(t) if t.count > 0 => format!(
                "avg={} min={} med={} max={} p90={} p95={} p99={} (n={})",
                format_ms_opt(t.avg),
                format_ms_opt(t.min),
                format_ms_opt(t.med),
                format_ms_opt(t.max),
                format_ms_opt(t.p90),
                format_ms_opt(t.p95),
                format_ms_opt(t.p99),
                t.count
            ),
            _ => "n/a".to_string(),
        },
    }
}

fn render_thresholds(summary: &RunSummary, out: &mut String) {
    if summary.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for v in &summary.thresholds {
        let status = if v.passed { "OK" } else { "FAIL" };
        let observed = v
            .observed
            .map(format_number)
            .unwrap_or_else(|| "no data".to_string());
        writeln!(
            out,
            "  [{status}] {}: {} (observed {observed})",
            v.key(),
            v.expression
        )
        .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use strain_core::strain_metrics::Registry;
    use strain_core::thresholds::ThresholdSet;
    use strain_core::{RunOutcome, ScenarioOutcome, ScenarioStatus};

    fn summary_with(reg: &Registry, rules: &[ThresholdSet]) -> RunSummary {
        let outcome = RunOutcome {
            elapsed: Duration::from_secs(10),
            scenarios: vec![ScenarioOutcome {
                name: "cpu_saturation".to_string(),
                exec: "cpu_heavy".to_string(),
                status: ScenarioStatus::Completed,
                iterations: 20,
                dropped: 0,
            }],
        };
        RunSummary::build(outcome, reg.snapshot(), rules).unwrap_or_else(|e| panic!("{e}"))
    }

    fn record(reg: &Registry, name: &str, kind: MetricKind, value: f64, scenario: &str) {
        reg.record(name, kind, value, &[("scenario", scenario)])
            .unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn digest_follows_the_banner_layout() {
        let reg = Registry::default();
        for i in 0..20 {
            record(&reg, "http_reqs", MetricKind::Counter, 1.0, "cpu_saturation");
            record(&reg, "http_req_failed", MetricKind::Rate, f64::from(u8::from(i == 0)), "cpu_saturation");
            record(&reg, "http_req_duration", MetricKind::Trend, 100.0, "cpu_saturation");
        }
        let rules = vec![
            ThresholdSet::from_key("http_req_failed", vec!["rate<0.15".to_string()])
                .unwrap_or_else(|e| panic!("{e}")),
        ];

        let text = render(&summary_with(&reg, &rules));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], BANNER);
        assert_eq!(lines[2], "Total requests: 20");
        assert_eq!(lines[3], "Request rate: 2.00 req/s");
        assert_eq!(lines[4], "Failed requests: 0.0500");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "Latency:");
        assert!(lines[7].starts_with("  p50: 100."), "{}", lines[7]);
        assert_eq!(lines[10], RULE);

        assert!(text.contains("cpu_saturation (exec=cpu_heavy): completed iterations=20 dropped=0"));
        assert!(text.contains("http_reqs = 20 (2/s)"));
        assert!(text.contains("http_req_failed = 5.00% (1 of 20)"));
        assert!(text.contains("[OK] http_req_failed: rate<0.15 (observed 0.0500)"));
    }

    #[test]
    fn empty_run_renders_placeholders() {
        let reg = Registry::default();
        let rules = vec![
            ThresholdSet::from_key("http_req_duration", vec!["p(95)<3000".to_string()])
                .unwrap_or_else(|e| panic!("{e}")),
        ];

        let text = render(&summary_with(&reg, &rules));
        assert!(text.contains("Total requests: 0"));
        assert!(text.contains("Failed requests: n/a"));
        assert!(text.contains("  p95: n/a"));
        assert!(text.contains("[FAIL] http_req_duration: p(95)<3000 (observed no data)"));
    }

    #[test]
    fn metrics_break_down_by_scenario_when_shared() {
        let reg = Registry::default();
        record(&reg, "iterations", MetricKind::Counter, 3.0, "a");
        record(&reg, "iterations", MetricKind::Counter, 7.0, "b");

        let text = render(&summary_with(&reg, &[]));
        assert!(text.contains("  iterations = 10 (1/s)"));
        assert!(text.contains("    {scenario=a} = 3 (0/s)"));
        assert!(text.contains("    {scenario=b} = 7 (1/s)"));
    }
}
