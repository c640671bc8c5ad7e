use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use strain_core::chaos::FaultInjectionConfig;
use strain_core::config::{ScenarioOptions, Stage};
use strain_core::thresholds::ThresholdSet;
use strain_core::workload::ThinkTime;

pub(crate) const DEFAULT_RUN_PLAN: &str = include_str!("../plans/stress.yaml");
pub(crate) const DEFAULT_CHAOS_PLAN: &str = include_str!("../plans/chaos.yaml");

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ScenarioYaml {
    /// Scenario name (metrics scenario tag).
    pub name: String,

    /// Workload name; defaults to the scenario name.
    #[serde(default)]
    pub exec: Option<String>,

    /// Scenario-level tags.
    #[serde(default, deserialize_with = "deserialize_tags")]
    pub tags: BTreeMap<String, String>,

    /// Executor kind: constant-vus | ramping-vus | ramping-arrival-rate
    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default)]
    pub vus: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    // ramping-vus
    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub graceful_ramp_down: Option<YamlDuration>,

    // ramping-arrival-rate
    #[serde(default)]
    pub start_rate: Option<u64>,

    #[serde(default)]
    pub time_unit: Option<YamlDuration>,

    #[serde(rename = "preAllocatedVUs", default)]
    pub pre_allocated_vus: Option<u64>,

    #[serde(rename = "maxVUs", default)]
    pub max_vus: Option<u64>,

    #[serde(default)]
    pub start_time: Option<YamlDuration>,

    #[serde(default)]
    pub graceful_stop: Option<YamlDuration>,

    /// Overrides the workload's own think-time.
    #[serde(default)]
    pub think_time: Option<ThinkTimeYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThinkTimeYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

impl ThinkTimeYaml {
    fn into_think_time(self) -> anyhow::Result<ThinkTime> {
        match self {
            Self::Fixed(d) => Ok(ThinkTime::fixed(d.into_inner())),
            Self::Range { min, max } => {
                let (min, max) = (min.into_inner(), max.into_inner());
                if min > max {
                    anyhow::bail!("thinkTime min ({min:?}) is greater than max ({max:?})");
                }
                Ok(ThinkTime::between(min, max))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s, 2m30s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v.unsigned_abs())))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_str(&v)
            }
        }

        deserializer.deserialize_any(V)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdExprYaml {
    One(String),
    Many(Vec<String>),
}

impl ThresholdExprYaml {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RunPlanYaml {
    scenarios: Vec<ScenarioYaml>,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,
}

fn default_elevated() -> FaultInjectionConfig {
    FaultInjectionConfig::ELEVATED
}

fn default_baseline() -> FaultInjectionConfig {
    FaultInjectionConfig::BASELINE
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ChaosPlanYaml {
    #[serde(default = "default_elevated")]
    elevated: FaultInjectionConfig,

    #[serde(default = "default_baseline")]
    baseline: FaultInjectionConfig,

    probe: ScenarioYaml,

    #[serde(default)]
    thresholds: BTreeMap<String, ThresholdExprYaml>,
}

fn deserialize_tags<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    let mut out = BTreeMap::new();

    for (k, v) in raw {
        let s = match v {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::String(s) => s,
            _ => continue,
        };
        out.insert(k, s);
    }

    Ok(out)
}

/// A load plan ready for validation by the core.
#[derive(Debug, Clone)]
pub(crate) struct RunPlan {
    pub scenarios: Vec<ScenarioOptions>,
    pub thresholds: Vec<ThresholdSet>,
}

#[derive(Debug, Clone)]
pub(crate) struct ChaosPlan {
    pub elevated: FaultInjectionConfig,
    pub baseline: FaultInjectionConfig,
    pub probe: ScenarioOptions,
    pub thresholds: Vec<ThresholdSet>,
}

impl ScenarioYaml {
    fn into_options(self) -> anyhow::Result<ScenarioOptions> {
        let think_time = self
            .think_time
            .map(ThinkTimeYaml::into_think_time)
            .transpose()
            .with_context(|| format!("scenario `{}`", self.name))?;

        Ok(ScenarioOptions {
            exec: self.exec,
            executor: self.executor,
            start_vus: self.start_vus,
            vus: self.vus,
            duration: self.duration.map(YamlDuration::into_inner),
            stages: self
                .stages
                .into_iter()
                .map(|s| Stage::new(s.duration.into_inner(), s.target))
                .collect(),
            start_rate: self.start_rate,
            time_unit: self.time_unit.map(YamlDuration::into_inner),
            pre_allocated_vus: self.pre_allocated_vus,
            max_vus: self.max_vus,
            start_time: self.start_time.map(YamlDuration::into_inner),
            graceful_ramp_down: self.graceful_ramp_down.map(YamlDuration::into_inner),
            graceful_stop: self.graceful_stop.map(YamlDuration::into_inner),
            tags: self.tags.into_iter().collect(),
            think_time,
            name: self.name,
        })
    }
}

fn threshold_sets(raw: BTreeMap<String, ThresholdExprYaml>) -> anyhow::Result<Vec<ThresholdSet>> {
    raw.into_iter()
        .map(|(key, exprs)| {
            ThresholdSet::from_key(&key, exprs.into_vec())
                .with_context(|| format!("invalid threshold key `{key}`"))
        })
        .collect()
}

pub(crate) fn parse_run_plan(yaml: &str, origin: &str) -> anyhow::Result<RunPlan> {
    let doc: RunPlanYaml =
        serde_yaml::from_str(yaml).with_context(|| format!("failed to parse plan: {origin}"))?;

    let scenarios = doc
        .scenarios
        .into_iter()
        .map(ScenarioYaml::into_options)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(RunPlan {
        scenarios,
        thresholds: threshold_sets(doc.thresholds)?,
    })
}

pub(crate) fn parse_chaos_plan(yaml: &str, origin: &str) -> anyhow::Result<ChaosPlan> {
    let doc: ChaosPlanYaml =
        serde_yaml::from_str(yaml).with_context(|| format!("failed to parse plan: {origin}"))?;

    Ok(ChaosPlan {
        elevated: doc.elevated,
        baseline: doc.baseline,
        probe: doc.probe.into_options()?,
        thresholds: threshold_sets(doc.thresholds)?,
    })
}

async fn read_plan(path: Option<&Path>, builtin: &'static str) -> anyhow::Result<(String, String)> {
    match path {
        Some(p) => {
            let text = tokio::fs::read_to_string(p)
                .await
                .with_context(|| format!("failed to read plan: {}", p.display()))?;
            Ok((text, p.display().to_string()))
        }
        None => Ok((builtin.to_string(), "<built-in>".to_string())),
    }
}

pub(crate) async fn load_run_plan(path: Option<&Path>) -> anyhow::Result<RunPlan> {
    let (text, origin) = read_plan(path, DEFAULT_RUN_PLAN).await?;
    parse_run_plan(&text, &origin)
}

pub(crate) async fn load_chaos_plan(path: Option<&Path>) -> anyhow::Result<ChaosPlan> {
    let (text, origin) = read_plan(path, DEFAULT_CHAOS_PLAN).await?;
    parse_chaos_plan(&text, &origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn builtin_run_plan_reproduces_the_stress_profile() {
        let plan = parse_run_plan(DEFAULT_RUN_PLAN, "builtin").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(plan.scenarios.len(), 3);

        let cpu = &plan.scenarios[0];
        assert_eq!(cpu.name, "cpu_saturation");
        assert_eq!(cpu.exec.as_deref(), Some("cpu_heavy"));
        assert_eq!(
            cpu.stages,
            vec![
                Stage::new(secs(30), 10),
                Stage::new(secs(60), 10),
                Stage::new(secs(30), 0)
            ]
        );
        assert_eq!(cpu.graceful_ramp_down, Some(secs(10)));

        let db = &plan.scenarios[1];
        assert_eq!(db.start_time, Some(secs(150)));

        let mixed = &plan.scenarios[2];
        assert_eq!(mixed.executor.as_deref(), Some("ramping-arrival-rate"));
        assert_eq!(mixed.start_rate, Some(10));
        assert_eq!(mixed.pre_allocated_vus, Some(50));
        assert_eq!(mixed.max_vus, Some(100));
        assert_eq!(mixed.start_time, Some(secs(300)));

        let keys: Vec<String> = plan.thresholds.iter().map(ThresholdSet::key).collect();
        assert_eq!(keys, ["errors", "http_req_duration", "http_req_failed"]);
        let duration = &plan.thresholds[1];
        assert_eq!(duration.expressions, ["p(95)<5000", "p(99)<10000"]);
    }

    #[test]
    fn builtin_chaos_plan_uses_the_documented_profiles() {
        let plan =
            parse_chaos_plan(DEFAULT_CHAOS_PLAN, "builtin").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(plan.elevated, FaultInjectionConfig::ELEVATED);
        assert_eq!(plan.baseline, FaultInjectionConfig::BASELINE);
        assert_eq!(plan.probe.exec.as_deref(), Some("external_probe"));
        assert_eq!(
            plan.probe.stages,
            vec![
                Stage::new(secs(30), 5),
                Stage::new(secs(60), 10),
                Stage::new(secs(30), 0)
            ]
        );
        assert_eq!(plan.thresholds[0].key(), "http_req_duration");
    }

    #[test]
    fn think_time_accepts_fixed_and_range_forms() {
        let yaml = r#"
scenarios:
  - name: a
    exec: cpu_heavy
    stages: [{ duration: 1s, target: 1 }]
    thinkTime: 250ms
  - name: b
    exec: db_heavy
    stages: [{ duration: 1s, target: 1 }]
    thinkTime: { min: 0s, max: 100ms }
thresholds:
  "checks{scenario:a}": rate>0.9
"#;
        let plan = parse_run_plan(yaml, "inline").unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(
            plan.scenarios[0].think_time,
            Some(ThinkTime::fixed(Duration::from_millis(250)))
        );
        assert_eq!(
            plan.scenarios[1].think_time,
            Some(ThinkTime::between(Duration::ZERO, Duration::from_millis(100)))
        );
        assert_eq!(
            plan.thresholds[0].selector,
            vec![("scenario".to_string(), "a".to_string())]
        );
        assert_eq!(plan.thresholds[0].expressions, ["rate>0.9"]);
    }

    #[test]
    fn malformed_plans_are_rejected() {
        let typo = "scenarios:\n  - name: a\n    stagez: []\n";
        assert!(parse_run_plan(typo, "inline").is_err());

        let bad_duration =
            "scenarios:\n  - name: a\n    stages: [{ duration: 10x, target: 1 }]\n";
        assert!(parse_run_plan(bad_duration, "inline").is_err());

        let bad_key = "scenarios: []\nthresholds:\n  \"http_reqs{oops\": count>0\n";
        assert!(parse_run_plan(bad_key, "inline").is_err());

        let inverted = "probe:\n  name: p\n  thinkTime: { min: 2s, max: 1s }\n";
        assert!(parse_chaos_plan(inverted, "inline").is_err());
    }
}
