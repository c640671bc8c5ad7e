use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::workload::{ThinkTime, WorkloadSet};

pub const DEFAULT_GRACEFUL_RAMP_DOWN: Duration = Duration::from_secs(30);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum ExecutorKind {
    #[strum(serialize = "ramping-vus", serialize = "closed-loop")]
    RampingVus,
    #[strum(serialize = "constant-vus", serialize = "constant")]
    ConstantVus,
    #[strum(
        serialize = "ramping-arrival-rate",
        serialize = "open-loop",
        serialize = "ramping-rps"
    )]
    RampingArrivalRate,
}

/// Scenario definition as written by the user, before defaults and validation.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptions {
    pub name: String,
    pub exec: Option<String>,
    pub executor: Option<String>,
    pub start_vus: Option<u64>,
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub stages: Vec<Stage>,
    pub start_rate: Option<u64>,
    pub time_unit: Option<Duration>,
    pub pre_allocated_vus: Option<u64>,
    pub max_vus: Option<u64>,
    pub start_time: Option<Duration>,
    pub graceful_ramp_down: Option<Duration>,
    pub graceful_stop: Option<Duration>,
    pub tags: Vec<(String, String)>,
    pub think_time: Option<ThinkTime>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Executor {
    /// Ramping virtual users; the worker count follows `stages`.
    ClosedLoop {
        start_vus: u64,
        stages: Vec<Stage>,
        graceful_ramp_down: Duration,
    },
    /// Ramping arrival rate; iterations per `time_unit` follow `stages`.
    OpenLoop {
        start_rate: u64,
        time_unit: Duration,
        pre_allocated_vus: u64,
        max_vus: u64,
        stages: Vec<Stage>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioConfig {
    pub name: String,
    pub exec: String,
    pub executor: Executor,
    pub start_offset: Duration,
    pub graceful_stop: Duration,
    pub tags: Vec<(String, String)>,
    pub think_time: Option<ThinkTime>,
}

impl ScenarioConfig {
    pub fn stages(&self) -> &[Stage] {
        match &self.executor {
            Executor::ClosedLoop { stages, .. } | Executor::OpenLoop { stages, .. } => stages,
        }
    }

    pub fn timeline(&self) -> Duration {
        self.stages()
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration))
    }

    /// Number of workers spawned for the scenario.
    pub fn max_workers(&self) -> u64 {
        match &self.executor {
            Executor::ClosedLoop {
                start_vus, stages, ..
            } => stages
                .iter()
                .map(|s| s.target)
                .max()
                .unwrap_or(0)
                .max(*start_vus),
            Executor::OpenLoop { max_vus, .. } => *max_vus,
        }
    }

    pub fn is_open_loop(&self) -> bool {
        matches!(self.executor, Executor::OpenLoop { .. })
    }
}

fn non_empty_stages(name: &str, stages: Vec<Stage>) -> Result<Vec<Stage>> {
    if stages.is_empty() {
        return Err(Error::InvalidStages(name.to_string()));
    }
    let kept: Vec<Stage> = stages
        .into_iter()
        .filter(|s| !s.duration.is_zero())
        .collect();
    if kept.is_empty() {
        return Err(Error::EmptyTimeline(name.to_string()));
    }
    Ok(kept)
}

/// Applies defaults and validates every scenario. Nothing here touches the network.
pub fn scenarios_from_options(
    opts: Vec<ScenarioOptions>,
    workloads: &WorkloadSet,
) -> Result<Vec<ScenarioConfig>> {
    if opts.is_empty() {
        return Err(Error::NoScenarios);
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(opts.len());
    for s in opts {
        if !seen.insert(s.name.clone()) {
            return Err(Error::DuplicateScenario(s.name));
        }

        let exec = s.exec.clone().unwrap_or_else(|| s.name.clone());
        if !workloads.contains(&exec) {
            return Err(Error::UnknownWorkload {
                scenario: s.name,
                exec,
            });
        }

        let executor_name = s.executor.as_deref().unwrap_or("ramping-vus");
        let kind: ExecutorKind =
            executor_name
                .parse()
                .map_err(|_| Error::InvalidExecutor {
                    scenario: s.name.clone(),
                    executor: executor_name.to_string(),
                })?;

        let executor = match kind {
            ExecutorKind::ConstantVus => {
                let vus = s.vus.unwrap_or(1);
                if vus == 0 {
                    return Err(Error::InvalidVus(s.name));
                }
                let duration = s
                    .duration
                    .filter(|d| !d.is_zero())
                    .ok_or_else(|| Error::MissingDuration(s.name.clone()))?;
                Executor::ClosedLoop {
                    start_vus: vus,
                    stages: vec![Stage::new(duration, vus)],
                    graceful_ramp_down: s
                        .graceful_ramp_down
                        .unwrap_or(DEFAULT_GRACEFUL_RAMP_DOWN),
                }
            }
            ExecutorKind::RampingVus => {
                let stages = non_empty_stages(&s.name, s.stages.clone())?;
                let start_vus = s.start_vus.unwrap_or(0);
                let peak = stages
                    .iter()
                    .map(|st| st.target)
                    .max()
                    .unwrap_or(0)
                    .max(start_vus);
                if peak == 0 {
                    return Err(Error::InvalidVus(s.name));
                }
                Executor::ClosedLoop {
                    start_vus,
                    stages,
                    graceful_ramp_down: s
                        .graceful_ramp_down
                        .unwrap_or(DEFAULT_GRACEFUL_RAMP_DOWN),
                }
            }
            ExecutorKind::RampingArrivalRate => {
                let stages = non_empty_stages(&s.name, s.stages.clone())?;
                let time_unit = s.time_unit.unwrap_or(DEFAULT_TIME_UNIT);
                if time_unit.is_zero() {
                    return Err(Error::InvalidTimeUnit(s.name));
                }
                let pre_allocated_vus = s.pre_allocated_vus.unwrap_or(1);
                if pre_allocated_vus == 0 {
                    return Err(Error::InvalidPreAllocatedVus(s.name));
                }
                let max_vus = s.max_vus.unwrap_or(pre_allocated_vus);
                if max_vus < pre_allocated_vus {
                    return Err(Error::InvalidMaxVus(s.name));
                }
                Executor::OpenLoop {
                    start_rate: s.start_rate.unwrap_or(0),
                    time_unit,
                    pre_allocated_vus,
                    max_vus,
                    stages,
                }
            }
        };

        out.push(ScenarioConfig {
            name: s.name,
            exec,
            executor,
            start_offset: s.start_time.unwrap_or(Duration::ZERO),
            graceful_stop: s.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            tags: s.tags,
            think_time: s.think_time,
        });
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ramping(name: &str, stages: Vec<Stage>) -> ScenarioOptions {
        ScenarioOptions {
            name: name.to_string(),
            exec: Some("cpu_heavy".to_string()),
            executor: Some("ramping-vus".to_string()),
            stages,
            ..Default::default()
        }
    }

    #[test]
    fn executor_aliases_parse() {
        assert_eq!("closed-loop".parse::<ExecutorKind>().ok(), Some(ExecutorKind::RampingVus));
        assert_eq!(
            "open-loop".parse::<ExecutorKind>().ok(),
            Some(ExecutorKind::RampingArrivalRate)
        );
        assert_eq!("constant".parse::<ExecutorKind>().ok(), Some(ExecutorKind::ConstantVus));
        assert!("per-vu-iterations".parse::<ExecutorKind>().is_err());
    }

    #[test]
    fn zero_duration_stages_are_removed() {
        let workloads = WorkloadSet::builtin();
        let out = scenarios_from_options(
            vec![ramping(
                "a",
                vec![
                    Stage::new(secs(10), 5),
                    Stage::new(Duration::ZERO, 50),
                    Stage::new(secs(10), 0),
                ],
            )],
            &workloads,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(out[0].stages().len(), 2);
        assert_eq!(out[0].timeline(), secs(20));
        assert_eq!(out[0].max_workers(), 5);
        assert_eq!(out[0].graceful_stop, DEFAULT_GRACEFUL_STOP);
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let workloads = WorkloadSet::builtin();
        let check = |opts: ScenarioOptions| scenarios_from_options(vec![opts], &workloads);

        assert!(matches!(check(ramping("a", vec![])), Err(Error::InvalidStages(_))));
        assert!(matches!(
            check(ramping("a", vec![Stage::new(Duration::ZERO, 5)])),
            Err(Error::EmptyTimeline(_))
        ));
        assert!(matches!(
            check(ramping("a", vec![Stage::new(secs(1), 0)])),
            Err(Error::InvalidVus(_))
        ));

        let mut bad_exec = ramping("a", vec![Stage::new(secs(1), 1)]);
        bad_exec.exec = Some("nope".to_string());
        assert!(matches!(check(bad_exec), Err(Error::UnknownWorkload { .. })));

        let mut bad_executor = ramping("a", vec![Stage::new(secs(1), 1)]);
        bad_executor.executor = Some("shared-iterations".to_string());
        assert!(matches!(check(bad_executor), Err(Error::InvalidExecutor { .. })));

        let open = ScenarioOptions {
            name: "o".to_string(),
            exec: Some("mixed_load".to_string()),
            executor: Some("ramping-arrival-rate".to_string()),
            stages: vec![Stage::new(secs(1), 10)],
            pre_allocated_vus: Some(10),
            max_vus: Some(5),
            ..Default::default()
        };
        assert!(matches!(check(open.clone()), Err(Error::InvalidMaxVus(_))));

        let zero_unit = ScenarioOptions {
            time_unit: Some(Duration::ZERO),
            max_vus: Some(10),
            ..open
        };
        assert!(matches!(check(zero_unit), Err(Error::InvalidTimeUnit(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let workloads = WorkloadSet::builtin();
        let a = ramping("a", vec![Stage::new(secs(1), 1)]);
        let err = scenarios_from_options(vec![a.clone(), a], &workloads);
        assert!(matches!(err, Err(Error::DuplicateScenario(_))));
    }

    #[test]
    fn constant_vus_desugars_to_a_single_stage() {
        let workloads = WorkloadSet::builtin();
        let out = scenarios_from_options(
            vec![ScenarioOptions {
                name: "c".to_string(),
                exec: Some("db_heavy".to_string()),
                executor: Some("constant-vus".to_string()),
                vus: Some(3),
                duration: Some(secs(5)),
                ..Default::default()
            }],
            &workloads,
        )
        .unwrap_or_else(|e| panic!("{e}"));

        assert_eq!(
            out[0].executor,
            Executor::ClosedLoop {
                start_vus: 3,
                stages: vec![Stage::new(secs(5), 3)],
                graceful_ramp_down: DEFAULT_GRACEFUL_RAMP_DOWN,
            }
        );
    }
}
