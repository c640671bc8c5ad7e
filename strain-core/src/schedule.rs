use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current: f64,
}

/// Piecewise-linear timeline: each stage ramps from the previous target to its own.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    /// Zero-length stages are dropped; the following stage ramps from the last kept target.
    pub fn new(start: u64, stages: &[Stage]) -> Self {
        let stages: Vec<Stage> = stages
            .iter()
            .copied()
            .filter(|s| !s.duration.is_zero())
            .collect();

        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    fn stage_index(&self, elapsed: Duration) -> usize {
        // Boundaries belong to the stage that ends there.
        match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) | Err(i) => i.min(self.stages.len().saturating_sub(1)),
        }
    }

    fn bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Continuously interpolated level at `elapsed`.
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        if self.stages.is_empty() {
            return self.start as f64;
        }
        if elapsed >= self.total_duration() {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start) as f64;
        }

        let (stage_start, stage_end, from, to) = self.bounds(self.stage_index(elapsed));
        let span = stage_end.saturating_sub(stage_start).as_secs_f64();
        if span <= 0.0 {
            return to as f64;
        }
        let frac = (elapsed.saturating_sub(stage_start).as_secs_f64() / span).clamp(0.0, 1.0);
        from as f64 + (to as f64 - from as f64) * frac
    }

    /// Whole-worker level at `elapsed` (the interpolated value rounded down).
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        // Tolerate float noise right at integer crossings.
        (self.value_at(elapsed) + 1e-9).floor().max(0.0) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        if self.stages.is_empty() {
            return None;
        }

        let clamped = elapsed.min(self.total_duration());
        let index = self.stage_index(clamped);
        let (stage_start, stage_end, start_target, end_target) = self.bounds(index);
        let stage_elapsed = clamped.saturating_sub(stage_start);

        Some(StageSnapshot {
            index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_end.saturating_sub(clamped),
            start_target,
            end_target,
            current: self.value_at(clamped),
        })
    }

    /// How long an inactive worker `vu` (1-based) may sleep before re-checking the ramp.
    pub fn next_recheck_in(&self, elapsed: Duration, vu: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        if self.stages.is_empty() {
            return default_sleep;
        }
        if self.is_done(elapsed) {
            return Duration::ZERO;
        }
        if vu <= self.target_at(elapsed) {
            return Duration::ZERO;
        }

        let idx = self.stage_index(elapsed);
        let (stage_start, stage_end, from, to) = self.bounds(idx);
        if to <= from || vu > to {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        // Solve from + (to - from) * t / span >= vu for t.
        let span = stage_end.saturating_sub(stage_start).as_secs_f64();
        let needed = (vu as f64 - from as f64) * span / (to as f64 - from as f64);
        let wait = (needed - elapsed.saturating_sub(stage_start).as_secs_f64()).max(0.0);
        Duration::from_secs_f64(wait).min(default_sleep)
    }
}
