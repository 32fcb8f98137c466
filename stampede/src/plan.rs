//! Ramp schedule types.
//!
//! A [`RampPlan`] is an ordered list of [`Stage`]s. Each stage ramps the
//! virtual-user target linearly from the previous stage's target (0 before
//! the first stage) to its own target over its duration, so a
//! `(2m, 100), (5m, 100)` plan ramps up over two minutes and then holds.
use std::fmt;
use std::time::Duration;

/// One step of the ramp schedule: ramp to `target` virtual users over
/// `duration`, starting from wherever the previous stage left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Ordered ramp schedule driving the virtual-user count over the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RampPlan {
    stages: Vec<Stage>,
}

impl RampPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn stage(mut self, duration: Duration, target: u32) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest target any stage ramps toward.
    pub fn max_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Target virtual-user count at `elapsed`, linearly interpolated within
    /// the current stage and rounded to nearest. `None` once the plan is
    /// exhausted (or was empty to begin with).
    pub fn target_at(&self, elapsed: Duration) -> Option<u32> {
        let mut stage_start = Duration::ZERO;
        let mut prev_target = 0u32;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            // A zero-length stage never matches here; it only moves
            // `prev_target`, i.e. an instant jump seen by the next stage.
            if elapsed < stage_end {
                let frac = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let from = f64::from(prev_target);
                let to = f64::from(stage.target);
                return Some((from + (to - from) * frac).round() as u32);
            }
            prev_target = stage.target;
            stage_start = stage_end;
        }

        None
    }
}

impl fmt::Display for RampPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for stage in &self.stages {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(
                f,
                "{} -> {}",
                humantime::format_duration(stage.duration),
                stage.target
            )?;
        }
        Ok(())
    }
}
