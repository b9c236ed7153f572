use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One ramp step: reach `target` VUs by the end of `duration`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(deserialize_with = "crate::duration::deserialize")]
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProfile {
    start_vus: u64,
    stages: Vec<Stage>,
}

impl LoadProfile {
    pub fn new(start_vus: u64, stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::InvalidProfile("at least one stage is required".to_string()));
        }
        let profile = Self { start_vus, stages };
        if profile.total_duration().is_zero() {
            return Err(Error::InvalidProfile("total stage duration must be positive".to_string()));
        }
        Ok(profile)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_vus(&self) -> u64 {
        self.start_vus
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    pub fn max_vus(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_vus, u64::max)
    }

    /// Target VU count `elapsed` into the run, interpolated linearly between
    /// the previous target and the current stage's target.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let value = from as f64 + (stage.target as f64 - from as f64) * progress;
                return value.round() as u64;
            }
            from = stage.target;
            stage_start = stage_end;
        }

        from
    }
}
