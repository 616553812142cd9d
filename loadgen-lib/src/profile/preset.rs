use std::{fmt, str::FromStr, time::Duration};

use super::{ArrivalRate, ArrivalRateSpec, Interpolation, LoadProfile, Stage, StageRamp};

/// Named, ready to use load profiles.
///
/// Each preset is a valid profile by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfilePreset {
    /// Ramp up to 5 workers, hold for 10s and ramp down again, 20s in total.
    RampUpDown,
    /// 3 workers for 5 minutes.
    Steady,
    /// 10 stages of 30s, adding 100 workers every stage.
    StepIncrement,
    /// 100k iterations per second for 5 minutes,
    /// starting from 3 workers and growing up to 5.
    ///
    /// Such a small pool cannot sustain that rate for most targets,
    /// which makes this a useful probe for the throughput ceiling.
    #[default]
    ConstantArrivalRate,
}

impl ProfilePreset {
    pub const ALL: [ProfilePreset; 4] = [
        ProfilePreset::RampUpDown,
        ProfilePreset::Steady,
        ProfilePreset::StepIncrement,
        ProfilePreset::ConstantArrivalRate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProfilePreset::RampUpDown => "ramp-up-down",
            ProfilePreset::Steady => "steady",
            ProfilePreset::StepIncrement => "step-increment",
            ProfilePreset::ConstantArrivalRate => "constant-arrival-rate",
        }
    }

    pub fn profile(self) -> LoadProfile {
        match self {
            ProfilePreset::RampUpDown => stepwise(vec![
                Stage::new(Duration::from_secs(5), 5),
                Stage::new(Duration::from_secs(10), 5),
                Stage::new(Duration::from_secs(5), 0),
            ]),
            ProfilePreset::Steady => stepwise(vec![Stage::new(Duration::from_mins(5), 3)]),
            ProfilePreset::StepIncrement => {
                stepwise(step_increment(Duration::from_secs(30), 100, 10))
            }
            ProfilePreset::ConstantArrivalRate => {
                let spec = ArrivalRateSpec {
                    rate: 100_000.,
                    time_unit: Duration::from_secs(1),
                    duration: Duration::from_mins(5),
                    pre_allocated: 3,
                    max_workers: 5,
                };
                LoadProfile::ArrivalRate(ArrivalRate {
                    spec,
                    schedule: super::ArrivalSchedule {
                        micros_per_unit: 100_000 * super::RATE_SCALE as u128,
                        unit_nanos: spec.time_unit.as_nanos(),
                    },
                })
            }
        }
    }
}

fn stepwise(stages: Vec<Stage>) -> LoadProfile {
    LoadProfile::StageRamp(StageRamp::from_valid_stages(stages, Interpolation::Step))
}

/// `count` stages of `duration` each, adding `step` to the target every stage.
///
/// Returns no stages if `count` is zero, which is rejected as an
/// empty ramp by [`LoadProfile::stage_ramp`].
pub fn step_increment(duration: Duration, step: usize, count: usize) -> Vec<Stage> {
    (1..=count)
        .map(|i| Stage::new(duration, step.saturating_mul(i)))
        .collect()
}

impl fmt::Display for ProfilePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|preset| preset.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<_> = Self::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown preset '{s}', expected one of: {}", names.join(", "))
            })
    }
}
