//! Load profiles: what load to generate over time.
//!
//! A [`LoadProfile`] is either a [`StageRamp`], which drives a number of
//! concurrently looping workers, or an [`ArrivalRate`], which drives a number
//! of iterations started per unit of time independent of concurrency.
//!
//! Profiles can only be obtained validated, either through the constructors
//! in this module, the JSON configuration surface or a [`ProfilePreset`].

use std::{fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::utils::time::humantime_serde;

mod config;
mod preset;

pub use self::preset::{ProfilePreset, step_increment};

/// A fixed duration segment of a [`StageRamp`] with a fixed target concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub const fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// How the target concurrency moves within a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// The stage target applies from the first instant of the stage
    /// until its last one.
    #[default]
    Step,
    /// Move linearly from the previous stage target (0 for the first stage)
    /// to the stage target over the duration of the stage.
    Linear,
}

/// Ordered stages, traversed start to end exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRamp {
    stages: Vec<Stage>,
    interpolation: Interpolation,
    total: Duration,
}

impl StageRamp {
    pub fn try_new(stages: Vec<Stage>, interpolation: Interpolation) -> Result<Self, InvalidProfile> {
        if stages.is_empty() {
            return Err(InvalidProfile::EmptyStages);
        }
        if let Some(index) = stages.iter().position(|stage| stage.duration.is_zero()) {
            return Err(InvalidProfile::ZeroStageDuration { index });
        }
        Ok(Self::from_valid_stages(stages, interpolation))
    }

    /// Caller guarantees the stages are non-empty with non-zero durations.
    fn from_valid_stages(stages: Vec<Stage>, interpolation: Interpolation) -> Self {
        let total = stages
            .iter()
            .fold(Duration::ZERO, |acc, stage| acc.saturating_add(stage.duration));
        Self {
            stages,
            interpolation,
            total,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    /// Highest target of all stages, which bounds the worker pool.
    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .max()
            .unwrap_or_default()
    }

    /// Target concurrency at `elapsed` since the start of the run.
    ///
    /// Stages cover half-open intervals `[start, end)`, so an instant on a
    /// stage boundary belongs to the later stage. Returns `None` once the
    /// ramp is over.
    pub fn target_at(&self, elapsed: Duration) -> Option<usize> {
        let mut start = Duration::ZERO;
        let mut previous = 0;

        for stage in &self.stages {
            let end = start.saturating_add(stage.duration);
            if elapsed < end {
                return Some(match self.interpolation {
                    Interpolation::Step => stage.target,
                    Interpolation::Linear => {
                        lerp(previous, stage.target, elapsed - start, stage.duration)
                    }
                });
            }
            start = end;
            previous = stage.target;
        }

        None
    }
}

fn lerp(from: usize, to: usize, progress: Duration, span: Duration) -> usize {
    let (from, to) = (from as i128, to as i128);
    let value = from + (to - from) * progress.as_nanos() as i128 / span.as_nanos().max(1) as i128;
    value.max(0) as usize
}

/// Constant arrival rate parameters, as written by the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArrivalRateSpec {
    /// Iterations started per `time_unit`.
    ///
    /// Resolution is six decimals: the smallest rate is `0.000001` and rates
    /// with more decimals are rejected with [`InvalidProfile::RateTooPrecise`].
    pub rate: f64,
    #[serde(with = "humantime_serde", default = "default_time_unit")]
    pub time_unit: Duration,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(alias = "preAllocatedVUs")]
    pub pre_allocated: usize,
    #[serde(alias = "maxVUs")]
    pub max_workers: usize,
}

fn default_time_unit() -> Duration {
    Duration::from_secs(1)
}

/// Validated [`ArrivalRateSpec`] together with its dispatch schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalRate {
    spec: ArrivalRateSpec,
    schedule: ArrivalSchedule,
}

impl ArrivalRate {
    pub fn try_new(spec: ArrivalRateSpec) -> Result<Self, InvalidProfile> {
        if !spec.rate.is_finite() || spec.rate <= 0. {
            return Err(InvalidProfile::NonPositiveRate(spec.rate));
        }
        if spec.time_unit.is_zero() {
            return Err(InvalidProfile::ZeroTimeUnit);
        }
        if spec.duration.is_zero() {
            return Err(InvalidProfile::ZeroDuration);
        }
        if spec.max_workers == 0 {
            return Err(InvalidProfile::ZeroMaxWorkers);
        }
        if spec.pre_allocated > spec.max_workers {
            return Err(InvalidProfile::PreAllocatedExceedsMax {
                pre_allocated: spec.pre_allocated,
                max_workers: spec.max_workers,
            });
        }

        let schedule = ArrivalSchedule::try_new(spec.rate, spec.time_unit)?;

        Ok(Self { spec, schedule })
    }

    pub fn spec(&self) -> &ArrivalRateSpec {
        &self.spec
    }

    pub fn schedule(&self) -> ArrivalSchedule {
        self.schedule
    }
}

/// Maps elapsed time to the cumulative number of iterations due.
///
/// The rate is kept as a fixed-point number of micro-iterations per time
/// unit and the due count is always recomputed from the start of the run,
/// so fractional accrual carries over between ticks and there is no drift:
/// after exactly `N` time units `rate * N` iterations are due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalSchedule {
    micros_per_unit: u128,
    unit_nanos: u128,
}

const RATE_SCALE: f64 = 1_000_000.;

impl ArrivalSchedule {
    fn try_new(rate: f64, time_unit: Duration) -> Result<Self, InvalidProfile> {
        let exact = rate * RATE_SCALE;
        let scaled = exact.round();
        if !(1. ..=u64::MAX as f64).contains(&scaled) {
            return Err(InvalidProfile::RateOutOfRange(rate));
        }
        // allow for float noise such as 0.1 * 10^6, not for extra decimals
        if (exact - scaled).abs() > scaled * 1e-9 {
            return Err(InvalidProfile::RateTooPrecise(rate));
        }
        Ok(Self {
            micros_per_unit: scaled as u128,
            unit_nanos: time_unit.as_nanos(),
        })
    }

    /// Number of iterations that should have been started by `elapsed`.
    pub fn due_at(&self, elapsed: Duration) -> u64 {
        let Some(accrued) = self.micros_per_unit.checked_mul(elapsed.as_nanos()) else {
            return u64::MAX;
        };
        let due = accrued / (self.unit_nanos * RATE_SCALE as u128);
        u64::try_from(due).unwrap_or(u64::MAX)
    }
}

/// A validated load profile, exactly one variant active per run.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadProfile {
    StageRamp(StageRamp),
    ArrivalRate(ArrivalRate),
}

impl LoadProfile {
    /// Stepwise stage ramp.
    pub fn stage_ramp(stages: Vec<Stage>) -> Result<Self, InvalidProfile> {
        StageRamp::try_new(stages, Interpolation::Step).map(Self::StageRamp)
    }

    pub fn arrival_rate(spec: ArrivalRateSpec) -> Result<Self, InvalidProfile> {
        ArrivalRate::try_new(spec).map(Self::ArrivalRate)
    }

    pub fn from_json_str(s: &str) -> Result<Self, InvalidProfile> {
        serde_json::from_str::<config::ProfileConfig>(s)
            .map_err(|err| InvalidProfile::Malformed(err.to_string()))?
            .try_into()
    }

    pub fn from_json_slice(b: &[u8]) -> Result<Self, InvalidProfile> {
        serde_json::from_slice::<config::ProfileConfig>(b)
            .map_err(|err| InvalidProfile::Malformed(err.to_string()))?
            .try_into()
    }

    pub fn load_file(path: &Path) -> Result<Self, InvalidProfile> {
        let raw = std::fs::read(path).map_err(|err| {
            InvalidProfile::Unreadable(format!("read '{}': {err}", path.display()))
        })?;
        Self::from_json_slice(&raw)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&config::ProfileConfig::from(self))
    }

    /// Total declared duration: the sum of all stage durations or
    /// the arrival rate duration.
    pub fn total_duration(&self) -> Duration {
        match self {
            LoadProfile::StageRamp(ramp) => ramp.total_duration(),
            LoadProfile::ArrivalRate(arrival) => arrival.spec.duration,
        }
    }

    /// Upper bound of the worker pool for this profile.
    pub fn max_workers(&self) -> usize {
        match self {
            LoadProfile::StageRamp(ramp) => ramp.peak_target(),
            LoadProfile::ArrivalRate(arrival) => arrival.spec.max_workers,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            LoadProfile::StageRamp(_) => "stage-ramp",
            LoadProfile::ArrivalRate(_) => "arrival-rate",
        }
    }
}

impl Serialize for LoadProfile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        config::ProfileConfig::from(self).serialize(serializer)
    }
}

/// A profile was rejected before any run could start.
#[derive(Debug, Clone, PartialEq)]
pub enum InvalidProfile {
    Unreadable(String),
    Malformed(String),
    EmptyStages,
    ZeroStageDuration { index: usize },
    NonPositiveRate(f64),
    RateOutOfRange(f64),
    RateTooPrecise(f64),
    ZeroTimeUnit,
    ZeroDuration,
    ZeroMaxWorkers,
    PreAllocatedExceedsMax {
        pre_allocated: usize,
        max_workers: usize,
    },
}

impl fmt::Display for InvalidProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvalidProfile: ")?;
        match self {
            InvalidProfile::Unreadable(reason) => write!(f, "unreadable: {reason}"),
            InvalidProfile::Malformed(reason) => write!(f, "malformed: {reason}"),
            InvalidProfile::EmptyStages => write!(f, "stage ramp without stages"),
            InvalidProfile::ZeroStageDuration { index } => {
                write!(f, "stage #{index} has a zero duration")
            }
            InvalidProfile::NonPositiveRate(rate) => {
                write!(f, "arrival rate must be a positive number, got {rate}")
            }
            InvalidProfile::RateOutOfRange(rate) => write!(
                f,
                "arrival rate {rate} cannot be converted into a dispatch quota (supported: 0.000001 up to 2^64 / 10^6)"
            ),
            InvalidProfile::RateTooPrecise(rate) => write!(
                f,
                "arrival rate {rate} has more than 6 decimals, use a larger time unit instead"
            ),
            InvalidProfile::ZeroTimeUnit => write!(f, "arrival rate time unit is zero"),
            InvalidProfile::ZeroDuration => write!(f, "arrival rate duration is zero"),
            InvalidProfile::ZeroMaxWorkers => write!(f, "max workers must be at least 1"),
            InvalidProfile::PreAllocatedExceedsMax {
                pre_allocated,
                max_workers,
            } => write!(
                f,
                "pre-allocated workers ({pre_allocated}) exceed max workers ({max_workers})"
            ),
        }
    }
}

impl std::error::Error for InvalidProfile {}

#[cfg(test)]
mod tests;
