use serde::{Deserialize, Serialize};

use super::{ArrivalRate, ArrivalRateSpec, Interpolation, InvalidProfile, LoadProfile, Stage, StageRamp};

/// Wire format of a load profile document.
///
/// Exactly one of `stages` and `arrivalRate` has to be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ProfileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stages: Option<Vec<Stage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    interpolation: Option<Interpolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arrival_rate: Option<ArrivalRateSpec>,
}

impl TryFrom<ProfileConfig> for LoadProfile {
    type Error = InvalidProfile;

    fn try_from(cfg: ProfileConfig) -> Result<Self, Self::Error> {
        match (cfg.stages, cfg.arrival_rate) {
            (Some(stages), None) => StageRamp::try_new(stages, cfg.interpolation.unwrap_or_default())
                .map(LoadProfile::StageRamp),
            (None, Some(spec)) => {
                if cfg.interpolation.is_some() {
                    return Err(InvalidProfile::Malformed(
                        "'interpolation' only applies to 'stages'".to_owned(),
                    ));
                }
                ArrivalRate::try_new(spec).map(LoadProfile::ArrivalRate)
            }
            (Some(_), Some(_)) => Err(InvalidProfile::Malformed(
                "'stages' and 'arrivalRate' are mutually exclusive".to_owned(),
            )),
            (None, None) => Err(InvalidProfile::Malformed(
                "expected either 'stages' or 'arrivalRate'".to_owned(),
            )),
        }
    }
}

impl From<&LoadProfile> for ProfileConfig {
    fn from(profile: &LoadProfile) -> Self {
        match profile {
            LoadProfile::StageRamp(ramp) => Self {
                stages: Some(ramp.stages().to_vec()),
                interpolation: Some(ramp.interpolation()),
                arrival_rate: None,
            },
            LoadProfile::ArrivalRate(arrival) => Self {
                stages: None,
                interpolation: None,
                arrival_rate: Some(*arrival.spec()),
            },
        }
    }
}
