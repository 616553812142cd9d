use std::{borrow::Cow, time::Duration};

use serde::{Deserialize as _, Deserializer, Serializer, de::Error as _};

/// Human-friendly time parser.
///
/// Some examples are "5s", "5m 30s" and "5m_30s".
pub fn parse_humantime_str(s: &str) -> Result<Duration, humantime::DurationError> {
    let s = s.trim();
    if s.contains('_') {
        humantime::parse_duration(&s.replace('_', " "))
    } else {
        humantime::parse_duration(s)
    }
}

/// Serde adapter for [`Duration`] fields written as humantime strings.
pub mod humantime_serde {
    use super::*;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Cow::<'de, str>::deserialize(deserializer)?;
        parse_humantime_str(&raw)
            .map_err(|err| D::Error::custom(format!("invalid duration '{raw}': {err}")))
    }
}
