//! Duration fields in configuration: humantime strings (`30s`, `1m30s`,
//! `500ms`) or a bare number of seconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::Error;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Secs(f64),
}

pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Text(s) => humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom),
        RawDuration::Secs(secs) => Duration::try_from_secs_f64(secs)
            .map_err(|_| serde::de::Error::custom(Error::InvalidDuration(secs.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Holder {
        #[serde(deserialize_with = "deserialize")]
        value: Duration,
    }

    fn parse(yaml: &str) -> Result<Duration, serde_yaml::Error> {
        serde_yaml::from_str::<Holder>(yaml).map(|h| h.value)
    }

    #[test]
    fn accepts_humantime_strings_and_seconds() {
        assert_eq!(parse("value: 30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse("value: 1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse("value: 500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse("value: 2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse("value: 1.5").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["value: 10x", "value: s", "value: -3"] {
            assert!(parse(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
