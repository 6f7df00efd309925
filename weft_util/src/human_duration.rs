//! Deserializes [`Duration`] values from human-readable strings like `"30s"`
//! or `"1m 30s"`, falling back to plain integer seconds.
//!
//! Intended for use with `#[serde(deserialize_with = …)]` on configuration
//! structs across the Weft family.

use serde::de::{Error, Visitor};
use serde::Deserializer;
use std::fmt::Formatter;
use std::time::Duration;

/// Deserializes a [`Duration`] from either a humantime string (`"45s"`) or a
/// bare number of seconds.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(HumanDurationVisitor)
}

/// Deserializes an optional [`Duration`] with the same rules as
/// [`deserialize`]. An explicit `null` yields [`None`].
pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(OptionalHumanDurationVisitor)
}

struct HumanDurationVisitor;

impl<'de> Visitor<'de> for HumanDurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a duration string (e.g. '30s') or a number of seconds")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        humantime::parse_duration(value).map_err(Error::custom)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| Error::custom("a duration may not be negative"))
    }
}

struct OptionalHumanDurationVisitor;

impl<'de> Visitor<'de> for OptionalHumanDurationVisitor {
    type Value = Option<Duration>;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("an optional duration string or number of seconds")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        HumanDurationVisitor.visit_str(value).map(Some)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Some(Duration::from_secs(value)))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        HumanDurationVisitor.visit_i64(value).map(Some)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(None)
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(None)
    }
}
