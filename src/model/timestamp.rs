use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::model::errors::TimestampParseError;

/// A UTC instant with a total order and a canonical string form.
///
/// The string form (RFC 3339 with microsecond precision) is what gets written
/// into graph-edge `from`/`to` fields and query parameters, so round-tripping
/// through it must be lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current instant, truncated to microsecond precision so that a value
    /// survives a round-trip through its string form unchanged.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        // Truncate to microseconds; the canonical serialization carries no
        // finer precision.
        let micros = dt.timestamp_micros();
        Self(DateTime::from_timestamp_micros(micros).unwrap_or(dt))
    }

    /// Parse either an ISO-8601/RFC-3339 instant or a relative duration
    /// ("30s", "5m", "2h") interpreted as that long before now.
    pub fn parse(input: &str) -> Result<Self, TimestampParseError> {
        let trimmed = input.trim();
        if let Some(duration) = parse_relative(trimmed) {
            return Ok(Self::from_datetime(Utc::now() - duration));
        }
        match DateTime::parse_from_rfc3339(trimmed) {
            Ok(dt) => Ok(Self::from_datetime(dt.with_timezone(&Utc))),
            Err(_) => Err(TimestampParseError {
                input: input.to_string(),
            }),
        }
    }

    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn add_seconds(&self, seconds: i64) -> Self {
        Self::from_datetime(self.0 + Duration::seconds(seconds))
    }

    pub fn sub_seconds(&self, seconds: i64) -> Self {
        Self::from_datetime(self.0 - Duration::seconds(seconds))
    }
}

/// Parse "Ns" / "Nm" / "Nh" relative durations.
fn parse_relative(input: &str) -> Option<Duration> {
    if input.len() < 2 {
        return None;
    }
    let (number, unit) = input.split_at(input.len() - 1);
    let amount: i64 = number.parse().ok()?;
    if amount < 0 {
        return None;
    }
    match unit {
        "s" => Some(Duration::seconds(amount)),
        "m" => Some(Duration::minutes(amount)),
        "h" => Some(Duration::hours(amount)),
        _ => None,
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl FromStr for Timestamp {
    type Err = TimestampParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(dt)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_lossless() {
        let ts = Timestamp::parse("2024-03-01T10:30:00.123456Z").unwrap();
        let serialized = ts.to_string();
        let parsed = Timestamp::parse(&serialized).unwrap();
        assert_eq!(ts, parsed);
        assert_eq!(serialized, "2024-03-01T10:30:00.123456Z");
    }

    #[test]
    fn test_relative_parsing() {
        let now = Timestamp::now();
        let five_minutes_ago = Timestamp::parse("5m").unwrap();
        assert!(five_minutes_ago < now);
        // 5m should land within a second of now - 300s
        let expected = now.sub_seconds(300);
        let delta = (five_minutes_ago.inner() - expected.inner())
            .num_seconds()
            .abs();
        assert!(delta <= 1, "relative parse drifted by {}s", delta);

        assert!(Timestamp::parse("2h").unwrap() < Timestamp::parse("30s").unwrap());
    }

    #[test]
    fn test_comparison_operators() {
        let earlier = Timestamp::parse("2024-01-01T00:00:00Z").unwrap();
        let later = Timestamp::parse("2024-01-01T00:00:01Z").unwrap();
        assert!(earlier < later);
        assert!(later >= earlier);
        assert_eq!(earlier, Timestamp::parse("2024-01-01T00:00:00.000000Z").unwrap());
    }

    #[test]
    fn test_unparseable_input_errors() {
        assert!(Timestamp::parse("not-a-time").is_err());
        assert!(Timestamp::parse("5x").is_err());
        assert!(Timestamp::parse("").is_err());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let ts = Timestamp::parse("2024-06-15T08:00:00Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-06-15T08:00:00.000000Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
