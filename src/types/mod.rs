//! Shared value types used across the sync and search paths.

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Wire format for timestamps: ISO-8601 without offset, fixed microseconds.
///
/// Fixed width keeps lexicographic and chronological order identical, which
/// stores comparing timestamps as strings rely on.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A UTC instant with microsecond precision.
///
/// Embedding records are stamped at write time; the sync watermark is the
/// largest stamp already folded into the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// The Unix epoch, used as the watermark before the first sync.
    #[must_use]
    pub fn epoch() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH.naive_utc())
    }

    /// The current time truncated to microseconds.
    #[must_use]
    pub fn now() -> Self {
        Self(Utc::now().naive_utc().trunc_subsecs(6))
    }

    /// Builds a timestamp from microseconds since the Unix epoch.
    #[must_use]
    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_micros(micros).map(|dt| Self(dt.naive_utc()))
    }

    /// Microseconds since the Unix epoch.
    #[must_use]
    pub fn as_micros(&self) -> i64 {
        self.0.and_utc().timestamp_micros()
    }

    /// The smallest timestamp strictly greater than `self`.
    #[must_use]
    pub fn next_tick(&self) -> Self {
        Self(self.0 + TimeDelta::microseconds(1))
    }

    /// Parses the wire format, also accepting RFC 3339 with an offset.
    pub fn parse(value: &str) -> Result<Self, chrono::ParseError> {
        match NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
            Ok(naive) => Ok(Self(naive.trunc_subsecs(6))),
            Err(naive_err) => DateTime::parse_from_rfc3339(value)
                .map(|dt| Self(dt.with_timezone(&Utc).naive_utc().trunc_subsecs(6)))
                .map_err(|_| naive_err),
        }
    }

    /// The instant as a UTC date-time.
    #[must_use]
    pub fn to_utc(&self) -> DateTime<Utc> {
        self.0.and_utc()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
    }
}
