
//! Timestamped readings submitted to an archive set.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{error::RrdError, Timestamp};

/// Time of a sample.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum SampleTime {
    At(Timestamp),
    /// Resolved to the current time when the sample is applied (`N`).
    Now,
}

impl SampleTime {
    pub fn resolve(self, now: Timestamp) -> Timestamp {
        match self {
            Self::At(timestamp) => timestamp,
            Self::Now => now,
        }
    }
}

impl From<Timestamp> for SampleTime {
    fn from(value: Timestamp) -> Self {
        Self::At(value)
    }
}

impl FromStr for SampleTime {
    type Err = RrdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.eq_ignore_ascii_case("n") {
            return Ok(Self::Now);
        }

        value
            .parse()
            .map(Self::At)
            .map_err(|_| RrdError::InvalidTimestamp(value.into()))
    }
}

impl fmt::Display for SampleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::At(timestamp) => write!(f, "{timestamp}"),
            Self::Now => f.write_str("N"),
        }
    }
}

/// A raw data source reading.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub enum SampleValue {
    Known(f64),
    /// Explicit unknown (`U`), or a reading that couldn't be parsed.
    Unknown,
}

impl SampleValue {
    /// Parse a reading. Anything that isn't a finite number is unknown.
    pub fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("u") || token.eq_ignore_ascii_case("unkn") {
            return Self::Unknown;
        }

        match token.parse::<f64>() {
            Ok(value) => value.into(),
            Err(_) => {
                tracing::warn!("Unparseable reading {token:?}, considered unknown");
                Self::Unknown
            }
        }
    }

    pub fn known(self) -> Option<f64> {
        match self {
            Self::Known(value) => Some(value),
            Self::Unknown => None,
        }
    }
}

impl From<f64> for SampleValue {
    fn from(value: f64) -> Self {
        if value.is_finite() {
            Self::Known(value)
        } else {
            Self::Unknown
        }
    }
}

impl From<i64> for SampleValue {
    fn from(value: i64) -> Self {
        Self::Known(value as _)
    }
}

impl From<Option<f64>> for SampleValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Self::Unknown, Self::from)
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(value) => write!(f, "{value}"),
            Self::Unknown => f.write_str("U"),
        }
    }
}

/// One reading per input data source at a given time.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Sample {
    pub time: SampleTime,
    pub values: SmallVec<[SampleValue; 4]>,
}

impl Sample {
    pub fn new<T, I, V>(time: T, values: I) -> Self
    where
        T: Into<SampleTime>,
        I: IntoIterator<Item = V>,
        V: Into<SampleValue>,
    {
        Self {
            time: time.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time)?;
        self.values.iter().try_for_each(|v| write!(f, ":{v}"))
    }
}
