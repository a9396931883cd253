//! Errors reported by archive sets and their backends.
use std::{fmt, io};

use crate::{rrd::definition::ConsolidationFunction, Timestamp};

/// Errors that can happen while creating, updating or querying an archive set.
#[derive(Debug)]
pub enum RrdError {
    /// A data source or archive definition is malformed.
    InvalidSpec { field: Box<str>, reason: Box<str> },
    /// A sample is not strictly after the last accepted one.
    OutOfOrderUpdate {
        attempted: Timestamp,
        last: Timestamp,
    },
    /// A sample doesn't carry one value per input data source.
    ArityMismatch {
        timestamp: Timestamp,
        expected: usize,
        got: usize,
    },
    /// No archive can answer a fetch.
    NoMatchingArchive {
        cf: ConsolidationFunction,
        resolution: Option<u64>,
    },
    AlreadyExists(Box<str>),
    NotFound(Box<str>),
    /// A sample time token is neither a timestamp nor `N`.
    InvalidTimestamp(Box<str>),
    /// An update template names a data source that doesn't exist (or takes no input).
    UnknownDataSource(Box<str>),
    InvalidRange { start: Timestamp, end: Timestamp },
    Backend(BackendError),
}

impl RrdError {
    pub(crate) fn invalid_spec(field: impl Into<Box<str>>, reason: impl Into<Box<str>>) -> Self {
        Self::InvalidSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for RrdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSpec { field, reason } => write!(f, "invalid '{field}': {reason}"),
            Self::OutOfOrderUpdate { attempted, last } => write!(
                f,
                "illegal attempt to update using time {attempted} when last update time is {last} (minimum one second step)"
            ),
            Self::ArityMismatch {
                timestamp,
                expected,
                got,
            } => write!(
                f,
                "expected {expected} data source readings at time {timestamp}, got {got}"
            ),
            Self::NoMatchingArchive { cf, resolution } => match resolution {
                Some(resolution) => write!(
                    f,
                    "no {cf} archive available (requested resolution {resolution}s)"
                ),
                None => write!(f, "no {cf} archive available"),
            },
            Self::AlreadyExists(name) => write!(f, "archive set '{name}' already exists"),
            Self::NotFound(name) => write!(f, "archive set '{name}' not found"),
            Self::InvalidTimestamp(token) => write!(f, "invalid sample time '{token}'"),
            Self::UnknownDataSource(name) => write!(f, "unknown data source '{name}'"),
            Self::InvalidRange { start, end } => {
                write!(f, "start ({start}) should be less than end ({end})")
            }
            Self::Backend(e) => write!(f, "backend error: {e}"),
        }
    }
}

impl std::error::Error for RrdError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BackendError> for RrdError {
    fn from(value: BackendError) -> Self {
        RrdError::Backend(value)
    }
}

impl From<io::Error> for RrdError {
    fn from(value: io::Error) -> Self {
        RrdError::Backend(BackendError::IoError(value))
    }
}

/// Errors of the persistence layer.
#[derive(Debug)]
pub enum BackendError {
    IoError(io::Error),
    InvalidConstantString,
    InvalidChecksum,
    NonMatchingLength,
    UnknownArchive(usize),
    Codec(Box<str>),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "{e}"),
            Self::UnknownArchive(index) => write!(f, "no archive at index {index}"),
            Self::Codec(e) => write!(f, "codec failure: {e}"),
            _ => write!(f, "{self:?}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BackendError {
    fn from(value: io::Error) -> Self {
        BackendError::IoError(value)
    }
}
