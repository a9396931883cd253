//! rrdkit common library
//!
//! Round-robin archive storage and consolidation engine: raw samples are aligned
//! to primary data points, consolidated per archive and kept in fixed-size
//! circular row buffers.
pub mod backend;
pub mod buffer;
pub mod error;
pub mod rrd;
pub mod sample;

/// Seconds since the unix epoch.
pub type Timestamp = u64;

pub use error::{BackendError, RrdError};

/// Current time as a [Timestamp].
pub fn now() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
