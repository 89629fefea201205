//! Persisted last-observation store for delta and rate checks.
//!
//! One status file per check context holds `key -> (value, timestamp)`.
//! A companion `<path>.lock` file serializes overlapping invocations.

mod codec;
mod store;

pub use store::{Delta, DeltaKind, DeltaValue, MetricSnapshot, MetricStore, StoreLock};

use std::fmt;
use std::io;

/// Error type for status file operations.
#[derive(Debug)]
pub enum StoreError {
    /// Lock file or status file I/O failed.
    Io(io::Error),
    /// Status file exists but does not hold valid data.
    Corrupt(String),
    /// Serialization failed.
    Encode(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "status file: {}", e),
            StoreError::Corrupt(msg) => write!(f, "status file corrupt: {}", msg),
            StoreError::Encode(msg) => write!(f, "status file encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}
