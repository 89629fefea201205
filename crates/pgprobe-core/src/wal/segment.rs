//! WAL segment file names.
//!
//! A segment name is 24 hex digits: timeline, high and low 32-bit fields, each
//! written as 8 digits (`000000010000000A000000FF`). Within a timeline the low
//! field counts segments inside one 4GB "xlogid" and carries into the high field.

use std::fmt;
use std::str::FromStr;

/// Default `wal_segment_size`.
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

/// First server version (`server_version_num`) that uses the last segment of each xlogid.
const FULL_XLOGID_VERSION: u32 = 90300;

const XLOGID_SPAN: u64 = 0x1_0000_0000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalNameError {
    InvalidName(String),
    InvalidSegmentSize(u64),
}

impl fmt::Display for WalNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalNameError::InvalidName(s) => write!(f, "'{}' is not a WAL segment name", s),
            WalNameError::InvalidSegmentSize(s) => write!(f, "invalid WAL segment size: {}", s),
        }
    }
}

impl std::error::Error for WalNameError {}

/// Segment numbering rules of the server that produced the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalLayout {
    segments_per_xlogid: u32,
}

impl WalLayout {
    /// Layout for `segment_size` bytes per segment on a server of the given version.
    ///
    /// Before 9.3 the last segment of each xlogid is never used.
    pub fn new(segment_size: u64, server_version: u32) -> Result<Self, WalNameError> {
        let in_range = (1024 * 1024..=XLOGID_SPAN / 4).contains(&segment_size);
        if !segment_size.is_power_of_two() || !in_range {
            return Err(WalNameError::InvalidSegmentSize(segment_size));
        }
        let mut segments_per_xlogid = (XLOGID_SPAN / segment_size) as u32;
        if server_version < FULL_XLOGID_VERSION {
            segments_per_xlogid -= 1;
        }
        Ok(Self {
            segments_per_xlogid,
        })
    }

    pub fn segments_per_xlogid(&self) -> u32 {
        self.segments_per_xlogid
    }
}

impl Default for WalLayout {
    fn default() -> Self {
        Self {
            segments_per_xlogid: (XLOGID_SPAN / DEFAULT_SEGMENT_SIZE) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalSegmentName {
    pub timeline: u32,
    pub high: u32,
    pub low: u32,
}

impl WalSegmentName {
    pub fn new(timeline: u32, high: u32, low: u32) -> Self {
        Self {
            timeline,
            high,
            low,
        }
    }

    /// Name of the segment that follows this one on the same timeline.
    pub fn successor(&self, layout: &WalLayout) -> WalSegmentName {
        if self.low.saturating_add(1) >= layout.segments_per_xlogid {
            WalSegmentName::new(self.timeline, self.high.wrapping_add(1), 0)
        } else {
            WalSegmentName::new(self.timeline, self.high, self.low + 1)
        }
    }
}

impl FromStr for WalSegmentName {
    type Err = WalNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(WalNameError::InvalidName(s.to_string()));
        }
        let field = |range: std::ops::Range<usize>| {
            u32::from_str_radix(&s[range], 16).map_err(|_| WalNameError::InvalidName(s.to_string()))
        };
        Ok(WalSegmentName::new(field(0..8)?, field(8..16)?, field(16..24)?))
    }
}

impl fmt::Display for WalSegmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}{:08X}{:08X}", self.timeline, self.high, self.low)
    }
}
