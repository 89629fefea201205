//! Severity evaluation of a measured value against warning/critical thresholds.

use std::fmt;

use tracing::warn;

use crate::threshold::{Threshold, Unit};

/// Check outcome, ordered from best to worst.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Critical,
    Unknown,
}

impl Severity {
    /// Process exit code expected by monitoring pollers.
    pub fn exit_code(self) -> i32 {
        match self {
            Severity::Ok => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
            Severity::Unknown => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
            Severity::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a threshold is the bad one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Alert when value >= threshold (sizes, counts, ages, lag).
    Ascending,
    /// Alert when value <= threshold (ratios where lower is worse).
    Descending,
}

impl Direction {
    fn breached(self, value: f64, limit: f64) -> bool {
        match self {
            Direction::Ascending => value >= limit,
            Direction::Descending => value <= limit,
        }
    }
}

/// Evaluates `value` (expressed in `unit`) against optional thresholds.
///
/// A NaN value means no measurement is available yet and is always OK.
/// Thresholds expressed in a different unit than the measurement are ignored.
pub fn evaluate(
    value: f64,
    unit: Unit,
    warning: Option<&Threshold>,
    critical: Option<&Threshold>,
    direction: Direction,
) -> Severity {
    if value.is_nan() {
        return Severity::Ok;
    }

    let applies = |t: &Threshold| {
        if t.unit() == unit {
            true
        } else {
            warn!(
                threshold = %t,
                measured = unit.name(),
                "threshold unit does not match measurement, ignoring"
            );
            false
        }
    };

    if let Some(c) = critical
        && applies(c)
        && direction.breached(value, c.value())
    {
        return Severity::Critical;
    }
    if let Some(w) = warning
        && applies(w)
        && direction.breached(value, w.value())
    {
        return Severity::Warning;
    }
    Severity::Ok
}
