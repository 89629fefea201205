//! Archived WAL validation.
//!
//! The archive directory is scanned non-recursively, segments are ordered by
//! modification time and the name sequence is walked: every segment must be the
//! successor of the previous one. The age of the newest archive is then checked
//! against duration thresholds.

mod segment;

pub use segment::{DEFAULT_SEGMENT_SIZE, WalLayout, WalNameError, WalSegmentName};

use std::fs;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::check::{CheckId, CheckResult, Perfdata};
use crate::evaluate::{Direction, Severity, evaluate};
use crate::fmt::format_duration;
use crate::threshold::{Threshold, Unit};

/// An archived segment and its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalSegment {
    pub name: WalSegmentName,
    pub mtime: DateTime<Utc>,
}

/// Lists WAL segments in `dir`.
///
/// Only regular files (symlinks are followed) whose name is a segment name are
/// returned; `suffix` (e.g. `.gz`) is stripped before matching. History, backup
/// label and partial files are skipped.
pub fn scan_archive(dir: &Path, suffix: Option<&str>) -> io::Result<Vec<WalSegment>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                debug!(file = %path.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let stem = match suffix {
            Some(sfx) if !sfx.is_empty() => match file_name.strip_suffix(sfx) {
                Some(stem) => stem,
                None => {
                    debug!(file = file_name, "skipping file without archive suffix");
                    continue;
                }
            },
            _ => file_name,
        };
        let Ok(name) = stem.parse::<WalSegmentName>() else {
            debug!(file = file_name, "skipping non-segment file");
            continue;
        };

        segments.push(WalSegment {
            name,
            mtime: DateTime::<Utc>::from(metadata.modified()?),
        });
    }
    Ok(segments)
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct WalArchiveReport {
    pub num_archives: usize,
    /// Seconds since the newest (by mtime) segment was archived. NaN without segments.
    pub latest_archive_age: f64,
    /// Name expected where the sequence broke.
    pub missing: Option<WalSegmentName>,
    pub severity: Severity,
}

/// Checks segment ordering and archive freshness.
///
/// Segments are sorted by mtime (name breaks ties); the first one is accepted
/// as the starting point.
pub fn validate(
    mut segments: Vec<WalSegment>,
    layout: &WalLayout,
    warning: Option<&Threshold>,
    critical: Option<&Threshold>,
    now: DateTime<Utc>,
) -> WalArchiveReport {
    segments.sort_by(|a, b| a.mtime.cmp(&b.mtime).then(a.name.cmp(&b.name)));

    let missing = segments.windows(2).find_map(|pair| {
        let expected = pair[0].name.successor(layout);
        (pair[1].name != expected).then_some(expected)
    });

    let latest_archive_age = segments
        .last()
        .map(|s| {
            let age = (now - s.mtime).num_milliseconds() as f64 / 1000.0;
            age.max(0.0)
        })
        .unwrap_or(f64::NAN);

    let severity = if missing.is_some() {
        Severity::Critical
    } else {
        evaluate(
            latest_archive_age,
            Unit::Duration,
            warning,
            critical,
            Direction::Ascending,
        )
    };

    debug!(
        num_archives = segments.len(),
        latest_archive_age,
        missing = ?missing.map(|m| m.to_string()),
        "WAL archive validated"
    );

    WalArchiveReport {
        num_archives: segments.len(),
        latest_archive_age,
        missing,
        severity,
    }
}

impl WalArchiveReport {
    pub fn message(&self, dir: &Path) -> String {
        match self.missing {
            Some(expected) => format!("Wrong sequence or file missing @ '{}'", expected),
            None => format!(
                "{} WAL archived in '{}', latest archived since {}",
                self.num_archives,
                dir.display(),
                format_duration(self.latest_archive_age as i64)
            ),
        }
    }

    /// Result carrying the message and both perfdata values, whatever decided the severity.
    pub fn into_result(
        self,
        dir: &Path,
        warning: Option<&Threshold>,
        critical: Option<&Threshold>,
    ) -> CheckResult {
        CheckResult::new(CheckId::ArchiveFolder, self.severity, self.message(dir))
            .with_perfdata(
                Perfdata::new("num_archives", self.num_archives as f64, Unit::Count).with_min(0.0),
            )
            .with_perfdata(
                Perfdata::new("latest_archive_age", self.latest_archive_age, Unit::Duration)
                    .with_thresholds(warning, critical)
                    .with_min(0.0),
            )
    }
}
