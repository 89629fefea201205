//! Streaming replication lag.
//!
//! Lag of each standby is the byte distance between the primary's current WAL
//! position and the sent/write/flush/replay positions the standby reported.
//! Thresholds are composite: `flush_lag,replay_lag`, both in bytes.

mod lsn;

pub use lsn::{Lsn, LsnParseError};

use regex::Regex;
use tracing::debug;

use crate::check::{CheckId, CheckResult, Perfdata};
use crate::evaluate::{Direction, Severity, evaluate};
use crate::fmt::format_bytes;
use crate::threshold::{Thresholds, Unit};

/// One row of `pg_stat_replication`.
#[derive(Debug, Clone, PartialEq)]
pub struct StandbyReport {
    /// `application_name`, shared by every standby left on the default.
    pub name: String,
    /// NULL for walsenders connected over a Unix socket.
    pub client_addr: Option<String>,
    pub pid: i32,
    pub sent: Lsn,
    pub write: Lsn,
    pub flush: Lsn,
    pub replay: Lsn,
    /// Walsender is streaming (or catching up).
    pub connected: bool,
}

impl StandbyReport {
    /// `application_name@client_addr`, or `application_name@pid` without an address.
    pub fn id(&self) -> String {
        match &self.client_addr {
            Some(addr) => format!("{}@{}", self.name, addr),
            None => format!("{}@{}", self.name, self.pid),
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.name == name || self.id() == name
    }
}

/// Selection of the standbys to report on.
///
/// An explicit allow-list wins over the exclusion pattern, which only narrows
/// the default "every connected standby" selection. Both match either the
/// application name or the full standby id.
#[derive(Debug, Clone, Default)]
pub struct StandbyFilter {
    allow: Vec<String>,
    exclude: Option<Regex>,
}

impl StandbyFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn allow<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }
}

/// Lag metric that decided a standby's severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagMetric {
    Flush,
    Replay,
}

impl LagMetric {
    fn label(self) -> &'static str {
        match self {
            LagMetric::Flush => "flush lag",
            LagMetric::Replay => "replay lag",
        }
    }
}

/// Lag in bytes behind the reference position.
#[derive(Debug, Clone, PartialEq)]
pub struct StandbyLag {
    /// Standby id, see [`StandbyReport::id`].
    pub name: String,
    pub pid: i32,
    pub sent: u64,
    pub write: u64,
    pub flush: u64,
    pub replay: u64,
}

impl StandbyLag {
    pub fn compute(reference: Lsn, report: &StandbyReport) -> Self {
        Self {
            name: report.id(),
            pid: report.pid,
            sent: reference.bytes_since(report.sent),
            write: reference.bytes_since(report.write),
            flush: reference.bytes_since(report.flush),
            replay: reference.bytes_since(report.replay),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StandbyVerdict {
    pub lag: StandbyLag,
    pub severity: Severity,
    pub breach: Option<LagMetric>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationReport {
    pub standbys: Vec<StandbyVerdict>,
    /// Explicitly requested standbys that are not connected.
    pub missing: Vec<String>,
}

/// Evaluates every selected standby against `(flush, replay)` thresholds.
///
/// Per standby, flush lag is evaluated first and replay lag only when flush lag
/// is within thresholds.
pub fn evaluate_standbys(
    reference: Lsn,
    reports: &[StandbyReport],
    filter: &StandbyFilter,
    thresholds: &Thresholds,
) -> ReplicationReport {
    let connected: Vec<&StandbyReport> = reports.iter().filter(|r| r.connected).collect();

    let mut missing = Vec::new();
    let selected: Vec<&StandbyReport> = if filter.allow.is_empty() {
        connected
            .into_iter()
            .filter(|r| {
                let excluded = filter
                    .exclude
                    .as_ref()
                    .is_some_and(|re| re.is_match(&r.name) || re.is_match(&r.id()));
                if excluded {
                    debug!(standby = %r.name, "standby excluded");
                }
                !excluded
            })
            .collect()
    } else {
        let mut selected = Vec::new();
        for name in &filter.allow {
            let matching: Vec<&StandbyReport> =
                connected.iter().copied().filter(|r| r.matches(name)).collect();
            if matching.is_empty() {
                missing.push(name.clone());
            }
            selected.extend(matching);
        }
        selected
    };

    let standbys = selected
        .into_iter()
        .map(|report| {
            let lag = StandbyLag::compute(reference, report);
            let (severity, breach) = judge(&lag, thresholds);
            debug!(
                standby = %lag.name,
                flush = lag.flush,
                replay = lag.replay,
                severity = %severity,
                "standby lag evaluated"
            );
            StandbyVerdict {
                lag,
                severity,
                breach,
            }
        })
        .collect();

    ReplicationReport { standbys, missing }
}

fn judge(lag: &StandbyLag, thresholds: &Thresholds) -> (Severity, Option<LagMetric>) {
    let checks = [
        (LagMetric::Flush, lag.flush, 0),
        (LagMetric::Replay, lag.replay, 1),
    ];
    for (metric, bytes, idx) in checks {
        let severity = evaluate(
            bytes as f64,
            Unit::Size,
            thresholds.warning_at(idx),
            thresholds.critical_at(idx),
            Direction::Ascending,
        );
        if severity != Severity::Ok {
            return (severity, Some(metric));
        }
    }
    (Severity::Ok, None)
}

impl ReplicationReport {
    pub fn severity(&self) -> Severity {
        if self.standbys.is_empty() && self.missing.is_empty() {
            return Severity::Unknown;
        }
        let worst = self
            .standbys
            .iter()
            .map(|s| s.severity)
            .max()
            .unwrap_or(Severity::Ok);
        if self.missing.is_empty() {
            worst
        } else {
            Severity::Critical
        }
    }

    pub fn message(&self) -> String {
        if self.standbys.is_empty() && self.missing.is_empty() {
            return "No slaves connected".to_string();
        }

        let mut parts: Vec<String> = self
            .missing
            .iter()
            .map(|name| format!("{} not connected", name))
            .collect();

        // First standby with the highest severity.
        let worst = self
            .standbys
            .iter()
            .filter(|s| s.breach.is_some())
            .fold(None::<&StandbyVerdict>, |acc, s| match acc {
                Some(a) if a.severity >= s.severity => Some(a),
                _ => Some(s),
            });
        if let Some(w) = worst
            && let Some(metric) = w.breach
        {
            let bytes = match metric {
                LagMetric::Flush => w.lag.flush,
                LagMetric::Replay => w.lag.replay,
            };
            parts.push(format!(
                "{} {} of {} on {}",
                w.severity.as_str().to_lowercase(),
                metric.label(),
                format_bytes(bytes),
                w.lag.name
            ));
        }

        if parts.is_empty() {
            format!("{} slaves checked", self.standbys.len())
        } else {
            parts.join(", ")
        }
    }

    /// Result with sent/write/flush/replay perfdata for each reported standby.
    pub fn into_result(self, thresholds: &Thresholds) -> CheckResult {
        let mut result =
            CheckResult::new(CheckId::StreamingDelta, self.severity(), self.message());
        for s in &self.standbys {
            let lag = &s.lag;
            let delta = |metric: &str, bytes: u64| {
                Perfdata::new(format!("{}_{}_delta", lag.name, metric), bytes as f64, Unit::Size)
            };
            result = result
                .with_perfdata(delta("sent", lag.sent))
                .with_perfdata(delta("write", lag.write))
                .with_perfdata(
                    delta("flush", lag.flush)
                        .with_thresholds(thresholds.warning_at(0), thresholds.critical_at(0)),
                )
                .with_perfdata(
                    delta("replay", lag.replay)
                        .with_thresholds(thresholds.warning_at(1), thresholds.critical_at(1)),
                );
        }
        result
    }
}
