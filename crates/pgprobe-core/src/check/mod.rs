//! Check registry and dispatch.
//!
//! Every check implements [`Check`]: it declares the thresholds it accepts and
//! turns measurements obtained through a [`QueryExecutor`] into a
//! [`CheckResult`]. Running a check goes through three steps:
//!
//! 1. [`prepare`] validates settings and parses thresholds, so configuration
//!    faults surface before the server is contacted;
//! 2. [`Capabilities::negotiate`] computes the checks the server supports;
//! 3. [`PreparedCheck::run`] evaluates the check.

mod archive_folder;
mod database;
mod hit_ratio;
mod result;
mod streaming_delta;
mod temp_written;

pub use result::{CheckResult, Perfdata};

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::query::{QueryError, QueryExecutor};
use crate::storage::StoreError;
use crate::threshold::{ThresholdError, ThresholdPolicy, Thresholds, parse_pair};

/// Exit code for configuration faults, distinct from every check outcome.
pub const USAGE_EXIT_CODE: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckId {
    ArchiveFolder,
    HitRatio,
    StreamingDelta,
    TempWritten,
}

impl CheckId {
    pub const ALL: [CheckId; 4] = [
        CheckId::ArchiveFolder,
        CheckId::HitRatio,
        CheckId::StreamingDelta,
        CheckId::TempWritten,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckId::ArchiveFolder => "archive_folder",
            CheckId::HitRatio => "hit_ratio",
            CheckId::StreamingDelta => "streaming_delta",
            CheckId::TempWritten => "temp_written",
        }
    }

    /// Oldest `server_version_num` the check works with.
    pub fn min_version(self) -> u32 {
        match self {
            CheckId::ArchiveFolder | CheckId::HitRatio => 80200,
            CheckId::StreamingDelta => 90100,
            CheckId::TempWritten => 90200,
        }
    }

    fn handler(self) -> Box<dyn Check> {
        match self {
            CheckId::ArchiveFolder => Box::new(archive_folder::ArchiveFolderCheck),
            CheckId::HitRatio => Box::new(hit_ratio::HitRatioCheck),
            CheckId::StreamingDelta => Box::new(streaming_delta::StreamingDeltaCheck),
            CheckId::TempWritten => Box::new(temp_written::TempWrittenCheck),
        }
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CheckId {
    type Err = CheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckId::ALL
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CheckError::UnknownCheck(s.to_string()))
    }
}

/// Error type for check dispatch and evaluation.
#[derive(Debug)]
pub enum CheckError {
    /// Bad `--warning`/`--critical` argument.
    Threshold(ThresholdError),
    /// Other invalid or missing setting.
    Config(String),
    UnknownCheck(String),
    /// Server too old for the requested check.
    Incompatible {
        check: CheckId,
        required: u32,
        actual: u32,
    },
    Query(QueryError),
    Store(StoreError),
}

impl CheckError {
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            CheckError::Threshold(_) | CheckError::Config(_) | CheckError::UnknownCheck(_)
        )
    }

    /// 127 for configuration faults, 3 (UNKNOWN) otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.is_usage() { USAGE_EXIT_CODE } else { 3 }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::Threshold(e) => write!(f, "{}", e),
            CheckError::Config(msg) => write!(f, "{}", msg),
            CheckError::UnknownCheck(name) => write!(f, "unknown check '{}'", name),
            CheckError::Incompatible {
                check,
                required,
                actual,
            } => write!(
                f,
                "check {} requires PostgreSQL {} or later, server is {}",
                check,
                format_version(*required),
                format_version(*actual)
            ),
            CheckError::Query(e) => write!(f, "{}", e),
            CheckError::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CheckError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckError::Threshold(e) => Some(e),
            CheckError::Query(e) => Some(e),
            CheckError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ThresholdError> for CheckError {
    fn from(e: ThresholdError) -> Self {
        CheckError::Threshold(e)
    }
}

impl From<QueryError> for CheckError {
    fn from(e: QueryError) -> Self {
        CheckError::Query(e)
    }
}

impl From<StoreError> for CheckError {
    fn from(e: StoreError) -> Self {
        CheckError::Store(e)
    }
}

/// `90624` -> `9.6`, `160002` -> `16`.
pub fn format_version(version_num: u32) -> String {
    if version_num >= 100000 {
        format!("{}", version_num / 10000)
    } else {
        format!("{}.{}", version_num / 10000, (version_num / 100) % 100)
    }
}

/// Per-invocation settings shared by all checks.
#[derive(Debug, Clone, Default)]
pub struct CheckSettings {
    pub warning: Option<String>,
    pub critical: Option<String>,
    /// Status file for delta/rate checks.
    pub status_file: Option<PathBuf>,
    /// WAL archive directory.
    pub archive_path: Option<PathBuf>,
    /// Suffix of compressed archived segments, e.g. `.gz`.
    pub archive_suffix: Option<String>,
    /// Standbys that must be connected.
    pub standbys: Vec<String>,
    /// Regex of standby names to ignore.
    pub exclude: Option<String>,
}

impl CheckSettings {
    pub(crate) fn require_status_file(&self, check: CheckId) -> Result<&PathBuf, CheckError> {
        self.status_file
            .as_ref()
            .ok_or_else(|| CheckError::Config(format!("check {} requires --status-file", check)))
    }
}

/// Everything a check needs for one evaluation.
pub struct CheckContext<'a> {
    pub executor: &'a mut dyn QueryExecutor,
    pub server_version: u32,
    pub settings: &'a CheckSettings,
    pub thresholds: &'a Thresholds,
    pub now: DateTime<Utc>,
}

pub trait Check: Send + Sync {
    fn id(&self) -> CheckId;

    fn threshold_policy(&self) -> ThresholdPolicy;

    /// Rejects missing or malformed settings before the server is contacted.
    fn validate_settings(&self, _settings: &CheckSettings) -> Result<(), CheckError> {
        Ok(())
    }

    fn evaluate(&self, ctx: &mut CheckContext<'_>) -> Result<CheckResult, CheckError>;
}

/// Checks available on one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub server_version: u32,
    pub supported: Vec<CheckId>,
}

impl Capabilities {
    pub fn for_version(server_version: u32) -> Self {
        let supported = CheckId::ALL
            .into_iter()
            .filter(|id| server_version >= id.min_version())
            .collect();
        Self {
            server_version,
            supported,
        }
    }

    /// Asks the server for its version and computes the supported checks.
    pub fn negotiate(executor: &mut dyn QueryExecutor) -> Result<Self, CheckError> {
        let server_version = executor.server_version_num()?;
        let caps = Self::for_version(server_version);
        debug!(
            server_version,
            supported = ?caps.supported.iter().map(|c| c.name()).collect::<Vec<_>>(),
            "capabilities negotiated"
        );
        Ok(caps)
    }

    pub fn supports(&self, check: CheckId) -> bool {
        self.supported.contains(&check)
    }

    pub fn ensure(&self, check: CheckId) -> Result<(), CheckError> {
        if self.supports(check) {
            Ok(())
        } else {
            Err(CheckError::Incompatible {
                check,
                required: check.min_version(),
                actual: self.server_version,
            })
        }
    }
}

/// A check whose settings and thresholds passed validation.
pub struct PreparedCheck {
    check: Box<dyn Check>,
    thresholds: Thresholds,
}

/// Validates settings and parses thresholds for `id`.
pub fn prepare(id: CheckId, settings: &CheckSettings) -> Result<PreparedCheck, CheckError> {
    let check = id.handler();
    check.validate_settings(settings)?;
    let thresholds = parse_pair(
        settings.warning.as_deref(),
        settings.critical.as_deref(),
        &check.threshold_policy(),
    )?;
    Ok(PreparedCheck { check, thresholds })
}

impl PreparedCheck {
    pub fn id(&self) -> CheckId {
        self.check.id()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn run(
        &self,
        executor: &mut dyn QueryExecutor,
        capabilities: &Capabilities,
        settings: &CheckSettings,
        now: DateTime<Utc>,
    ) -> Result<CheckResult, CheckError> {
        capabilities.ensure(self.id())?;
        let mut ctx = CheckContext {
            executor,
            server_version: capabilities.server_version,
            settings,
            thresholds: &self.thresholds,
            now,
        };
        let result = self.check.evaluate(&mut ctx)?;
        info!(check = %self.id(), severity = %result.severity, "check evaluated");
        Ok(result)
    }
}

/// Prepares, negotiates and runs `id` in one go.
pub fn run_check(
    id: CheckId,
    executor: &mut dyn QueryExecutor,
    settings: &CheckSettings,
    now: DateTime<Utc>,
) -> Result<CheckResult, CheckError> {
    let prepared = prepare(id, settings)?;
    let capabilities = Capabilities::negotiate(executor)?;
    prepared.run(executor, &capabilities, settings, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::MockExecutor;

    #[test]
    fn test_check_id_names() {
        for id in CheckId::ALL {
            assert_eq!(id.name().parse::<CheckId>().unwrap(), id);
            assert_eq!(id.handler().id(), id);
        }
        assert_eq!("HIT_RATIO".parse::<CheckId>().unwrap(), CheckId::HitRatio);
        assert!(matches!(
            "bloat".parse::<CheckId>(),
            Err(CheckError::UnknownCheck(_))
        ));
    }

    #[test]
    fn test_capabilities_by_version() {
        let caps = Capabilities::for_version(90000);
        assert_eq!(caps.supported, [CheckId::ArchiveFolder, CheckId::HitRatio]);
        assert!(caps.ensure(CheckId::HitRatio).is_ok());
        assert!(matches!(
            caps.ensure(CheckId::StreamingDelta),
            Err(CheckError::Incompatible {
                required: 90100,
                actual: 90000,
                ..
            })
        ));

        assert_eq!(Capabilities::for_version(160002).supported, CheckId::ALL);
    }

    #[test]
    fn test_incompatible_check_is_not_a_usage_error() {
        let mut mock = MockExecutor::new(90100);
        let err = run_check(
            CheckId::TempWritten,
            &mut mock,
            &CheckSettings {
                status_file: Some(PathBuf::from("/tmp/unused")),
                ..CheckSettings::default()
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(!err.is_usage());
        assert_eq!(err.exit_code(), 3);
        assert_eq!(
            err.to_string(),
            "check temp_written requires PostgreSQL 9.2 or later, server is 9.1"
        );
        assert!(mock.executed().is_empty());
    }

    #[test]
    fn test_configuration_fault_before_any_query() {
        let mut mock = MockExecutor::new(160000);
        let settings = CheckSettings {
            warning: Some("90".to_string()),
            status_file: Some(PathBuf::from("/tmp/unused")),
            ..CheckSettings::default()
        };
        let err = run_check(CheckId::HitRatio, &mut mock, &settings, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CheckError::Threshold(ThresholdError::UnitNotAllowed { .. })
        ));
        assert_eq!(err.exit_code(), USAGE_EXIT_CODE);
        assert!(mock.executed().is_empty());
    }

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(90624), "9.6");
        assert_eq!(format_version(90100), "9.1");
        assert_eq!(format_version(160002), "16");
    }
}
