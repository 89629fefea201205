use tracing::{debug, warn};

use super::{Check, CheckContext, CheckError, CheckId, CheckResult, CheckSettings};
use crate::evaluate::Severity;
use crate::query::QueryError;
use crate::threshold::{self, ThresholdPolicy, Unit};
use crate::wal::{self, DEFAULT_SEGMENT_SIZE, WalLayout};

/// First version where `wal_segment_size` can differ from the default without a rebuild.
const SEGMENT_SIZE_SETTING_VERSION: u32 = 110000;

const UNITS: &[Unit] = &[Unit::Duration];

/// Archived WAL sequence and freshness.
pub(super) struct ArchiveFolderCheck;

impl Check for ArchiveFolderCheck {
    fn id(&self) -> CheckId {
        CheckId::ArchiveFolder
    }

    fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(UNITS).required()
    }

    fn validate_settings(&self, settings: &CheckSettings) -> Result<(), CheckError> {
        if settings.archive_path.is_none() {
            return Err(CheckError::Config(
                "check archive_folder requires --path".to_string(),
            ));
        }
        Ok(())
    }

    fn evaluate(&self, ctx: &mut CheckContext<'_>) -> Result<CheckResult, CheckError> {
        let dir = ctx
            .settings
            .archive_path
            .as_deref()
            .ok_or_else(|| CheckError::Config("check archive_folder requires --path".to_string()))?;

        let segment_size = if ctx.server_version >= SEGMENT_SIZE_SETTING_VERSION {
            query_segment_size(ctx)?
        } else {
            DEFAULT_SEGMENT_SIZE
        };
        let layout = WalLayout::new(segment_size, ctx.server_version).map_err(|_| {
            QueryError::InvalidValue {
                column: 0,
                value: segment_size.to_string(),
                expected: "WAL segment size",
            }
        })?;
        debug!(
            segment_size,
            segments_per_xlogid = layout.segments_per_xlogid(),
            "WAL layout"
        );

        let segments = match wal::scan_archive(dir, ctx.settings.archive_suffix.as_deref()) {
            Ok(s) => s,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot read archive directory");
                return Ok(CheckResult::new(
                    CheckId::ArchiveFolder,
                    Severity::Unknown,
                    format!("Could not read archive directory '{}': {}", dir.display(), e),
                ));
            }
        };
        if segments.is_empty() {
            return Ok(CheckResult::new(
                CheckId::ArchiveFolder,
                Severity::Unknown,
                format!("No archived WAL found in '{}'", dir.display()),
            ));
        }

        let warning = ctx.thresholds.warning_at(0);
        let critical = ctx.thresholds.critical_at(0);
        let report = wal::validate(segments, &layout, warning, critical, ctx.now);
        Ok(report.into_result(dir, warning, critical))
    }
}

fn query_segment_size(ctx: &mut CheckContext<'_>) -> Result<u64, CheckError> {
    let rows = ctx.executor.query("SHOW wal_segment_size")?;
    let row = rows.first().ok_or(QueryError::MissingColumn(0))?;
    let raw = row.get_str(0)?;
    let invalid = || QueryError::InvalidValue {
        column: 0,
        value: raw.to_string(),
        expected: "WAL segment size",
    };
    let spec = threshold::parse(raw, &[Unit::Size]).map_err(|_| invalid())?;
    let bytes = spec.get(0).ok_or_else(invalid)?.value();
    Ok(bytes as u64)
}
