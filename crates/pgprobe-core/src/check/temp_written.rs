use std::collections::BTreeSet;

use tracing::debug;

use super::database::{DATABASE_FILTER, DatabaseValue, summarize};
use super::{Check, CheckContext, CheckError, CheckId, CheckResult, CheckSettings};
use crate::evaluate::Direction;
use crate::fmt::format_bytes;
use crate::storage::{DeltaKind, StoreLock};
use crate::threshold::{ThresholdPolicy, Unit};

const UNITS: &[Unit] = &[Unit::Size];

/// Temporary file bytes written per second by each database.
pub(super) struct TempWrittenCheck;

impl Check for TempWrittenCheck {
    fn id(&self) -> CheckId {
        CheckId::TempWritten
    }

    fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(UNITS)
    }

    fn validate_settings(&self, settings: &CheckSettings) -> Result<(), CheckError> {
        settings.require_status_file(self.id()).map(|_| ())
    }

    fn evaluate(&self, ctx: &mut CheckContext<'_>) -> Result<CheckResult, CheckError> {
        let path = ctx.settings.require_status_file(self.id())?;
        let mut lock = StoreLock::open(path)?;
        let mut store = lock.acquire()?;

        let rows = ctx.executor.query(&format!(
            "SELECT d.datname, s.temp_bytes {} ORDER BY d.datname",
            DATABASE_FILTER
        ))?;

        let mut values = Vec::with_capacity(rows.len());
        let mut seen = BTreeSet::new();
        for row in &rows {
            let name = row.get_str(0)?;
            let delta = store.delta(name, row.get_f64(1)?, ctx.now, DeltaKind::Rate);
            seen.insert(name.to_string());
            // Counter went backwards: statistics were reset.
            let value = delta.value.value().filter(|r| *r >= 0.0).unwrap_or(f64::NAN);
            debug!(database = name, rate = ?delta.value, "temp bytes rate");
            values.push(DatabaseValue {
                name: name.to_string(),
                value,
            });
        }
        // Keys holding a '#' belong to hit_ratio.
        store.retain(|key| key.contains('#') || seen.contains(key));
        store.commit()?;

        Ok(summarize(
            self.id(),
            values,
            Unit::Size,
            Direction::Ascending,
            ctx.thresholds,
            |v| format!("{}/s", format_bytes(v as u64)),
            |p| p.with_min(0.0),
        ))
    }
}
