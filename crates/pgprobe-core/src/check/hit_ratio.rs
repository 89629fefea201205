use std::collections::BTreeSet;

use tracing::debug;

use super::database::{DATABASE_FILTER, DatabaseValue, summarize};
use super::{Check, CheckContext, CheckError, CheckId, CheckResult, CheckSettings};
use crate::evaluate::Direction;
use crate::fmt::format_number;
use crate::storage::{DeltaKind, DeltaValue, StoreLock};
use crate::threshold::{ThresholdPolicy, Unit};

const UNITS: &[Unit] = &[Unit::Percent];

const HIT_SUFFIX: &str = "#blks_hit";
const READ_SUFFIX: &str = "#blks_read";

/// Buffer cache hit ratio of each database since the previous run.
pub(super) struct HitRatioCheck;

impl Check for HitRatioCheck {
    fn id(&self) -> CheckId {
        CheckId::HitRatio
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
            "SELECT d.datname, s.blks_hit, s.blks_read {} ORDER BY d.datname",
            DATABASE_FILTER
        ))?;

        let mut values = Vec::with_capacity(rows.len());
        let mut seen = BTreeSet::new();
        for row in &rows {
            let name = row.get_str(0)?;
            let hit_key = format!("{}{}", name, HIT_SUFFIX);
            let read_key = format!("{}{}", name, READ_SUFFIX);
            let hit = store.delta(&hit_key, row.get_f64(1)?, ctx.now, DeltaKind::Difference);
            let read = store.delta(&read_key, row.get_f64(2)?, ctx.now, DeltaKind::Difference);
            seen.insert(hit_key);
            seen.insert(read_key);
            let value = ratio(hit.value, read.value);
            debug!(
                database = name,
                hit = ?hit.value,
                read = ?read.value,
                ratio = value,
                "hit ratio"
            );
            values.push(DatabaseValue {
                name: name.to_string(),
                value,
            });
        }
        // Counters of dropped databases; other checks' keys are left alone.
        store.retain(|key| {
            !(key.ends_with(HIT_SUFFIX) || key.ends_with(READ_SUFFIX)) || seen.contains(key)
        });
        store.commit()?;

        Ok(summarize(
            self.id(),
            values,
            Unit::Percent,
            Direction::Descending,
            ctx.thresholds,
            |v| format!("{}%", format_number(v)),
            |p| p.with_min(0.0).with_max(100.0),
        ))
    }
}

/// Percentage of block reads served from shared buffers; NaN without activity,
/// baseline or after a statistics reset.
fn ratio(hit: DeltaValue, read: DeltaValue) -> f64 {
    match (hit.value(), read.value()) {
        (Some(h), Some(r)) if h >= 0.0 && r >= 0.0 && h + r > 0.0 => h * 100.0 / (h + r),
        _ => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::{DateTime, TimeDelta, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::check::run_check;
    use crate::evaluate::Severity;
    use crate::query::{MockExecutor, Row};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn stats(rows: &[(&str, &str, &str)]) -> Vec<Row> {
        rows.iter()
            .map(|&(db, hit, read)| Row::from_strs(&[Some(db), Some(hit), Some(read)]))
            .collect()
    }

    fn settings(status_file: &Path) -> CheckSettings {
        CheckSettings {
            warning: Some("95%".to_string()),
            critical: Some("90%".to_string()),
            status_file: Some(status_file.to_path_buf()),
            ..CheckSettings::default()
        }
    }

    #[test]
    fn test_first_run_then_interval_ratio() {
        let dir = tempdir().unwrap();
        let settings = settings(&dir.path().join("status"));
        let mut mock = MockExecutor::new(160000).on(
            "blks_hit",
            stats(&[("app", "1000", "100"), ("web", "500", "0")]),
        );

        let first = run_check(CheckId::HitRatio, &mut mock, &settings, t0()).unwrap();
        assert_eq!(first.severity, Severity::Ok);
        assert_eq!(first.perfdata[0].to_string(), "app=NaN%;95;90;0;100");

        mock.set(
            "blks_hit",
            stats(&[("app", "1900", "200"), ("web", "1490", "10")]),
        );
        let second = run_check(
            CheckId::HitRatio,
            &mut mock,
            &settings,
            t0() + TimeDelta::seconds(60),
        )
        .unwrap();
        assert_eq!(second.severity, Severity::Critical);
        assert_eq!(second.message, "critical app: 90%");
        assert_eq!(second.perfdata[0].value, 90.0);
        assert_eq!(second.perfdata[1].value, 99.0);
    }

    #[test]
    fn test_idle_and_reset_databases_are_ok() {
        let dir = tempdir().unwrap();
        let settings = settings(&dir.path().join("status"));
        let mut mock = MockExecutor::new(160000).on(
            "blks_hit",
            stats(&[("idle", "10", "10"), ("reset", "5000", "500")]),
        );
        run_check(CheckId::HitRatio, &mut mock, &settings, t0()).unwrap();

        mock.set("blks_hit", stats(&[("idle", "10", "10"), ("reset", "10", "90")]));
        let result = run_check(
            CheckId::HitRatio,
            &mut mock,
            &settings,
            t0() + TimeDelta::seconds(60),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Ok);
        assert!(result.perfdata.iter().all(|p| p.value.is_nan()));
    }

    #[test]
    fn test_dropped_database_forgotten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status");
        {
            let mut lock = StoreLock::open(&path).unwrap();
            let mut store = lock.acquire().unwrap();
            store.put("app", 4096.0, t0());
            store.commit().unwrap();
        }
        let settings = settings(&path);
        let mut mock = MockExecutor::new(160000).on(
            "blks_hit",
            stats(&[("app", "1000", "100"), ("scratch", "50", "50")]),
        );
        run_check(CheckId::HitRatio, &mut mock, &settings, t0()).unwrap();

        mock.set("blks_hit", stats(&[("app", "1900", "200")]));
        let result = run_check(
            CheckId::HitRatio,
            &mut mock,
            &settings,
            t0() + TimeDelta::seconds(60),
        )
        .unwrap();
        assert_eq!(result.perfdata.len(), 1);

        let mut lock = StoreLock::open(&path).unwrap();
        let store = lock.acquire().unwrap();
        assert!(store.get("scratch#blks_hit").is_none());
        assert!(store.get("scratch#blks_read").is_none());
        assert_eq!(store.get("app#blks_hit").unwrap().value, 1900.0);
        // Entry written by temp_written survives.
        assert_eq!(store.get("app").unwrap().value, 4096.0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_requires_status_file() {
        let mut mock = MockExecutor::new(160000);
        let err = run_check(CheckId::HitRatio, &mut mock, &CheckSettings::default(), t0())
            .unwrap_err();
        assert!(matches!(err, CheckError::Config(_)));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(DeltaValue::Value(90.0), DeltaValue::Value(10.0)), 90.0);
        assert!(ratio(DeltaValue::NoData, DeltaValue::Value(10.0)).is_nan());
        assert!(ratio(DeltaValue::Value(0.0), DeltaValue::Value(0.0)).is_nan());
        assert!(ratio(DeltaValue::Value(-5.0), DeltaValue::Value(10.0)).is_nan());
    }
}
