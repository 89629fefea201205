use regex::Regex;
use tracing::debug;

use super::{Check, CheckContext, CheckError, CheckId, CheckResult, CheckSettings};
use crate::evaluate::Severity;
use crate::query::{QueryError, Row};
use crate::replication::{self, StandbyFilter, StandbyReport};
use crate::threshold::{ThresholdPolicy, Unit};

const UNITS: &[Unit] = &[Unit::Size];

/// `pg_stat_replication` columns renamed from `*_location` to `*_lsn`.
const LSN_NAMING_VERSION: u32 = 100000;
/// `procpid` renamed to `pid`.
const PID_NAMING_VERSION: u32 = 90200;

/// Standby lag behind the primary's current WAL position.
pub(super) struct StreamingDeltaCheck;

fn exclude_pattern(settings: &CheckSettings) -> Result<Option<Regex>, CheckError> {
    settings
        .exclude
        .as_deref()
        .map(|p| {
            Regex::new(p)
                .map_err(|e| CheckError::Config(format!("invalid --exclude pattern: {}", e)))
        })
        .transpose()
}

impl Check for StreamingDeltaCheck {
    fn id(&self) -> CheckId {
        CheckId::StreamingDelta
    }

    /// `flush_lag,replay_lag`
    fn threshold_policy(&self) -> ThresholdPolicy {
        ThresholdPolicy::new(UNITS).arity(2)
    }

    fn validate_settings(&self, settings: &CheckSettings) -> Result<(), CheckError> {
        exclude_pattern(settings).map(|_| ())
    }

    fn evaluate(&self, ctx: &mut CheckContext<'_>) -> Result<CheckResult, CheckError> {
        let in_recovery = ctx
            .executor
            .query("SELECT pg_is_in_recovery()")?
            .first()
            .map(|r| r.get_bool(0))
            .transpose()?
            .unwrap_or(false);
        if in_recovery {
            return Ok(CheckResult::new(
                CheckId::StreamingDelta,
                Severity::Unknown,
                "Server is a standby",
            ));
        }

        let reference_sql = if ctx.server_version >= LSN_NAMING_VERSION {
            "SELECT pg_current_wal_lsn()"
        } else {
            "SELECT pg_current_xlog_location()"
        };
        let reference = ctx
            .executor
            .query(reference_sql)?
            .first()
            .ok_or(QueryError::MissingColumn(0))?
            .get_lsn(0)?
            .ok_or(QueryError::Null(0))?;

        let reports = ctx
            .executor
            .query(&standbys_sql(ctx.server_version))?
            .iter()
            .map(standby_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(reference = %reference, standbys = reports.len(), "replication state fetched");

        let mut filter = StandbyFilter::all().allow(ctx.settings.standbys.iter().cloned());
        if let Some(re) = exclude_pattern(ctx.settings)? {
            filter = filter.exclude(re);
        }

        let report = replication::evaluate_standbys(reference, &reports, &filter, ctx.thresholds);
        Ok(report.into_result(ctx.thresholds))
    }
}

fn standbys_sql(server_version: u32) -> String {
    let pid = if server_version >= PID_NAMING_VERSION {
        "pid"
    } else {
        "procpid"
    };
    let (sent, write, flush, replay) = if server_version >= LSN_NAMING_VERSION {
        ("sent_lsn", "write_lsn", "flush_lsn", "replay_lsn")
    } else {
        (
            "sent_location",
            "write_location",
            "flush_location",
            "replay_location",
        )
    };
    format!(
        "SELECT application_name, client_addr, {pid}, state, {sent}, {write}, {flush}, {replay} \
         FROM pg_stat_replication ORDER BY application_name, client_addr, {pid}"
    )
}

/// A walsender without positions yet is reported as not connected.
fn standby_from_row(row: &Row) -> Result<StandbyReport, QueryError> {
    let name = row.get_opt(0)?.unwrap_or_default().to_string();
    let client_addr = row.get_opt(1)?.map(str::to_string);
    let pid = row.get_i64(2)?;
    let state = row.get_opt(3)?.unwrap_or_default();
    let positions = [row.get_lsn(4)?, row.get_lsn(5)?, row.get_lsn(6)?, row.get_lsn(7)?];
    let streaming = matches!(state, "streaming" | "catchup");
    let connected = streaming && positions.iter().all(Option::is_some);
    let [sent, write, flush, replay] = positions.map(Option::unwrap_or_default);

    Ok(StandbyReport {
        name,
        client_addr,
        pid: i32::try_from(pid).map_err(|_| QueryError::InvalidValue {
            column: 2,
            value: pid.to_string(),
            expected: "pid",
        })?,
        sent,
        write,
        flush,
        replay,
        connected,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::check::run_check;
    use crate::query::MockExecutor;

    /// Walsender connected over a Unix socket.
    fn standby(name: &str, state: &str, lsns: [Option<&str>; 4]) -> Row {
        Row::from_strs(&[
            Some(name),
            None,
            Some("4242"),
            Some(state),
            lsns[0],
            lsns[1],
            lsns[2],
            lsns[3],
        ])
    }

    fn primary(standbys: Vec<Row>) -> MockExecutor {
        MockExecutor::new(160000)
            .on("pg_is_in_recovery", vec![Row::from_strs(&[Some("f")])])
            .on("pg_current_wal_lsn", vec![Row::from_strs(&[Some("0/A000000")])])
            .on("pg_stat_replication", standbys)
    }

    fn settings(warning: Option<&str>, critical: Option<&str>) -> CheckSettings {
        CheckSettings {
            warning: warning.map(str::to_string),
            critical: critical.map(str::to_string),
            ..CheckSettings::default()
        }
    }

    #[test]
    fn test_lagging_standby() {
        let mut mock = primary(vec![
            standby("s1", "streaming", [Some("0/A000000"); 4]),
            standby(
                "s2",
                "streaming",
                [Some("0/A000000"), Some("0/A000000"), Some("0/9f00000"), Some("0/9F00000")],
            ),
        ]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(Some("512kB,2MB"), Some("10MB,20MB")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(result.message, "warning flush lag of 1.0M on s2@4242");
        assert_eq!(result.perfdata.len(), 8);
        assert_eq!(
            result.perfdata[6].to_string(),
            "s2@4242_flush_delta=1048576B;524288;10485760"
        );
    }

    #[test]
    fn test_no_thresholds_only_perfdata() {
        let mut mock = primary(vec![standby("s1", "streaming", [Some("0/A000000"); 4])]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(None, None),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.message, "1 slaves checked");
    }

    #[test]
    fn test_requested_standby_missing() {
        let mut mock = primary(vec![
            standby("s1", "streaming", [Some("0/A000000"); 4]),
            standby("s2", "startup", [None; 4]),
        ]);
        let mut s = settings(None, None);
        s.standbys = vec!["s1".to_string(), "s2".to_string()];
        let result = run_check(CheckId::StreamingDelta, &mut mock, &s, Utc::now()).unwrap();
        assert_eq!(result.severity, Severity::Critical);
        assert_eq!(result.message, "s2 not connected");
        assert!(result.perfdata.iter().all(|p| p.label.starts_with("s1@")));
    }

    #[test]
    fn test_standbys_sharing_application_name() {
        let walreceiver = |addr: &str, pid: &str, flush: &str| {
            Row::from_strs(&[
                Some("walreceiver"),
                Some(addr),
                Some(pid),
                Some("streaming"),
                Some("0/A000000"),
                Some("0/A000000"),
                Some(flush),
                Some(flush),
            ])
        };
        let mut mock = primary(vec![
            walreceiver("10.0.0.1", "101", "0/A000000"),
            walreceiver("10.0.0.2", "102", "0/9F00000"),
        ]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(Some("512kB,2MB"), Some("10MB,20MB")),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Warning);
        assert_eq!(result.message, "warning flush lag of 1.0M on walreceiver@10.0.0.2");

        let mut labels: Vec<&str> = result.perfdata.iter().map(|p| p.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 8);
        assert!(labels.contains(&"walreceiver@10.0.0.1_flush_delta"));
        assert!(labels.contains(&"walreceiver@10.0.0.2_flush_delta"));

        let mut s = settings(None, None);
        s.standbys = vec!["walreceiver@10.0.0.2".to_string()];
        let result = run_check(CheckId::StreamingDelta, &mut mock, &s, Utc::now()).unwrap();
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.perfdata.len(), 4);
        assert_eq!(result.perfdata[0].label, "walreceiver@10.0.0.2_sent_delta");
    }

    #[test]
    fn test_no_standby_is_unknown() {
        let mut mock = primary(vec![]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(None, None),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Unknown);
        assert_eq!(result.message, "No slaves connected");
    }

    #[test]
    fn test_standby_server_is_unknown() {
        let mut mock = MockExecutor::new(160000)
            .on("pg_is_in_recovery", vec![Row::from_strs(&[Some("t")])]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(None, None),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Unknown);
        assert_eq!(result.message, "Server is a standby");
        assert_eq!(mock.executed().len(), 1);
    }

    #[test]
    fn test_pre_10_naming() {
        let mut mock = MockExecutor::new(90600)
            .on("pg_is_in_recovery", vec![Row::from_strs(&[Some("f")])])
            .on("pg_current_xlog_location", vec![Row::from_strs(&[Some("1/0")])])
            .on("pg_stat_replication", vec![standby("s1", "streaming", [Some("1/0"); 4])]);
        let result = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(None, None),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(result.severity, Severity::Ok);
        let sql = mock.executed().last().unwrap();
        assert!(sql.contains("flush_location"));
        assert!(sql.contains(" pid,"));
    }

    #[test]
    fn test_sql_naming_by_version() {
        assert!(standbys_sql(90100).contains("procpid"));
        assert!(standbys_sql(90200).contains(" pid,"));
        assert!(standbys_sql(160000).contains("replay_lsn"));
    }

    #[test]
    fn test_invalid_exclude_is_usage_error() {
        let mut mock = primary(vec![]);
        let mut s = settings(None, None);
        s.exclude = Some("(".to_string());
        let err = run_check(CheckId::StreamingDelta, &mut mock, &s, Utc::now()).unwrap_err();
        assert!(matches!(err, CheckError::Config(_)));
        assert_eq!(err.exit_code(), 127);
    }

    #[test]
    fn test_exclude_applies_to_default_selection() {
        let mut mock = primary(vec![
            standby("backup", "streaming", [Some("0/0"); 4]),
            standby("s1", "streaming", [Some("0/A000000"); 4]),
        ]);
        let mut s = settings(Some("1MB,1MB"), Some("2MB,2MB"));
        s.exclude = Some("^backup$".to_string());
        let result = run_check(CheckId::StreamingDelta, &mut mock, &s, Utc::now()).unwrap();
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.perfdata.len(), 4);
    }

    #[test]
    fn test_composite_threshold_arity() {
        let mut mock = primary(vec![]);
        let err = run_check(
            CheckId::StreamingDelta,
            &mut mock,
            &settings(Some("1MB"), None),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, CheckError::Threshold(_)));
        assert!(mock.executed().is_empty());
    }
}
