//! Shared plumbing for checks reporting one value per database.

use super::{CheckId, CheckResult, Perfdata};
use crate::evaluate::{Direction, Severity, evaluate};
use crate::threshold::{Thresholds, Unit};

/// Databases the checks look at.
pub(super) const DATABASE_FILTER: &str =
    "FROM pg_stat_database s JOIN pg_database d ON d.oid = s.datid WHERE d.datallowconn";

/// Measured value of one database. NaN when no interval is available yet.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct DatabaseValue {
    pub name: String,
    pub value: f64,
}

/// Evaluates every database and builds a result with one perfdata per database.
///
/// The message lists the databases that breached a threshold, worst first.
pub(super) fn summarize(
    check: CheckId,
    values: Vec<DatabaseValue>,
    unit: Unit,
    direction: Direction,
    thresholds: &Thresholds,
    describe: impl Fn(f64) -> String,
    decorate: impl Fn(Perfdata) -> Perfdata,
) -> CheckResult {
    if values.is_empty() {
        return CheckResult::new(check, Severity::Unknown, "No database to check");
    }

    let warning = thresholds.warning_at(0);
    let critical = thresholds.critical_at(0);
    let mut judged: Vec<(&DatabaseValue, Severity)> = values
        .iter()
        .map(|v| (v, evaluate(v.value, unit, warning, critical, direction)))
        .collect();

    let severity = judged.iter().map(|(_, s)| *s).max().unwrap_or_default();
    // Stable sort: equal severities keep database order.
    judged.sort_by(|a, b| b.1.cmp(&a.1));
    let breaches: Vec<String> = judged
        .iter()
        .filter(|(_, s)| *s != Severity::Ok)
        .map(|(v, s)| format!("{} {}: {}", s.as_str().to_lowercase(), v.name, describe(v.value)))
        .collect();
    let message = if breaches.is_empty() {
        format!("{} database(s) checked", values.len())
    } else {
        breaches.join(", ")
    };

    let mut result = CheckResult::new(check, severity, message);
    for v in &values {
        result = result.with_perfdata(decorate(
            Perfdata::new(v.name.clone(), v.value, unit).with_thresholds(warning, critical),
        ));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::{ThresholdPolicy, parse_pair};

    fn thresholds() -> Thresholds {
        const UNITS: &[Unit] = &[Unit::Count];
        parse_pair(Some("10"), Some("20"), &ThresholdPolicy::new(UNITS)).unwrap()
    }

    fn db(name: &str, value: f64) -> DatabaseValue {
        DatabaseValue {
            name: name.to_string(),
            value,
        }
    }

    fn run(values: Vec<DatabaseValue>) -> CheckResult {
        summarize(
            CheckId::TempWritten,
            values,
            Unit::Count,
            Direction::Ascending,
            &thresholds(),
            |v| v.to_string(),
            |p| p.with_min(0.0),
        )
    }

    #[test]
    fn test_worst_first() {
        let r = run(vec![db("a", 12.0), db("b", 1.0), db("c", 25.0)]);
        assert_eq!(r.severity, Severity::Critical);
        assert_eq!(r.message, "critical c: 25, warning a: 12");
        assert_eq!(r.perfdata.len(), 3);
        assert_eq!(r.perfdata[0].to_string(), "a=12;10;20;0");
    }

    #[test]
    fn test_all_ok_and_nan() {
        let r = run(vec![db("a", 1.0), db("b", f64::NAN)]);
        assert_eq!(r.severity, Severity::Ok);
        assert_eq!(r.message, "2 database(s) checked");
        assert_eq!(r.perfdata[1].to_string(), "b=NaN;10;20;0");
    }

    #[test]
    fn test_no_database() {
        let r = run(vec![]);
        assert_eq!(r.severity, Severity::Unknown);
        assert!(r.perfdata.is_empty());
    }
}
