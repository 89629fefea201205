use std::fmt;

use super::CheckId;
use crate::evaluate::Severity;
use crate::fmt::format_number;
use crate::threshold::{Threshold, Unit};

/// One `label=value[uom];warn;crit;min;max` perfdata field.
#[derive(Debug, Clone, PartialEq)]
pub struct Perfdata {
    pub label: String,
    pub value: f64,
    pub unit: Unit,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Perfdata {
    pub fn new(label: impl Into<String>, value: f64, unit: Unit) -> Self {
        Self {
            label: label.into(),
            value,
            unit,
            warning: None,
            critical: None,
            min: None,
            max: None,
        }
    }

    pub fn with_thresholds(
        mut self,
        warning: Option<&Threshold>,
        critical: Option<&Threshold>,
    ) -> Self {
        self.warning = warning.map(Threshold::value);
        self.critical = critical.map(Threshold::value);
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }
}

impl fmt::Display for Perfdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.contains([' ', '=', '\'']) {
            write!(f, "'{}'", self.label.replace('\'', "''"))?;
        } else {
            f.write_str(&self.label)?;
        }
        write!(f, "={}{}", format_number(self.value), self.unit.uom())?;

        let tail = [self.warning, self.critical, self.min, self.max];
        let used = tail.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        for v in &tail[..used] {
            f.write_str(";")?;
            if let Some(v) = v {
                f.write_str(&format_number(*v))?;
            }
        }
        Ok(())
    }
}

/// Outcome of one check, consumed by the output layer.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub check: CheckId,
    pub severity: Severity,
    pub message: String,
    pub long_message: Option<String>,
    pub perfdata: Vec<Perfdata>,
}

impl CheckResult {
    pub fn new(check: CheckId, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check,
            severity,
            message: message.into(),
            long_message: None,
            perfdata: Vec::new(),
        }
    }

    pub fn with_perfdata(mut self, perfdata: Perfdata) -> Self {
        self.perfdata.push(perfdata);
        self
    }

    pub fn with_long_message(mut self, long_message: impl Into<String>) -> Self {
        self.long_message = Some(long_message.into());
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.severity.exit_code()
    }
}

/// `POSTGRES_<CHECK> <SEVERITY>: <message> | <perfdata>` plus the long message lines.
impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "POSTGRES_{} {}: {}",
            self.check.name().to_uppercase(),
            self.severity,
            self.message
        )?;
        if !self.perfdata.is_empty() {
            f.write_str(" |")?;
            for p in &self.perfdata {
                write!(f, " {}", p)?;
            }
        }
        if let Some(long) = &self.long_message {
            write!(f, "\n{}", long)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfdata_minimal() {
        let p = Perfdata::new("num_archives", 3.0, Unit::Count);
        assert_eq!(p.to_string(), "num_archives=3");
    }

    #[test]
    fn test_perfdata_full() {
        let w = Threshold::new(95.0, Unit::Percent);
        let c = Threshold::new(90.0, Unit::Percent);
        let p = Perfdata::new("app", 99.25, Unit::Percent)
            .with_thresholds(Some(&w), Some(&c))
            .with_min(0.0)
            .with_max(100.0);
        assert_eq!(p.to_string(), "app=99.25%;95;90;0;100");
    }

    #[test]
    fn test_perfdata_gaps_and_nan() {
        let c = Threshold::new(600.0, Unit::Duration);
        let p = Perfdata::new("latest_archive_age", f64::NAN, Unit::Duration)
            .with_thresholds(None, Some(&c))
            .with_min(0.0);
        assert_eq!(p.to_string(), "latest_archive_age=NaNs;;600;0");
    }

    #[test]
    fn test_perfdata_quotes_label() {
        let p = Perfdata::new("my db's = x", 1.0, Unit::Size);
        assert_eq!(p.to_string(), "'my db''s = x'=1B");
    }

    #[test]
    fn test_result_line() {
        let r = CheckResult::new(CheckId::ArchiveFolder, Severity::Warning, "late")
            .with_perfdata(Perfdata::new("num_archives", 2.0, Unit::Count))
            .with_perfdata(Perfdata::new("latest_archive_age", 360.0, Unit::Duration))
            .with_long_message("details");
        assert_eq!(
            r.to_string(),
            "POSTGRES_ARCHIVE_FOLDER WARNING: late \
             | num_archives=2 latest_archive_age=360s\ndetails"
        );
        assert_eq!(r.exit_code(), 1);
    }
}
