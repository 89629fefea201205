//! Threshold grammar for `--warning` / `--critical` arguments.
//!
//! A component is a decimal number with an optional unit suffix:
//! - `%` — percent (0..=100)
//! - `s`, `m`, `h`, `d` — duration, normalized to seconds
//! - `B`, `kB`, `MB`, `GB`, `TB`, `PB` — size, 1024-based, case-insensitive
//! - no suffix — count, or bytes/seconds when the check does not accept counts
//!
//! Composite checks take two comma-separated components (`1MB,5MB`) and
//! consume them positionally.

use std::fmt;

/// Kind of quantity a threshold (or a measurement) is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Count,
    Percent,
    /// Seconds.
    Duration,
    /// Bytes.
    Size,
}

impl Unit {
    pub const ALL: [Unit; 4] = [Unit::Count, Unit::Percent, Unit::Duration, Unit::Size];

    /// Perfdata unit-of-measure suffix for values in this unit.
    pub fn uom(self) -> &'static str {
        match self {
            Unit::Count => "",
            Unit::Percent => "%",
            Unit::Duration => "s",
            Unit::Size => "B",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Unit::Count => "count",
            Unit::Percent => "percent",
            Unit::Duration => "duration",
            Unit::Size => "size",
        }
    }
}

/// Order in which a suffix-less number is resolved when several units are allowed.
const BARE_NUMBER_UNITS: [Unit; 3] = [Unit::Count, Unit::Size, Unit::Duration];

/// Error raised for malformed or disallowed threshold arguments.
///
/// All variants are configuration faults: they are detected before any
/// measurement takes place.
#[derive(Debug, Clone, PartialEq)]
pub enum ThresholdError {
    Empty,
    InvalidNumber(String),
    UnknownSuffix(String),
    UnitNotAllowed { input: String, unit: Unit, allowed: Vec<Unit> },
    PercentOutOfRange(String),
    Negative(String),
    Arity { input: String, expected: usize, found: usize },
    Missing(&'static str),
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::Empty => write!(f, "empty threshold"),
            ThresholdError::InvalidNumber(s) => write!(f, "invalid number in threshold '{}'", s),
            ThresholdError::UnknownSuffix(s) => {
                write!(f, "unknown unit suffix in threshold '{}'", s)
            }
            ThresholdError::UnitNotAllowed {
                input,
                unit,
                allowed,
            } => {
                let names: Vec<&str> = allowed.iter().map(|u| u.name()).collect();
                write!(
                    f,
                    "threshold '{}' is a {} value, this check accepts: {}",
                    input,
                    unit.name(),
                    names.join(", ")
                )
            }
            ThresholdError::PercentOutOfRange(s) => {
                write!(f, "percent threshold '{}' must be between 0 and 100", s)
            }
            ThresholdError::Negative(s) => write!(f, "threshold '{}' must not be negative", s),
            ThresholdError::Arity {
                input,
                expected,
                found,
            } => write!(
                f,
                "threshold '{}' has {} component(s), expected {}",
                input, found, expected
            ),
            ThresholdError::Missing(which) => write!(f, "{} threshold is required", which),
        }
    }
}

impl std::error::Error for ThresholdError {}

/// A single parsed threshold, value normalized to the unit's base
/// (seconds, bytes, percent points, count).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    value: f64,
    unit: Unit,
}

impl Threshold {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Unit {
        self.unit
    }
}

/// Canonical text form, accepted back by [`parse`].
impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unit {
            Unit::Count => write!(f, "{}", self.value),
            Unit::Percent => write!(f, "{}%", self.value),
            Unit::Duration => write!(f, "{}s", self.value),
            Unit::Size => write!(f, "{}B", self.value),
        }
    }
}

/// Ordered list of threshold components from one CLI argument.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec(Vec<Threshold>);

impl ThresholdSpec {
    pub fn components(&self) -> &[Threshold] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<&Threshold> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ThresholdSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

/// Parses a threshold argument, accepting only the given units.
pub fn parse(raw: &str, allowed: &[Unit]) -> Result<ThresholdSpec, ThresholdError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ThresholdError::Empty);
    }
    let components = raw
        .split(',')
        .map(|c| parse_component(c, allowed))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ThresholdSpec(components))
}

fn parse_component(raw: &str, allowed: &[Unit]) -> Result<Threshold, ThresholdError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(ThresholdError::Empty);
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| ThresholdError::InvalidNumber(text.to_string()))?;
    if !number.is_finite() {
        return Err(ThresholdError::InvalidNumber(text.to_string()));
    }

    let (unit, factor) = match suffix.trim() {
        "" => {
            let unit = BARE_NUMBER_UNITS
                .iter()
                .copied()
                .find(|u| allowed.contains(u))
                .unwrap_or(Unit::Count);
            (unit, 1.0)
        }
        "%" => (Unit::Percent, 1.0),
        "s" => (Unit::Duration, 1.0),
        "m" => (Unit::Duration, 60.0),
        "h" => (Unit::Duration, 3600.0),
        "d" => (Unit::Duration, 86400.0),
        other => match size_factor(other) {
            Some(factor) => (Unit::Size, factor),
            None => return Err(ThresholdError::UnknownSuffix(text.to_string())),
        },
    };

    if !allowed.contains(&unit) {
        return Err(ThresholdError::UnitNotAllowed {
            input: text.to_string(),
            unit,
            allowed: allowed.to_vec(),
        });
    }
    if unit == Unit::Percent && !(0.0..=100.0).contains(&number) {
        return Err(ThresholdError::PercentOutOfRange(text.to_string()));
    }
    if unit != Unit::Count && number < 0.0 {
        return Err(ThresholdError::Negative(text.to_string()));
    }

    Ok(Threshold::new(number * factor, unit))
}

fn size_factor(suffix: &str) -> Option<f64> {
    let exponent = match suffix.to_ascii_lowercase().as_str() {
        "b" => 0,
        "kb" => 1,
        "mb" => 2,
        "gb" => 3,
        "tb" => 4,
        "pb" => 5,
        _ => return None,
    };
    Some(1024f64.powi(exponent))
}

/// Threshold requirements a check declares for its `--warning`/`--critical` options.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    pub units: &'static [Unit],
    /// Number of comma-separated components each argument must carry.
    pub arity: usize,
    pub warning_required: bool,
    pub critical_required: bool,
}

impl ThresholdPolicy {
    pub const fn new(units: &'static [Unit]) -> Self {
        Self {
            units,
            arity: 1,
            warning_required: false,
            critical_required: false,
        }
    }

    pub const fn arity(mut self, arity: usize) -> Self {
        self.arity = arity;
        self
    }

    pub const fn required(mut self) -> Self {
        self.warning_required = true;
        self.critical_required = true;
        self
    }
}

/// Parsed warning and critical thresholds for one check invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    pub warning: Option<ThresholdSpec>,
    pub critical: Option<ThresholdSpec>,
}

impl Thresholds {
    /// Warning component at `index`, if configured.
    pub fn warning_at(&self, index: usize) -> Option<&Threshold> {
        self.warning.as_ref().and_then(|s| s.get(index))
    }

    /// Critical component at `index`, if configured.
    pub fn critical_at(&self, index: usize) -> Option<&Threshold> {
        self.critical.as_ref().and_then(|s| s.get(index))
    }
}

/// Parses both threshold options against a check's policy.
pub fn parse_pair(
    warning: Option<&str>,
    critical: Option<&str>,
    policy: &ThresholdPolicy,
) -> Result<Thresholds, ThresholdError> {
    let parse_one = |raw: Option<&str>,
                     which: &'static str,
                     required: bool|
     -> Result<Option<ThresholdSpec>, ThresholdError> {
        match raw {
            Some(raw) => {
                let spec = parse(raw, policy.units)?;
                if spec.len() != policy.arity {
                    return Err(ThresholdError::Arity {
                        input: raw.trim().to_string(),
                        expected: policy.arity,
                        found: spec.len(),
                    });
                }
                Ok(Some(spec))
            }
            None if required => Err(ThresholdError::Missing(which)),
            None => Ok(None),
        }
    };

    Ok(Thresholds {
        warning: parse_one(warning, "warning", policy.warning_required)?,
        critical: parse_one(critical, "critical", policy.critical_required)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(raw: &str, allowed: &[Unit]) -> Threshold {
        let spec = parse(raw, allowed).unwrap();
        assert_eq!(spec.len(), 1);
        spec.components()[0]
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(single("90%", &[Unit::Percent]), Threshold::new(90.0, Unit::Percent));
        assert_eq!(single("99.5%", &[Unit::Percent]), Threshold::new(99.5, Unit::Percent));
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(single("30s", &[Unit::Duration]).value(), 30.0);
        assert_eq!(single("5m", &[Unit::Duration]).value(), 300.0);
        assert_eq!(single("2h", &[Unit::Duration]).value(), 7200.0);
        assert_eq!(single("1d", &[Unit::Duration]).value(), 86400.0);
    }

    #[test]
    fn test_parse_sizes() {
        assert_eq!(single("512B", &[Unit::Size]).value(), 512.0);
        assert_eq!(single("1kB", &[Unit::Size]).value(), 1024.0);
        assert_eq!(single("1MB", &[Unit::Size]).value(), 1048576.0);
        assert_eq!(single("1.5gb", &[Unit::Size]).value(), 1.5 * 1024.0 * 1024.0 * 1024.0);
        assert_eq!(single("2TB", &[Unit::Size]).value(), 2.0 * 1024f64.powi(4));
        assert_eq!(single("1PB", &[Unit::Size]).value(), 1024f64.powi(5));
    }

    #[test]
    fn test_bare_number_resolution() {
        assert_eq!(single("12", &Unit::ALL).unit(), Unit::Count);
        assert_eq!(single("4096", &[Unit::Size]), Threshold::new(4096.0, Unit::Size));
        assert_eq!(single("600", &[Unit::Duration]), Threshold::new(600.0, Unit::Duration));
    }

    #[test]
    fn test_composite() {
        let spec = parse("1MB, 5MB", &[Unit::Size]).unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.get(0).unwrap().value(), 1048576.0);
        assert_eq!(spec.get(1).unwrap().value(), 5.0 * 1048576.0);
    }

    #[test]
    fn test_percent_only_rejects_other_units() {
        for raw in ["90", "10s", "1MB", "80%,90"] {
            let err = parse(raw, &[Unit::Percent]).unwrap_err();
            assert!(
                matches!(err, ThresholdError::UnitNotAllowed { .. }),
                "{raw}: {err:?}"
            );
        }
    }

    #[test]
    fn test_invalid_input() {
        assert_eq!(parse("", &Unit::ALL), Err(ThresholdError::Empty));
        assert_eq!(parse("10,", &Unit::ALL), Err(ThresholdError::Empty));
        assert!(matches!(
            parse("abc", &Unit::ALL),
            Err(ThresholdError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse("1.2.3MB", &Unit::ALL),
            Err(ThresholdError::InvalidNumber(_))
        ));
        assert!(matches!(
            parse("10parsecs", &Unit::ALL),
            Err(ThresholdError::UnknownSuffix(_))
        ));
        assert!(matches!(
            parse("120%", &Unit::ALL),
            Err(ThresholdError::PercentOutOfRange(_))
        ));
        assert!(matches!(
            parse("-5s", &Unit::ALL),
            Err(ThresholdError::Negative(_))
        ));
    }

    #[test]
    fn test_display_round_trip() {
        let samples = [
            Threshold::new(0.0, Unit::Count),
            Threshold::new(-3.0, Unit::Count),
            Threshold::new(17.25, Unit::Count),
            Threshold::new(0.0, Unit::Percent),
            Threshold::new(99.9, Unit::Percent),
            Threshold::new(100.0, Unit::Percent),
            Threshold::new(0.5, Unit::Duration),
            Threshold::new(86400.0, Unit::Duration),
            Threshold::new(1.0, Unit::Size),
            Threshold::new(1048576.0, Unit::Size),
            Threshold::new(1024f64.powi(5) * 3.0, Unit::Size),
        ];
        for t in samples {
            let text = t.to_string();
            assert_eq!(single(&text, &Unit::ALL), t, "{text}");
        }
    }

    #[test]
    fn test_parse_pair_policy() {
        const UNITS: &[Unit] = &[Unit::Duration];
        let policy = ThresholdPolicy::new(UNITS).required();

        let t = parse_pair(Some("5m"), Some("10m"), &policy).unwrap();
        assert_eq!(t.warning_at(0).unwrap().value(), 300.0);
        assert_eq!(t.critical_at(0).unwrap().value(), 600.0);

        assert_eq!(
            parse_pair(Some("5m"), None, &policy),
            Err(ThresholdError::Missing("critical"))
        );
        assert_eq!(
            parse_pair(None, Some("5m"), &policy),
            Err(ThresholdError::Missing("warning"))
        );
    }

    #[test]
    fn test_parse_pair_arity() {
        const UNITS: &[Unit] = &[Unit::Size];
        let policy = ThresholdPolicy::new(UNITS).arity(2);

        let t = parse_pair(Some("1MB,2MB"), None, &policy).unwrap();
        assert!(t.critical.is_none());
        assert_eq!(t.warning_at(1).unwrap().value(), 2097152.0);

        let err = parse_pair(Some("1MB"), None, &policy).unwrap_err();
        assert!(matches!(err, ThresholdError::Arity { expected: 2, found: 1, .. }));
    }
}
