//! Formatting helpers for human-readable check messages.
//!
//! Perfdata never goes through these: it always carries raw base-unit values.

/// Byte amount shown in check messages, e.g. replication lag (`"60.0M"`) or
/// temp file throughput (`"2.0M"` per second). Below 1K the exact count is kept.
pub fn format_bytes(bytes: u64) -> String {
    const SCALES: [(u64, &str); 3] = [(1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];
    SCALES
        .iter()
        .find(|(scale, _)| bytes >= *scale)
        .map(|(scale, suffix)| format!("{:.1}{}", bytes as f64 / *scale as f64, suffix))
        .unwrap_or_else(|| format!("{}B", bytes))
}

/// Archive age in archive_folder messages, as its two most significant units
/// (`"3m5s"`, `"2h10m"`, `"1d4h"`). Negative ages render as `"-"`.
pub fn format_duration(secs: i64) -> String {
    const SCALES: [(i64, &str, i64, &str); 3] =
        [(86400, "d", 3600, "h"), (3600, "h", 60, "m"), (60, "m", 1, "s")];
    if secs < 0 {
        return "-".to_string();
    }
    for (major, major_unit, minor, minor_unit) in SCALES {
        if secs >= major {
            return format!(
                "{}{}{}{}",
                secs / major,
                major_unit,
                (secs % major) / minor,
                minor_unit
            );
        }
    }
    format!("{}s", secs)
}

/// Format a perfdata number: integers without a fraction, otherwise at most
/// three decimals with trailing zeros trimmed. NaN renders as `"NaN"`.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" { "0".to_string() } else { s.to_string() }
}
