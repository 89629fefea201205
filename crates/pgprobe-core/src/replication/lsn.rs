use std::fmt;
use std::str::FromStr;

/// WAL position in `high/low` form, as reported by `pg_stat_replication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn {
    pub high: u32,
    pub low: u32,
}

impl Lsn {
    pub fn new(high: u32, low: u32) -> Self {
        Self { high, low }
    }

    pub fn to_u64(self) -> u64 {
        (u64::from(self.high) << 32) | u64::from(self.low)
    }

    pub fn from_u64(value: u64) -> Self {
        Self {
            high: (value >> 32) as u32,
            low: value as u32,
        }
    }

    /// Bytes between `self` and an older position; 0 if `older` is ahead.
    pub fn bytes_since(self, older: Lsn) -> u64 {
        self.to_u64().saturating_sub(older.to_u64())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsnParseError {
    pub input: String,
}

impl fmt::Display for LsnParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid LSN '{}', expected <hex>/<hex>", self.input)
    }
}

impl std::error::Error for LsnParseError {}

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || LsnParseError {
            input: s.to_string(),
        };
        let (high, low) = s.trim().split_once('/').ok_or_else(err)?;
        let half = |part: &str| {
            if part.is_empty() || part.len() > 8 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            u32::from_str_radix(part, 16).map_err(|_| err())
        };
        Ok(Lsn::new(half(high)?, half(low)?))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.high, self.low)
    }
}
