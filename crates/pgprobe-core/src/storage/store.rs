use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fd_lock::{RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use super::StoreError;
use super::codec::{self, StatusData, StoredEntry};

/// Minimum elapsed time for a rate to be meaningful.
const MIN_RATE_ELAPSED_SECS: f64 = 1.0;

/// Last observation of one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub key: String,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

/// How [`MetricStore::delta`] combines the new value with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    /// `new - old`
    Difference,
    /// `(new - old) / elapsed_seconds`
    Rate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeltaValue {
    /// No previous observation to compare with.
    NoData,
    /// Previous observation too recent for a rate.
    Invalid,
    Value(f64),
}

impl DeltaValue {
    pub fn value(self) -> Option<f64> {
        match self {
            DeltaValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Value for evaluation and perfdata; NaN when unavailable.
    pub fn as_f64(self) -> f64 {
        self.value().unwrap_or(f64::NAN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub value: DeltaValue,
    pub first_observation: bool,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// Lock file guarding one status file.
///
/// The lock file is opened (and created if missing) here; the exclusive lock
/// itself is taken by [`StoreLock::acquire`] and held by the returned
/// [`MetricStore`] until it is dropped. The lock is an OS advisory lock on the
/// open descriptor, so process death releases it as well.
pub struct StoreLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl StoreLock {
    /// Opens the lock file for the status file at `path`.
    ///
    /// A missing lock file is recreated, also when the status file itself
    /// already exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let lock_path = with_suffix(&path, ".lock");
        if !lock_path.exists() && path.exists() {
            debug!(path = %lock_path.display(), "lock file missing, recreating");
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Blocks until the exclusive lock is held, then loads the status file.
    pub fn acquire(&mut self) -> Result<MetricStore<'_>, StoreError> {
        let guard = self.lock.write()?;
        let entries = load(&self.path)?;
        debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "status file loaded"
        );
        Ok(MetricStore {
            path: &self.path,
            entries,
            _guard: guard,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load(path: &Path) -> Result<BTreeMap<String, MetricSnapshot>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    let data = match codec::decode(&bytes) {
        Ok(d) => d,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable status file");
            return Ok(BTreeMap::new());
        }
    };

    let mut entries = BTreeMap::new();
    for e in data.entries {
        let Some(observed_at) = DateTime::from_timestamp(e.observed_secs, e.observed_nanos)
        else {
            warn!(key = %e.key, "dropping entry with out-of-range timestamp");
            continue;
        };
        entries.insert(
            e.key.clone(),
            MetricSnapshot {
                key: e.key,
                value: e.value,
                observed_at,
            },
        );
    }
    Ok(entries)
}

/// Locked, in-memory view of a status file.
///
/// Changes are only persisted by [`MetricStore::commit`].
pub struct MetricStore<'a> {
    path: &'a Path,
    entries: BTreeMap<String, MetricSnapshot>,
    _guard: RwLockWriteGuard<'a, File>,
}

impl MetricStore<'_> {
    pub fn get(&self, key: &str) -> Option<&MetricSnapshot> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: &str, value: f64, observed_at: DateTime<Utc>) {
        self.entries.insert(
            key.to_string(),
            MetricSnapshot {
                key: key.to_string(),
                value,
                observed_at,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry whose key `keep` rejects, e.g. databases that no
    /// longer exist.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let before = self.entries.len();
        self.entries.retain(|key, _| keep(key));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!(dropped, "stale status entries removed");
        }
    }

    /// Compares `new_value` with the stored observation for `key`.
    ///
    /// The new observation replaces the stored one, except when a rate is
    /// requested less than a second after the stored observation: the result
    /// is then [`DeltaValue::Invalid`] and the older baseline is kept.
    pub fn delta(
        &mut self,
        key: &str,
        new_value: f64,
        now: DateTime<Utc>,
        kind: DeltaKind,
    ) -> Delta {
        let Some(prev) = self.entries.get(key) else {
            self.put(key, new_value, now);
            return Delta {
                value: DeltaValue::NoData,
                first_observation: true,
            };
        };

        let diff = new_value - prev.value;
        let value = match kind {
            DeltaKind::Difference => DeltaValue::Value(diff),
            DeltaKind::Rate => {
                let elapsed = (now - prev.observed_at).num_microseconds().unwrap_or(i64::MAX)
                    as f64
                    / 1_000_000.0;
                if elapsed < MIN_RATE_ELAPSED_SECS {
                    debug!(key, elapsed, "previous observation too recent for a rate");
                    return Delta {
                        value: DeltaValue::Invalid,
                        first_observation: false,
                    };
                }
                DeltaValue::Value(diff / elapsed)
            }
        };

        self.put(key, new_value, now);
        Delta {
            value,
            first_observation: false,
        }
    }

    /// Writes the whole map back to the status file.
    ///
    /// The data goes to `<path>.tmp` first, is synced, then renamed over the
    /// status file.
    pub fn commit(&self) -> Result<(), StoreError> {
        let data = StatusData {
            entries: self
                .entries
                .values()
                .map(|s| StoredEntry {
                    key: s.key.clone(),
                    value: s.value,
                    observed_secs: s.observed_at.timestamp(),
                    observed_nanos: s.observed_at.timestamp_subsec_nanos(),
                })
                .collect(),
        };
        let bytes = codec::encode(&data)?;

        let tmp_path = with_suffix(self.path, ".tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, self.path)?;
        debug!(
            path = %self.path.display(),
            entries = data.entries.len(),
            "status file committed"
        );
        Ok(())
    }
}
