//! pgprobe-core — evaluation core of the pgprobe PostgreSQL health checks.
//!
//! Provides:
//! - `threshold` — unit-aware threshold grammar (`80%`, `5m`, `1GB`, `10,20`)
//! - `evaluate` — severity computation against warning/critical thresholds
//! - `storage` — locked status file holding last observations for delta/rate checks
//! - `wal` — archived WAL segment naming and sequence validation
//! - `replication` — LSN arithmetic and standby lag evaluation
//! - `query` — injectable query execution (PostgreSQL client and in-memory mock)
//! - `check` — check registry, version negotiation and check results
//! - `fmt` — formatting helpers for result messages

pub mod check;
pub mod evaluate;
pub mod fmt;
pub mod query;
pub mod replication;
pub mod storage;
pub mod threshold;
pub mod wal;

pub use check::{CheckError, CheckId, CheckResult, CheckSettings, Perfdata};
pub use evaluate::{Direction, Severity, evaluate};
pub use threshold::{Threshold, ThresholdError, ThresholdSpec, Unit};
