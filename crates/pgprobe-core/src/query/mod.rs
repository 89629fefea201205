//! Query execution seam between checks and the database.
//!
//! Checks only see [`QueryExecutor`]: production code passes a
//! [`PgExecutor`], tests pass a [`MockExecutor`] with canned rows.

pub mod mock;
mod pg;

pub use mock::MockExecutor;
pub use pg::{ConnectionSettings, PgExecutor};

use std::fmt;
use std::str::FromStr;

use crate::replication::Lsn;

/// Error type for query execution.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Connection could not be established.
    Connection(String),
    /// Query execution failed.
    Query(String),
    /// Row has fewer columns than requested.
    MissingColumn(usize),
    /// Column is NULL where a value is required.
    Null(usize),
    /// Column text could not be converted.
    InvalidValue {
        column: usize,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Connection(msg) => write!(f, "PostgreSQL: {}", msg),
            QueryError::Query(msg) => write!(f, "PostgreSQL query error: {}", msg),
            QueryError::MissingColumn(idx) => write!(f, "result has no column {}", idx),
            QueryError::Null(idx) => write!(f, "unexpected NULL in column {}", idx),
            QueryError::InvalidValue {
                column,
                value,
                expected,
            } => write!(
                f,
                "column {}: '{}' is not a valid {}",
                column, value, expected
            ),
        }
    }
}

impl std::error::Error for QueryError {}

/// Executes SQL against the monitored server.
pub trait QueryExecutor {
    /// `server_version_num` of the connected server (e.g. `160002`).
    fn server_version_num(&mut self) -> Result<u32, QueryError>;

    /// Runs `sql` and returns every row as text cells.
    fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError>;
}

/// One result row in text form, as returned by the simple query protocol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<Option<String>>,
}

impl Row {
    pub fn new(cells: Vec<Option<String>>) -> Self {
        Self { cells }
    }

    /// Builds a row from string literals; `None` is SQL NULL.
    pub fn from_strs(cells: &[Option<&str>]) -> Self {
        Self {
            cells: cells.iter().map(|c| c.map(str::to_string)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Column text, `None` for NULL.
    pub fn get_opt(&self, idx: usize) -> Result<Option<&str>, QueryError> {
        self.cells
            .get(idx)
            .map(|c| c.as_deref())
            .ok_or(QueryError::MissingColumn(idx))
    }

    pub fn get_str(&self, idx: usize) -> Result<&str, QueryError> {
        self.get_opt(idx)?.ok_or(QueryError::Null(idx))
    }

    pub fn get_i64(&self, idx: usize) -> Result<i64, QueryError> {
        self.parse(idx, "integer")
    }

    pub fn get_f64(&self, idx: usize) -> Result<f64, QueryError> {
        self.parse(idx, "number")
    }

    pub fn get_bool(&self, idx: usize) -> Result<bool, QueryError> {
        match self.get_str(idx)? {
            "t" | "true" | "on" => Ok(true),
            "f" | "false" | "off" => Ok(false),
            other => Err(QueryError::InvalidValue {
                column: idx,
                value: other.to_string(),
                expected: "boolean",
            }),
        }
    }

    /// LSN column; NULL yields `None`.
    pub fn get_lsn(&self, idx: usize) -> Result<Option<Lsn>, QueryError> {
        self.get_opt(idx)?
            .map(|s| {
                s.parse::<Lsn>().map_err(|_| QueryError::InvalidValue {
                    column: idx,
                    value: s.to_string(),
                    expected: "LSN",
                })
            })
            .transpose()
    }

    fn parse<T: FromStr>(&self, idx: usize, expected: &'static str) -> Result<T, QueryError> {
        let s = self.get_str(idx)?;
        s.trim().parse().map_err(|_| QueryError::InvalidValue {
            column: idx,
            value: s.to_string(),
            expected,
        })
    }
}
