//! In-memory [`QueryExecutor`] for testing checks without a server.

use super::{QueryError, QueryExecutor, Row};

/// Canned-response executor.
///
/// Each registered response is matched by a SQL fragment: the first
/// registration whose fragment occurs in the executed SQL answers the query.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    server_version_num: u32,
    responses: Vec<(String, Result<Vec<Row>, QueryError>)>,
    executed: Vec<String>,
}

impl MockExecutor {
    pub fn new(server_version_num: u32) -> Self {
        Self {
            server_version_num,
            ..Self::default()
        }
    }

    /// Answers queries containing `fragment` with `rows`.
    pub fn on(mut self, fragment: impl Into<String>, rows: Vec<Row>) -> Self {
        self.responses.push((fragment.into(), Ok(rows)));
        self
    }

    /// Fails queries containing `fragment`.
    pub fn on_error(mut self, fragment: impl Into<String>, message: impl Into<String>) -> Self {
        self.responses
            .push((fragment.into(), Err(QueryError::Query(message.into()))));
        self
    }

    /// Replaces the rows answered for `fragment`, e.g. between two check runs.
    pub fn set(&mut self, fragment: &str, rows: Vec<Row>) {
        match self.responses.iter_mut().find(|(f, _)| f == fragment) {
            Some((_, response)) => *response = Ok(rows),
            None => self.responses.push((fragment.to_string(), Ok(rows))),
        }
    }

    /// SQL text of every executed query, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

impl QueryExecutor for MockExecutor {
    fn server_version_num(&mut self) -> Result<u32, QueryError> {
        Ok(self.server_version_num)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError> {
        self.executed.push(sql.to_string());
        self.responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| Err(QueryError::Query(format!("no mock response for: {}", sql))))
    }
}
