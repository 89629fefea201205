//! PostgreSQL-backed [`QueryExecutor`].

use postgres::{Client, NoTls, SimpleQueryMessage};
use tracing::debug;

use super::{QueryError, QueryExecutor, Row};

/// Connection parameters.
///
/// Defaults come from the standard libpq environment variables:
/// - PGHOST (default: localhost)
/// - PGPORT (default: 5432)
/// - PGUSER (default: $USER)
/// - PGPASSWORD (default: empty)
/// - PGDATABASE (default: same as PGUSER)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
}

impl ConnectionSettings {
    pub fn from_env() -> Result<Self, QueryError> {
        let user = std::env::var("PGUSER")
            .or_else(|_| std::env::var("USER"))
            .map_err(|_| QueryError::Connection("PGUSER or USER not set".to_string()))?;
        let host = std::env::var("PGHOST").unwrap_or_else(|_| "localhost".to_string());
        let port = match std::env::var("PGPORT") {
            Ok(p) => p
                .parse()
                .map_err(|_| QueryError::Connection(format!("invalid PGPORT '{}'", p)))?,
            Err(_) => 5432,
        };
        let password = std::env::var("PGPASSWORD").ok().filter(|p| !p.is_empty());
        let dbname = std::env::var("PGDATABASE").unwrap_or_else(|_| user.clone());

        Ok(Self {
            host,
            port,
            user,
            password,
            dbname,
        })
    }

    /// libpq key/value connection string.
    pub fn to_conninfo(&self) -> String {
        let mut parts = vec![
            format!("host={}", quote(&self.host)),
            format!("port={}", self.port),
            format!("user={}", quote(&self.user)),
            format!("dbname={}", quote(&self.dbname)),
            "application_name=pgprobe".to_string(),
        ];
        if let Some(password) = &self.password {
            parts.push(format!("password={}", quote(password)));
        }
        parts.join(" ")
    }
}

/// Quotes a conninfo value when it contains spaces, quotes or backslashes.
fn quote(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

pub struct PgExecutor {
    client: Client,
    server_version_num: Option<u32>,
}

impl PgExecutor {
    pub fn connect(settings: &ConnectionSettings) -> Result<Self, QueryError> {
        let client = Client::connect(&settings.to_conninfo(), NoTls)
            .map_err(|e| QueryError::Connection(format_postgres_error(&e)))?;
        debug!(host = %settings.host, port = settings.port, dbname = %settings.dbname, "connected");
        Ok(Self {
            client,
            server_version_num: None,
        })
    }
}

impl QueryExecutor for PgExecutor {
    fn server_version_num(&mut self) -> Result<u32, QueryError> {
        if let Some(v) = self.server_version_num {
            return Ok(v);
        }
        let rows = self.query("SHOW server_version_num")?;
        let row = rows
            .first()
            .ok_or_else(|| {
                QueryError::Query("SHOW server_version_num returned no row".to_string())
            })?;
        let version = u32::try_from(row.get_i64(0)?).map_err(|_| QueryError::InvalidValue {
            column: 0,
            value: row.get_str(0).unwrap_or_default().to_string(),
            expected: "server version",
        })?;
        self.server_version_num = Some(version);
        Ok(version)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, QueryError> {
        let messages = self
            .client
            .simple_query(sql)
            .map_err(|e| QueryError::Query(format_postgres_error(&e)))?;
        let rows: Vec<Row> = messages
            .iter()
            .filter_map(|m| match m {
                SimpleQueryMessage::Row(r) => Some(Row::new(
                    (0..r.len()).map(|i| r.get(i).map(str::to_string)).collect(),
                )),
                _ => None,
            })
            .collect();
        debug!(rows = rows.len(), sql, "query executed");
        Ok(rows)
    }
}

/// Error text for the UNKNOWN status line: server errors keep their severity
/// and message, client-side failures are reduced to their usual cause.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        return format!("{}: {}", db_error.severity(), db_error.message());
    }
    client_error_cause(e.to_string())
}

fn client_error_cause(text: String) -> String {
    const KNOWN_CAUSES: [(&str, &str); 3] = [
        ("Connection refused", "connection refused"),
        ("password authentication failed", "password authentication failed"),
        ("timed out", "connection timed out"),
    ];
    KNOWN_CAUSES
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map(|(_, cause)| cause.to_string())
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            host: "db.local".to_string(),
            port: 5433,
            user: "monitor".to_string(),
            password: None,
            dbname: "postgres".to_string(),
        }
    }

    #[test]
    fn test_conninfo() {
        assert_eq!(
            settings().to_conninfo(),
            "host=db.local port=5433 user=monitor dbname=postgres application_name=pgprobe"
        );
    }

    #[test]
    fn test_conninfo_quotes_values() {
        let mut s = settings();
        s.password = Some("it's secret".to_string());
        s.dbname = String::new();
        let conninfo = s.to_conninfo();
        assert!(conninfo.contains("dbname=''"));
        assert!(conninfo.ends_with("password='it\\'s secret'"));
    }

    #[test]
    fn test_client_error_cause() {
        assert_eq!(
            client_error_cause(
                "error connecting to server: Connection refused (os error 111)".to_string()
            ),
            "connection refused"
        );
        assert_eq!(
            client_error_cause("error performing TLS handshake: timed out".to_string()),
            "connection timed out"
        );
        assert_eq!(
            client_error_cause("unexpected message from server".to_string()),
            "unexpected message from server"
        );
    }
}
