//! PostgreSQL sink.
//!
//! Holds a single connection for the whole run. The OAuth token is resolved
//! when the sink opens, either as the connection password or as a session
//! setting after a password login.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgSslMode};
use sqlx::query::Query;
use sqlx::{Connection, Postgres};

use super::{oauth, sql, BatchOutcome, RowSink};
use crate::config::{Config, DatabaseConfig, OAuthConfig, SslMode, TargetConfig, TokenUsage};
use crate::error::{LoadError, LoadResult};
use crate::logs::{log_info, log_success};
use crate::transform::{ColumnType, Schema, TransformedRow, Value};

/// SQLSTATE class for invalid authorization.
const AUTH_SQLSTATE_CLASS: &str = "28";

const APPLICATION_NAME: &str = "pgload";

/// Writes rows to a PostgreSQL table.
pub struct PgSink {
    database: DatabaseConfig,
    oauth: OAuthConfig,
    target: TargetConfig,
    conn: Option<PgConnection>,
    statement: String,
}

impl PgSink {
    pub fn new(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            oauth: config.oauth.clone(),
            target: config.target.clone(),
            conn: None,
            statement: String::new(),
        }
    }

    fn connect_options(&self, token: &str) -> LoadResult<PgConnectOptions> {
        let db = &self.database;
        let mut options = match &db.url {
            Some(url) => PgConnectOptions::from_str(url).map_err(|e| LoadError::Unreachable {
                target: db.target_label(),
                message: format!("invalid database url: {}", e),
            })?,
            None => PgConnectOptions::new(),
        };

        if let Some(host) = &db.host {
            options = options.host(host);
        }
        if let Some(port) = db.port {
            options = options.port(port);
        }
        if let Some(name) = &db.name {
            options = options.database(name);
        }
        if let Some(user) = &db.user {
            options = options.username(user);
        }

        options = match self.oauth.usage {
            TokenUsage::Password => options.password(token),
            TokenUsage::Session => match &db.password {
                Some(password) => options.password(password),
                None => options,
            },
        };

        Ok(options.ssl_mode(pg_ssl_mode(db.ssl_mode)).application_name(APPLICATION_NAME))
    }

    async fn connect(&self, options: &PgConnectOptions) -> LoadResult<PgConnection> {
        let target = self.database.target_label();
        let timeout = Duration::from_secs(self.database.connect_timeout_secs);

        match tokio::time::timeout(timeout, PgConnection::connect_with(options)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(map_connect_error(e, &target)),
            Err(_) => Err(LoadError::Unreachable {
                target,
                message: format!("connection timed out after {}s", timeout.as_secs()),
            }),
        }
    }

    fn connection(&mut self) -> LoadResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| LoadError::ConnectionLost("not connected".to_string()))
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn map_connect_error(e: sqlx::Error, target: &str) -> LoadError {
    let auth_failure = sqlstate(&e).is_some_and(|code| code.starts_with(AUTH_SQLSTATE_CLASS));
    if auth_failure {
        LoadError::Authentication { target: target.to_string(), message: e.to_string() }
    } else {
        LoadError::Unreachable { target: target.to_string(), message: e.to_string() }
    }
}

fn map_write_error(e: sqlx::Error, row: usize) -> LoadError {
    if let sqlx::Error::Database(db) = &e {
        return LoadError::Rejected {
            row,
            code: db.code().map(|c| c.into_owned()),
            message: db.message().to_string(),
        };
    }

    let broken = matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    );
    if broken {
        LoadError::ConnectionLost(e.to_string())
    } else {
        LoadError::Rejected { row, code: None, message: e.to_string() }
    }
}

fn connection_lost(e: sqlx::Error) -> LoadError {
    LoadError::ConnectionLost(e.to_string())
}

/// Bind a row's values in column order. NULLs are typed from the column.
fn bind_row<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    row: &TransformedRow,
) -> Query<'q, Postgres, PgArguments> {
    for (spec, value) in row.iter() {
        query = match value {
            Value::Null => match spec.kind {
                ColumnType::Text => query.bind(None::<String>),
                ColumnType::Integer => query.bind(None::<i64>),
                ColumnType::Float => query.bind(None::<f64>),
                ColumnType::Boolean => query.bind(None::<bool>),
                ColumnType::Date => query.bind(None::<NaiveDate>),
                ColumnType::Timestamp => query.bind(None::<NaiveDateTime>),
            },
            Value::Text(s) => query.bind(s.clone()),
            Value::Integer(n) => query.bind(*n),
            Value::Float(x) => query.bind(*x),
            Value::Boolean(b) => query.bind(*b),
            Value::Date(d) => query.bind(*d),
            Value::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

#[async_trait]
impl RowSink for PgSink {
    async fn open(&mut self, schema: &Schema) -> LoadResult<()> {
        let token = oauth::resolve_token(&self.oauth).await?;
        let options = self.connect_options(&token)?;

        log_info(format!("Connecting to {}...", self.database.target_label()));
        let mut conn = self.connect(&options).await?;

        if self.oauth.usage == TokenUsage::Session {
            sqlx::query("SELECT set_config($1, $2, false)")
                .bind(self.oauth.session_setting.as_str())
                .bind(token.as_str())
                .execute(&mut conn)
                .await
                .map_err(|e| LoadError::Authentication {
                    target: self.database.target_label(),
                    message: format!("cannot set '{}': {}", self.oauth.session_setting, e),
                })?;
        }

        self.statement = sql::build_insert(schema, &self.target);
        tracing::debug!("Insert statement: {}", self.statement);
        self.conn = Some(conn);

        log_success(format!(
            "Connected, writing to {}",
            self.target.qualified_name()
        ));
        Ok(())
    }

    async fn write_row(&mut self, row: &TransformedRow) -> LoadResult<()> {
        let query = bind_row(sqlx::query(&self.statement), row);
        let conn = self.conn.as_mut().ok_or_else(|| LoadError::ConnectionLost("not connected".to_string()))?;
        query.execute(conn).await.map_err(|e| map_write_error(e, row.index()))?;
        Ok(())
    }

    /// One transaction per batch with a savepoint around every row.
    async fn write_batch(&mut self, rows: &[TransformedRow]) -> LoadResult<BatchOutcome> {
        let statement = self.statement.clone();
        let conn = self.connection()?;
        let mut tx = conn.begin().await.map_err(connection_lost)?;

        let mut outcome = BatchOutcome::default();
        for row in rows {
            sqlx::query("SAVEPOINT pgload_row")
                .execute(&mut *tx)
                .await
                .map_err(connection_lost)?;

            match bind_row(sqlx::query(&statement), row).execute(&mut *tx).await {
                Ok(_) => {
                    sqlx::query("RELEASE SAVEPOINT pgload_row")
                        .execute(&mut *tx)
                        .await
                        .map_err(connection_lost)?;
                    outcome.committed.push(row.index());
                }
                Err(e) => {
                    let err = map_write_error(e, row.index());
                    if err.is_fatal() {
                        return Err(err);
                    }
                    sqlx::query("ROLLBACK TO SAVEPOINT pgload_row")
                        .execute(&mut *tx)
                        .await
                        .map_err(connection_lost)?;
                    outcome.rejected.push(err);
                }
            }
        }

        if let Err(e) = tx.commit().await {
            let Some(code) = sqlstate(&e) else {
                return Err(connection_lost(e));
            };
            tracing::warn!("Batch commit failed: {}", e);
            let message = format!("batch commit failed: {}", e);
            for index in outcome.committed.drain(..) {
                outcome.rejected.push(LoadError::Rejected {
                    row: index,
                    code: Some(code.clone()),
                    message: message.clone(),
                });
            }
            outcome.rejected.sort_by_key(|e| match e {
                LoadError::Rejected { row, .. } => *row,
                _ => 0,
            });
        }

        Ok(outcome)
    }

    async fn close(&mut self) -> LoadResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await.map_err(connection_lost)?;
            tracing::debug!("Connection to {} closed", self.database.target_label());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(usage: &str) -> PgSink {
        let yaml = format!(
            r#"
source: {{ path: data.csv }}
database:
  host: db.example.com
  port: 5433
  name: ledger
  user: loader
  password: hunter2
  ssl_mode: verify-full
oauth: {{ token: tok, usage: {} }}
target: {{ table: transactions }}
"#,
            usage
        );
        let config = Config::from_yaml_str_with_env(&yaml, |_| None).unwrap();
        PgSink::new(&config)
    }

    #[test]
    fn test_token_as_password() {
        let options = sink("password").connect_options("tok").unwrap();
        assert_eq!(options.get_host(), "db.example.com");
        assert_eq!(options.get_port(), 5433);
        assert_eq!(options.get_database(), Some("ledger"));
        assert_eq!(options.get_username(), "loader");
        assert!(matches!(options.get_ssl_mode(), PgSslMode::VerifyFull));
    }

    #[test]
    fn test_url_is_base() {
        let yaml = r#"
source: { path: data.csv }
database:
  url: postgresql://u:p@localhost:5432/mydatabase
  name: other
oauth: { token: tok }
"#;
        let config = Config::from_yaml_str_with_env(yaml, |_| None).unwrap();
        let options = PgSink::new(&config).connect_options("tok").unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("other"));
        assert_eq!(options.get_username(), "u");
    }

    #[test]
    fn test_connect_error_mapping() {
        let err = map_connect_error(sqlx::Error::PoolTimedOut, "h:5432/db");
        assert!(matches!(err, LoadError::Unreachable { .. }));
        assert!(err.is_fatal());

        let err = map_write_error(sqlx::Error::WorkerCrashed, 4);
        assert!(matches!(err, LoadError::ConnectionLost(_)));
        let err = map_write_error(sqlx::Error::ColumnNotFound("x".into()), 4);
        assert!(matches!(err, LoadError::Rejected { row: 4, .. }));
    }

    #[tokio::test]
    async fn test_write_before_open_is_fatal() {
        let mut sink = sink("password");
        let schema = std::sync::Arc::new(Schema::default());
        let row = TransformedRow::new(1, schema, Vec::new());
        let err = sink.write_row(&row).await.unwrap_err();
        assert!(matches!(err, LoadError::ConnectionLost(_)));
        sink.close().await.unwrap();
    }
}
