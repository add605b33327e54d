//! Error types for querydb.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every failure is returned to the caller; nothing in the library aborts the process.
//! Statement failures carry the rendered [`Statement`] so a log sink can show the exact
//! SQL that failed without re-deriving it.

use crate::models::Statement;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database configuration not found: {name}")]
    ConfigNotFound { name: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "1062" for a MySQL duplicate key
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Statement failed: {source} [sql: {}, costtime: {:?}]", .statement.render(), .statement.cost_time)]
    Statement {
        source: Box<DbError>,
        statement: Statement,
    },

    #[error("No table set: call table() before building a statement")]
    MissingTable,

    #[error("Refusing to build {operation} without a WHERE clause")]
    MissingWhere { operation: &'static str },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Transaction already closed by commit or rollback")]
    TransactionClosed,

    #[error("No active transaction on this connection")]
    NotInTransaction,

    #[error("Multi-insert stopped after {} row(s): {source}", .inserted_ids.len())]
    MultiInsert {
        inserted_ids: Vec<i64>,
        source: Box<DbError>,
    },

    #[error("Timeout: {operation} exceeded {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a configuration-not-found error.
    pub fn config_not_found(name: impl Into<String>) -> Self {
        Self::ConfigNotFound { name: name.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Wrap a failure with the statement that caused it.
    pub fn statement(source: impl Into<DbError>, statement: Statement) -> Self {
        Self::Statement {
            source: Box::new(source.into()),
            statement,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Statement { source, .. } | Self::MultiInsert { source, .. } => {
                source.suggestion()
            }
            _ => None,
        }
    }

    /// The statement attached to this error, if it came from the driver.
    pub fn last_statement(&self) -> Option<&Statement> {
        match self {
            Self::Statement { statement, .. } => Some(statement),
            Self::MultiInsert { source, .. } => source.last_statement(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::Statement { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Builder misuse detected before any driver call.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::MissingTable | Self::MissingWhere { .. } | Self::InvalidInput { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the database configuration and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => {
                DbError::timeout("connection pool acquire", Duration::from_secs(30))
            }
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database("Syntax error", Some("1064".to_string()), "Check SQL syntax");
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_timeout_display_keeps_sub_second_limits() {
        let err = DbError::timeout("statement execution", Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "Timeout: statement execution exceeded 250ms"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("query", Duration::from_secs(30)).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::MissingTable.is_retryable());
    }

    #[test]
    fn test_usage_errors() {
        assert!(DbError::MissingTable.is_usage_error());
        assert!(DbError::MissingWhere { operation: "UPDATE" }.is_usage_error());
        assert!(!DbError::TransactionClosed.is_usage_error());
        assert!(!DbError::config_not_found("main").is_usage_error());
    }

    #[test]
    fn test_statement_error_carries_rendered_sql() {
        let statement = Statement::new(
            "DELETE FROM ott_video WHERE id=?",
            vec![Value::from(7)],
        );
        let err = DbError::statement(
            DbError::database("Lock wait timeout", Some("1205".to_string()), "Retry"),
            statement,
        );

        let text = err.to_string();
        assert!(text.contains("Lock wait timeout"));
        assert!(text.contains("DELETE FROM ott_video WHERE id=7"));
        assert_eq!(err.suggestion(), Some("Retry"));
        assert_eq!(
            err.last_statement().map(|s| s.sql.as_str()),
            Some("DELETE FROM ott_video WHERE id=?")
        );
    }

    #[test]
    fn test_multi_insert_error_keeps_ids() {
        let err = DbError::MultiInsert {
            inserted_ids: vec![1, 2],
            source: Box::new(DbError::internal("boom")),
        };
        assert!(err.to_string().contains("after 2 row(s)"));
    }
}
