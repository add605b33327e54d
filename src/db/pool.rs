//! Pooled handles.
//!
//! A [`DbPool`] is the driver-level pool behind every non-transaction
//! connection. Backend-specific pools are used instead of `AnyPool` so that
//! values keep their full type support.

use crate::config::{DatabaseConfig, DatabaseType};
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use sqlx::pool::PoolOptions as SqlxPoolOptions;
use sqlx::{
    MySqlPool, SqlitePool, mysql::MySqlConnectOptions, sqlite::SqliteConnectOptions,
};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Open a pool for one server described by `config` (replicas are ignored).
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let is_sqlite = config.driver == DatabaseType::SQLite;
        let pool_opts = &config.pool;

        debug!(
            driver = %config.driver,
            dsn = %config.masked_dsn(),
            max_connections = pool_opts.max_connections_or_default(is_sqlite),
            min_connections = pool_opts.min_connections_or_default(is_sqlite),
            max_lifetime = ?pool_opts.max_lifetime(),
            "Opening connection pool"
        );

        let connect_error = |e: sqlx::Error| {
            DbError::connection(
                format!("Failed to connect to {}: {}", config.masked_dsn(), e),
                connection_suggestion(config.driver, &e),
            )
        };

        match config.driver {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.username)
                    .password(&config.password)
                    .database(&config.database)
                    .charset(&config.charset);
                let pool = pool_options(config)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DbPool::MySql(pool))
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::new()
                    .filename(&config.database)
                    .create_if_missing(true);
                let pool = pool_options(config)
                    .connect_with(options)
                    .await
                    .map_err(connect_error)?;
                Ok(DbPool::SQLite(pool))
            }
        }
    }

    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            SQLite(pool) => pool.close().await,
        })
    }

    pub fn is_closed(&self) -> bool {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.is_closed(),
            SQLite(pool) => pool.is_closed(),
        })
    }

    /// Physical connections currently open (idle or in use).
    pub fn size(&self) -> u32 {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.size(),
            SQLite(pool) => pool.size(),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Server version string, or `None` if the probe fails.
    pub async fn server_version(&self) -> Option<String> {
        let result = impl_db_dispatch!(self, {
            MySql(pool) => sqlx::query_scalar::<_, String>("SELECT version()")
                .fetch_one(pool)
                .await,
            SQLite(pool) => sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                .fetch_one(pool)
                .await,
        });
        match result {
            Ok(version) => {
                debug!(version = %version, "Got server version");
                Some(version)
            }
            Err(e) => {
                warn!(error = %e, "Failed to get server version");
                None
            }
        }
    }
}

/// Driver pool settings; tuning values apply only when positive.
fn pool_options<DB: sqlx::Database>(config: &DatabaseConfig) -> SqlxPoolOptions<DB> {
    let is_sqlite = config.driver == DatabaseType::SQLite;
    let pool_opts = &config.pool;
    let options = SqlxPoolOptions::<DB>::new()
        .max_connections(pool_opts.max_connections_or_default(is_sqlite))
        .min_connections(pool_opts.min_connections_or_default(is_sqlite))
        .acquire_timeout(Duration::from_secs(pool_opts.acquire_timeout_or_default()))
        .idle_timeout(Some(Duration::from_secs(
            pool_opts.idle_timeout_or_default(),
        )))
        .test_before_acquire(pool_opts.test_before_acquire_or_default());
    match pool_opts.max_lifetime() {
        Some(lifetime) => options.max_lifetime(Some(lifetime)),
        None => options,
    }
}

/// Generate a helpful suggestion for connection errors.
pub(crate) fn connection_suggestion(db_type: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("access denied") || error_str.contains("password") {
        return "Verify the username and password in the database configuration".to_string();
    }

    if error_str.contains("unknown database") || error_str.contains("unable to open") {
        return "Check that the database exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::MySQL => {
            "Verify host, port and credentials: user:pass@tcp(host:3306)/db".to_string()
        }
        DatabaseType::SQLite => {
            "Verify the file path is writable: sqlite:path/to/db.sqlite".to_string()
        }
    }
}

pub(crate) fn log_connected(label: &str, pool: &DbPool, server_version: Option<&str>) {
    info!(
        connection = %label,
        driver = %pool.db_type(),
        server_version = ?server_version,
        "Connected successfully"
    );
}
