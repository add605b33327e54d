//! Statement execution against any sqlx executor.
//!
//! Each backend submodule exposes the same functions, generic over the executor so
//! the same code runs on a pool (`&MySqlPool`) or on a pinned connection
//! (`&mut MySqlConnection`) inside a transaction:
//! - `execute`: bind and run a write, returning affected rows and the generated id
//! - `fetch`: bind and run a query, decoding every row
//! - `prepare`: prepare a statement without running it
//! - `run_raw`: send an unparameterized control statement (BEGIN, COMMIT, ...)
//!
//! The code structure is parallel across backends to make differences obvious.

use crate::db::types::collect_rows;
use crate::error::{DbError, DbResult};
use crate::models::{ExecResult, Rows, Value};
use futures_util::TryStreamExt;
use sqlx::Executor;

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_value;
    use sqlx::MySql;

    pub async fn execute<'c, E>(executor: E, sql: &str, args: &[Value]) -> DbResult<ExecResult>
    where
        E: Executor<'c, Database = MySql>,
    {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_mysql_value(query, arg);
        }
        let result = query.execute(executor).await.map_err(DbError::from)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: insert_id(result.last_insert_id())?,
        })
    }

    /// MySQL reports ids as `u64`; ids above `i64::MAX` cannot be returned.
    pub(super) fn insert_id(raw: u64) -> DbResult<i64> {
        i64::try_from(raw).map_err(|_| {
            DbError::internal(format!("Insert id {} does not fit in i64", raw))
        })
    }

    pub async fn fetch<'c, E>(executor: E, sql: &str, args: &[Value]) -> DbResult<Rows>
    where
        E: Executor<'c, Database = MySql>,
    {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_mysql_value(query, arg);
        }
        let rows: Vec<_> = query.fetch(executor).try_collect().await.map_err(DbError::from)?;
        Ok(collect_rows(&rows))
    }

    pub async fn prepare<'c, E>(executor: E, sql: &str) -> DbResult<()>
    where
        E: Executor<'c, Database = MySql>,
    {
        executor.prepare(sql).await.map_err(DbError::from)?;
        Ok(())
    }

    pub async fn run_raw<'c, E>(executor: E, sql: &str) -> DbResult<()>
    where
        E: Executor<'c, Database = MySql>,
    {
        executor.execute(sql).await.map_err(DbError::from)?;
        Ok(())
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_value;
    use sqlx::Sqlite;

    pub async fn execute<'c, E>(executor: E, sql: &str, args: &[Value]) -> DbResult<ExecResult>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_sqlite_value(query, arg);
        }
        let result = query.execute(executor).await.map_err(DbError::from)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    pub async fn fetch<'c, E>(executor: E, sql: &str, args: &[Value]) -> DbResult<Rows>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for arg in args {
            query = bind_sqlite_value(query, arg);
        }
        let rows: Vec<_> = query.fetch(executor).try_collect().await.map_err(DbError::from)?;
        Ok(collect_rows(&rows))
    }

    pub async fn prepare<'c, E>(executor: E, sql: &str) -> DbResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        executor.prepare(sql).await.map_err(DbError::from)?;
        Ok(())
    }

    pub async fn run_raw<'c, E>(executor: E, sql: &str) -> DbResult<()>
    where
        E: Executor<'c, Database = Sqlite>,
    {
        executor.execute(sql).await.map_err(DbError::from)?;
        Ok(())
    }
}
