//! Parameter binding for statement arguments.
//!
//! Nullable scalars bind as typed `Option`s so the driver sends a real typed NULL;
//! their debug rendering lives in [`crate::models::value`] and never reaches here.

use crate::models::{NullableScalar, Value};
use sqlx::mysql::MySqlArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::{MySql, Sqlite};

/// Bind an argument to a MySQL query.
pub(crate) fn bind_mysql_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Time(v) => query.bind(*v),
        Value::Nullable(n) => match n {
            NullableScalar::Null => query.bind(None::<String>),
            NullableScalar::String(v) => query.bind(Some(v.as_str())),
            NullableScalar::Int32(v) => query.bind(Some(*v)),
            NullableScalar::Int64(v) => query.bind(Some(*v)),
            NullableScalar::Float64(v) => query.bind(Some(*v)),
            NullableScalar::Bool(v) => query.bind(Some(*v)),
            NullableScalar::Time(v) => query.bind(Some(*v)),
        },
    }
}

/// Bind an argument to a SQLite query.
pub(crate) fn bind_sqlite_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        // SQLite has no native datetime type; chrono encodes as TEXT
        Value::Time(v) => query.bind(*v),
        Value::Nullable(n) => match n {
            NullableScalar::Null => query.bind(None::<String>),
            NullableScalar::String(v) => query.bind(Some(v.as_str())),
            NullableScalar::Int32(v) => query.bind(Some(*v)),
            NullableScalar::Int64(v) => query.bind(Some(*v)),
            NullableScalar::Float64(v) => query.bind(Some(*v)),
            NullableScalar::Bool(v) => query.bind(Some(*v)),
            NullableScalar::Time(v) => query.bind(Some(*v)),
        },
    }
}
