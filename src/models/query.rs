//! Query result models.
//!
//! This module defines what `execute` and `query` hand back to callers.

use crate::error::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A decoded result row: column name to JSON value.
pub type Row = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// Database-specific type (e.g., "BIGINT", "VARCHAR", "TEXT")
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnMetadata {
    /// Create new column metadata.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Id generated by the last INSERT on the connection that ran the statement.
    pub last_insert_id: i64,
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<ColumnMetadata>,
    pub rows: Vec<Row>,
}

impl Rows {
    /// Get the number of rows in the result.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Deserialize every row into `T` by column name.
    pub fn deserialize<T: DeserializeOwned>(&self) -> DbResult<Vec<T>> {
        self.rows
            .iter()
            .map(|row| {
                serde_json::from_value(JsonValue::Object(row.clone())).map_err(|e| {
                    DbError::invalid_input(format!("Row does not match target type: {}", e))
                })
            })
            .collect()
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}
