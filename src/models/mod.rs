//! Data models for querydb.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;
pub mod statement;
pub mod value;

// Re-export commonly used types
pub use query::{ColumnMetadata, ExecResult, Row, Rows};
pub use statement::{PLACEHOLDER, Statement};
pub use value::{DisplayForm, NULL_MARKER, NullableScalar, Value};
