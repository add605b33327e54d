//! querydb library
//!
//! Pooled data access for MySQL (and SQLite) with primary/replica routing, a
//! fluent statement builder over declared record schemas, and a debug rendering
//! of every statement with its bound values substituted.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;

pub use config::{Config, DatabaseConfig, DatabaseType, PoolOptions};
pub use db::{Connection, ConnectionOptions, Registry, RegistryOptions};
pub use error::{DbError, DbResult};
pub use models::{NullableScalar, Statement, Value};
pub use query::{Builder, Direction, Grammar, Record};
