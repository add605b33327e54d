//! Statement construction: dialect grammar, record mapping, and the chainable builder.

pub mod builder;
pub mod grammar;
pub mod record;

pub use builder::{BatchInsert, Builder};
pub use grammar::{Clauses, Condition, Conjunction, Direction, Grammar, Join, JoinKind, Order, Predicate};
pub use record::{FieldMapping, Record, RecordSchema, default_column_name};
