//! Declared field-to-column mapping for records written through the builder.
//!
//! A record type describes its columns once, in field declaration order, and the
//! description is cached for the life of the process. Use [`impl_record!`] for the
//! usual case:
//!
//! ```ignore
//! struct Video {
//!     id: i64,
//!     name: NullableScalar,
//!     cache: Vec<u8>,
//! }
//!
//! querydb::impl_record!(Video { skip id, name, skip cache });
//! ```
//!
//! [`impl_record!`]: crate::impl_record

use crate::models::Value;

/// One field of a record: its column, how to read it, and whether writes include it.
pub struct FieldMapping<R> {
    pub field: &'static str,
    pub column: String,
    pub accessor: fn(&R) -> Value,
    pub excluded: bool,
}

impl<R> FieldMapping<R> {
    pub fn new(field: &'static str, column: impl Into<String>, accessor: fn(&R) -> Value) -> Self {
        Self {
            field,
            column: column.into(),
            accessor,
            excluded: false,
        }
    }

    /// A field that never appears in INSERT or UPDATE.
    pub fn excluded(field: &'static str) -> Self {
        Self {
            field,
            column: default_column_name(field),
            accessor: |_| Value::Null,
            excluded: true,
        }
    }
}

impl<R> std::fmt::Debug for FieldMapping<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldMapping")
            .field("field", &self.field)
            .field("column", &self.column)
            .field("excluded", &self.excluded)
            .finish()
    }
}

/// Ordered field mappings for one record type.
#[derive(Debug)]
pub struct RecordSchema<R> {
    fields: Vec<FieldMapping<R>>,
}

impl<R> RecordSchema<R> {
    pub fn new(fields: Vec<FieldMapping<R>>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldMapping<R>] {
        &self.fields
    }

    /// Columns written by INSERT/UPDATE, in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        self.included().map(|f| f.column.as_str()).collect()
    }

    /// `(column, value)` pairs for the non-excluded fields of `record`.
    pub fn values<'s>(&'s self, record: &R) -> Vec<(&'s str, Value)> {
        self.included()
            .map(|f| (f.column.as_str(), (f.accessor)(record)))
            .collect()
    }

    fn included(&self) -> impl Iterator<Item = &FieldMapping<R>> {
        self.fields.iter().filter(|f| !f.excluded)
    }
}

/// A type whose fields map to table columns.
pub trait Record: Sized + 'static {
    fn schema() -> &'static RecordSchema<Self>;

    fn values(&self) -> Vec<(&'static str, Value)> {
        Self::schema().values(self)
    }
}

/// Column name for a field without an override: `CamelCase`/`mixedCase` to `snake_case`.
///
/// Acronyms stay together (`UserID` becomes `user_id`). Names that are already
/// snake_case come back unchanged.
pub fn default_column_name(field: &str) -> String {
    let chars: Vec<char> = field.chars().collect();
    let mut out = String::with_capacity(field.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Implement [`Record`](crate::query::Record) for a struct.
///
/// Each entry is a field name, optionally `=> "column"` to override the column,
/// or `skip field` to exclude it from writes. Included fields must be `Clone`
/// and convertible into [`Value`](crate::models::Value).
#[macro_export]
macro_rules! impl_record {
    (@fields $ty:ident, $fields:ident; ) => {};
    (@fields $ty:ident, $fields:ident; skip $field:ident $(, $($rest:tt)*)?) => {
        $fields.push($crate::query::FieldMapping::<$ty>::excluded(stringify!($field)));
        $crate::impl_record!(@fields $ty, $fields; $($($rest)*)?);
    };
    (@fields $ty:ident, $fields:ident; $field:ident => $column:literal $(, $($rest:tt)*)?) => {
        $fields.push($crate::query::FieldMapping::<$ty>::new(
            stringify!($field),
            $column,
            |r: &$ty| $crate::models::Value::from(::std::clone::Clone::clone(&r.$field)),
        ));
        $crate::impl_record!(@fields $ty, $fields; $($($rest)*)?);
    };
    (@fields $ty:ident, $fields:ident; $field:ident $(, $($rest:tt)*)?) => {
        $fields.push($crate::query::FieldMapping::<$ty>::new(
            stringify!($field),
            $crate::query::default_column_name(stringify!($field)),
            |r: &$ty| $crate::models::Value::from(::std::clone::Clone::clone(&r.$field)),
        ));
        $crate::impl_record!(@fields $ty, $fields; $($($rest)*)?);
    };
    ($ty:ident { $($body:tt)* }) => {
        impl $crate::query::Record for $ty {
            fn schema() -> &'static $crate::query::RecordSchema<Self> {
                static SCHEMA: ::std::sync::OnceLock<$crate::query::RecordSchema<$ty>> =
                    ::std::sync::OnceLock::new();
                SCHEMA.get_or_init(|| {
                    let mut fields = ::std::vec::Vec::new();
                    $crate::impl_record!(@fields $ty, fields; $($body)*);
                    $crate::query::RecordSchema::new(fields)
                })
            }
        }
    };
}
