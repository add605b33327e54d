//! Statement argument values.
//!
//! [`Value`] is what the builder puts into a statement's argument list and what the
//! executor binds to the driver. [`NullableScalar`] models a typed column value that
//! may be SQL NULL; the driver receives it as a typed `Option`, while the debug
//! renderer turns it into either the `NULL` marker or its underlying value.

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

/// Literal used for SQL NULL in rendered debug output.
pub const NULL_MARKER: &str = "NULL";

/// Format used when a timestamp is rendered for display.
const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A typed value that is either SQL NULL or present.
#[derive(Debug, Clone, PartialEq)]
pub enum NullableScalar {
    Null,
    String(String),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Bool(bool),
    Time(NaiveDateTime),
}

impl NullableScalar {
    pub fn string(value: Option<impl Into<String>>) -> Self {
        value.map_or(Self::Null, |v| Self::String(v.into()))
    }

    pub fn int32(value: Option<i32>) -> Self {
        value.map_or(Self::Null, Self::Int32)
    }

    pub fn int64(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Int64)
    }

    pub fn float64(value: Option<f64>) -> Self {
        value.map_or(Self::Null, Self::Float64)
    }

    pub fn bool(value: Option<bool>) -> Self {
        value.map_or(Self::Null, Self::Bool)
    }

    pub fn time(value: Option<NaiveDateTime>) -> Self {
        value.map_or(Self::Null, Self::Time)
    }

    /// Whether a value is present (`false` means SQL NULL).
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Null)
    }

    /// Debug rendering of this value: the NULL marker or the underlying value.
    ///
    /// Booleans render as `1`/`0` and times as Unix seconds, matching how
    /// MySQL stores and compares them.
    pub fn display_form(&self) -> DisplayForm {
        match self {
            Self::Null => DisplayForm::Null,
            Self::String(v) => DisplayForm::Text(v.clone()),
            Self::Int32(v) => DisplayForm::Raw(v.to_string()),
            Self::Int64(v) => DisplayForm::Raw(v.to_string()),
            Self::Float64(v) => DisplayForm::Raw(v.to_string()),
            Self::Bool(v) => DisplayForm::Raw(if *v { "1" } else { "0" }.to_string()),
            Self::Time(v) => DisplayForm::Raw(v.and_utc().timestamp().to_string()),
        }
    }
}

/// A statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Time(NaiveDateTime),
    Nullable(NullableScalar),
}

impl Value {
    /// Check if this value binds as SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Nullable(NullableScalar::Null))
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Time(_) => "time",
            Self::Nullable(_) => "nullable",
        }
    }

    /// How this value appears in a rendered debug statement.
    pub fn display_form(&self) -> DisplayForm {
        match self {
            Self::Null => DisplayForm::Null,
            Self::Bool(v) => DisplayForm::Raw(v.to_string()),
            Self::Int(v) => DisplayForm::Raw(v.to_string()),
            Self::Float(v) => DisplayForm::Raw(v.to_string()),
            Self::String(v) => DisplayForm::Text(v.clone()),
            Self::Bytes(v) => DisplayForm::Text(String::from_utf8_lossy(v).into_owned()),
            Self::Time(v) => DisplayForm::Text(v.format(DISPLAY_TIME_FORMAT).to_string()),
            Self::Nullable(v) => v.display_form(),
        }
    }
}

/// Display form of a value inside rendered SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayForm {
    /// The SQL NULL marker.
    Null,
    /// Emitted as-is (numbers, booleans).
    Raw(String),
    /// Emitted double-quoted and escaped.
    Text(String),
}

impl std::fmt::Display for DisplayForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str(NULL_MARKER),
            Self::Raw(v) => f.write_str(v),
            Self::Text(v) => {
                let quoted = serde_json::to_string(v).map_err(|_| std::fmt::Error)?;
                f.write_str(&quoted)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.display_form() {
            DisplayForm::Null => serializer.serialize_none(),
            DisplayForm::Raw(v) | DisplayForm::Text(v) => match self {
                Self::Bool(b) | Self::Nullable(NullableScalar::Bool(b)) => {
                    serializer.serialize_bool(*b)
                }
                Self::Int(i) | Self::Nullable(NullableScalar::Int64(i)) => {
                    serializer.serialize_i64(*i)
                }
                Self::Nullable(NullableScalar::Int32(i)) => serializer.serialize_i32(*i),
                Self::Float(x) | Self::Nullable(NullableScalar::Float64(x)) => {
                    serializer.serialize_f64(*x)
                }
                _ => serializer.serialize_str(&v),
            },
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Time(v)
    }
}

impl From<NullableScalar> for Value {
    fn from(v: NullableScalar) -> Self {
        Value::Nullable(v)
    }
}

/// `None` is treated like a nil pointer: it binds and renders as NULL.
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap()
    }

    #[test]
    fn test_invalid_nullable_renders_null_marker() {
        let values = [
            NullableScalar::string(None::<String>),
            NullableScalar::int32(None),
            NullableScalar::int64(None),
            NullableScalar::float64(None),
            NullableScalar::bool(None),
            NullableScalar::time(None),
        ];
        for v in values {
            assert!(!v.is_valid());
            assert_eq!(Value::from(v).display_form().to_string(), NULL_MARKER);
        }
    }

    #[test]
    fn test_valid_nullable_renders_underlying_value() {
        assert_eq!(
            Value::from(NullableScalar::string(Some("Mike"))).display_form().to_string(),
            "\"Mike\""
        );
        assert_eq!(
            Value::from(NullableScalar::int32(Some(-3))).display_form().to_string(),
            "-3"
        );
        assert_eq!(
            Value::from(NullableScalar::float64(Some(1.5))).display_form().to_string(),
            "1.5"
        );
        assert_eq!(
            Value::from(NullableScalar::bool(Some(true))).display_form().to_string(),
            "1"
        );
        assert_eq!(
            Value::from(NullableScalar::time(Some(sample_time())))
                .display_form()
                .to_string(),
            "1704164645"
        );
    }

    #[test]
    fn test_plain_values_pass_through() {
        assert_eq!(Value::from(42).display_form().to_string(), "42");
        assert_eq!(Value::from(false).display_form().to_string(), "false");
        assert_eq!(Value::from("a\"b").display_form().to_string(), r#""a\"b""#);
        assert_eq!(
            Value::from(sample_time()).display_form().to_string(),
            "\"2024-01-02 03:04:05\""
        );
    }

    #[test]
    fn test_plain_string_null_is_quoted() {
        assert_eq!(Value::from("NULL").display_form().to_string(), "\"NULL\"");
    }

    #[test]
    fn test_none_is_null() {
        let v = Value::from(None::<i64>);
        assert!(v.is_null());
        assert_eq!(v.display_form(), DisplayForm::Null);
        assert_eq!(Value::from(Some(5_i64)), Value::Int(5));
    }

    #[test]
    fn test_value_serializes_typed() {
        let json = serde_json::to_value(vec![
            Value::from(1),
            Value::from("x"),
            Value::Null,
            Value::from(NullableScalar::bool(Some(true))),
        ])
        .unwrap();
        assert_eq!(json, serde_json::json!([1, "x", null, true]));
    }
}
