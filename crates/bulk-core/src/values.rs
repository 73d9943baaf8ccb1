//! Field values for the pg-bulk loader.
//!
//! `Value` is the dynamically-typed value a record hands to the row codec
//! for one column, and the value the codec hands back when decoding rows
//! returned by the server.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error converting a [`Value`] into a native Rust type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// The value holds a different variant than requested.
    #[error("expected {expected} value, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Null where the target type is not optional.
    #[error("unexpected NULL for non-nullable {expected}")]
    UnexpectedNull { expected: &'static str },

    /// The record does not map a column with this name.
    #[error("record does not map column '{0}'")]
    UnknownColumn(String),
}

/// PostgreSQL `interval`: microseconds, days and months are kept apart
/// exactly as the server stores them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Interval {
    /// Time part in microseconds
    pub microseconds: i64,
    /// Day part
    pub days: i32,
    /// Month part
    pub months: i32,
}

impl Interval {
    /// Create a new interval.
    pub fn new(months: i32, days: i32, microseconds: i64) -> Self {
        Self {
            microseconds,
            days,
            months,
        }
    }
}

/// One end of a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeBound {
    /// Bound value is part of the range
    Inclusive(Value),
    /// Bound value is not part of the range
    Exclusive(Value),
    /// No bound on this side
    Unbounded,
}

impl RangeBound {
    /// Bound value, if the side is bounded.
    pub fn value(&self) -> Option<&Value> {
        match self {
            RangeBound::Inclusive(v) | RangeBound::Exclusive(v) => Some(v),
            RangeBound::Unbounded => None,
        }
    }
}

/// Range value (`int4range`, `tsrange`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeValue {
    /// The empty range
    Empty,
    /// A range with a lower and an upper bound
    Span { lower: RangeBound, upper: RangeBound },
}

impl RangeValue {
    /// Create a range from two bounds.
    pub fn new(lower: RangeBound, upper: RangeBound) -> Self {
        Self::Span { lower, upper }
    }

    /// `[lower, upper]`
    pub fn inclusive(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::Span {
            lower: RangeBound::Inclusive(lower.into()),
            upper: RangeBound::Inclusive(upper.into()),
        }
    }

    /// `[lower, upper)`, the canonical form of discrete ranges.
    pub fn half_open(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Self::Span {
            lower: RangeBound::Inclusive(lower.into()),
            upper: RangeBound::Exclusive(upper.into()),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value
    Bool(bool),
    /// 16-bit signed integer
    Int16(i16),
    /// 32-bit signed integer
    Int32(i32),
    /// 64-bit signed integer
    Int64(i64),
    /// 32-bit floating point
    Float32(f32),
    /// 64-bit floating point
    Float64(f64),
    /// Exact decimal
    Numeric(Decimal),
    /// Text (text, varchar, char)
    Text(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// UUID value
    Uuid(Uuid),
    /// Date value (no time)
    Date(NaiveDate),
    /// Time value (no date)
    Time(NaiveTime),
    /// Timestamp without timezone
    Timestamp(NaiveDateTime),
    /// Timestamp with timezone
    TimestampTz(DateTime<Utc>),
    /// Interval value
    Interval(Interval),
    /// JSON document (json and jsonb)
    Json(serde_json::Value),
    /// Range value
    Range(Box<RangeValue>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant name used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Interval(_) => "interval",
            Value::Json(_) => "json",
            Value::Range(_) => "range",
        }
    }
}

/// Conversion from a [`Value`] into a native type.
///
/// Implemented for every type that has a `From<T> for Value` impl, and for
/// `Option<T>` (mapping `Value::Null` to `None`).
pub trait FromValue: Sized {
    /// Convert, failing on a variant mismatch.
    fn from_value(value: Value) -> Result<Self, ValueError>;
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }

            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ValueError> {
                    match value {
                        Value::$variant(v) => Ok(v),
                        Value::Null => Err(ValueError::UnexpectedNull { expected: $name }),
                        other => Err(ValueError::TypeMismatch {
                            expected: $name,
                            found: other.kind(),
                        }),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool, "bool";
    i16 => Int16, "int16";
    i32 => Int32, "int32";
    i64 => Int64, "int64";
    f32 => Float32, "float32";
    f64 => Float64, "float64";
    Decimal => Numeric, "numeric";
    String => Text, "text";
    Vec<u8> => Bytes, "bytes";
    Uuid => Uuid, "uuid";
    NaiveDate => Date, "date";
    NaiveTime => Time, "time";
    NaiveDateTime => Timestamp, "timestamp";
    DateTime<Utc> => TimestampTz, "timestamptz";
    Interval => Interval, "interval";
    serde_json::Value => Json, "json";
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<RangeValue> for Value {
    fn from(v: RangeValue) -> Self {
        Value::Range(Box::new(v))
    }
}

impl FromValue for RangeValue {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Range(r) => Ok(*r),
            Value::Null => Err(ValueError::UnexpectedNull { expected: "range" }),
            other => Err(ValueError::TypeMismatch {
                expected: "range",
                found: other.kind(),
            }),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
