//! Wire type tags for the pg-bulk loader.
//!
//! This module defines `WireType`, the set of PostgreSQL column types whose
//! binary representation the loader knows how to stream. Each persisted
//! column of a record carries exactly one tag, and the row codec picks the
//! on-the-wire layout from it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary wire representation of a column.
///
/// # YAML / TOML format
///
/// Tags serialize as their lowercase PostgreSQL type name:
/// ```yaml
/// wire_type: int4
/// wire_type: tsrange
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireType {
    // Boolean
    /// `boolean`
    Bool,

    // Integer types
    /// `smallint`
    Int2,
    /// `integer`
    Int4,
    /// `bigint`
    Int8,

    // Floating point
    /// `real`
    Float4,
    /// `double precision`
    Float8,

    // Exact numeric
    /// `numeric` / `decimal`
    Numeric,

    // String types
    /// `text`
    Text,
    /// `varchar(n)`
    Varchar,
    /// `char(n)`
    Bpchar,

    // Binary
    /// `bytea`
    Bytea,

    // Special types
    /// `uuid`
    Uuid,
    /// `json`
    Json,
    /// `jsonb`
    Jsonb,

    // Temporal types
    /// `date`
    Date,
    /// `time without time zone`
    Time,
    /// `timestamp without time zone`
    Timestamp,
    /// `timestamp with time zone`
    Timestamptz,
    /// `interval`
    Interval,

    // Range types
    /// `int4range`
    Int4Range,
    /// `int8range`
    Int8Range,
    /// `numrange`
    NumRange,
    /// `daterange`
    DateRange,
    /// `tsrange`
    TsRange,
    /// `tstzrange`
    TstzRange,
}

impl WireType {
    /// Every supported tag, in declaration order.
    pub const ALL: [WireType; 25] = [
        WireType::Bool,
        WireType::Int2,
        WireType::Int4,
        WireType::Int8,
        WireType::Float4,
        WireType::Float8,
        WireType::Numeric,
        WireType::Text,
        WireType::Varchar,
        WireType::Bpchar,
        WireType::Bytea,
        WireType::Uuid,
        WireType::Json,
        WireType::Jsonb,
        WireType::Date,
        WireType::Time,
        WireType::Timestamp,
        WireType::Timestamptz,
        WireType::Interval,
        WireType::Int4Range,
        WireType::Int8Range,
        WireType::NumRange,
        WireType::DateRange,
        WireType::TsRange,
        WireType::TstzRange,
    ];

    /// PostgreSQL type name, as used in casts and `pg_type.typname`.
    pub fn pg_name(&self) -> &'static str {
        match self {
            WireType::Bool => "bool",
            WireType::Int2 => "int2",
            WireType::Int4 => "int4",
            WireType::Int8 => "int8",
            WireType::Float4 => "float4",
            WireType::Float8 => "float8",
            WireType::Numeric => "numeric",
            WireType::Text => "text",
            WireType::Varchar => "varchar",
            WireType::Bpchar => "bpchar",
            WireType::Bytea => "bytea",
            WireType::Uuid => "uuid",
            WireType::Json => "json",
            WireType::Jsonb => "jsonb",
            WireType::Date => "date",
            WireType::Time => "time",
            WireType::Timestamp => "timestamp",
            WireType::Timestamptz => "timestamptz",
            WireType::Interval => "interval",
            WireType::Int4Range => "int4range",
            WireType::Int8Range => "int8range",
            WireType::NumRange => "numrange",
            WireType::DateRange => "daterange",
            WireType::TsRange => "tsrange",
            WireType::TstzRange => "tstzrange",
        }
    }

    /// Exact encoded width in bytes for fixed-size types.
    ///
    /// Returns `None` for variable-length types (text, binary, JSON, numeric
    /// and ranges).
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            WireType::Bool => Some(1),
            WireType::Int2 => Some(2),
            WireType::Int4 | WireType::Float4 | WireType::Date => Some(4),
            WireType::Int8
            | WireType::Float8
            | WireType::Time
            | WireType::Timestamp
            | WireType::Timestamptz => Some(8),
            WireType::Uuid | WireType::Interval => Some(16),
            _ => None,
        }
    }

    /// Element type of a range type.
    pub fn range_element(&self) -> Option<WireType> {
        match self {
            WireType::Int4Range => Some(WireType::Int4),
            WireType::Int8Range => Some(WireType::Int8),
            WireType::NumRange => Some(WireType::Numeric),
            WireType::DateRange => Some(WireType::Date),
            WireType::TsRange => Some(WireType::Timestamp),
            WireType::TstzRange => Some(WireType::Timestamptz),
            _ => None,
        }
    }

    /// Whether this is one of the range types.
    pub fn is_range(&self) -> bool {
        self.range_element().is_some()
    }

    /// Parse a PostgreSQL type name (including common aliases).
    ///
    /// ```
    /// use bulk_core::WireType;
    ///
    /// assert_eq!(WireType::from_pg_name("integer"), Some(WireType::Int4));
    /// assert_eq!(WireType::from_pg_name("timestamp with time zone"), Some(WireType::Timestamptz));
    /// assert_eq!(WireType::from_pg_name("point"), None);
    /// ```
    pub fn from_pg_name(name: &str) -> Option<WireType> {
        let lowered = name.trim().to_lowercase();
        let tag = match lowered.as_str() {
            "bool" | "boolean" => WireType::Bool,
            "int2" | "smallint" => WireType::Int2,
            "int4" | "int" | "integer" | "serial" => WireType::Int4,
            "int8" | "bigint" | "bigserial" => WireType::Int8,
            "float4" | "real" => WireType::Float4,
            "float8" | "double precision" => WireType::Float8,
            "numeric" | "decimal" => WireType::Numeric,
            "text" => WireType::Text,
            "varchar" | "character varying" => WireType::Varchar,
            "bpchar" | "char" | "character" => WireType::Bpchar,
            "bytea" => WireType::Bytea,
            "uuid" => WireType::Uuid,
            "json" => WireType::Json,
            "jsonb" => WireType::Jsonb,
            "date" => WireType::Date,
            "time" | "time without time zone" => WireType::Time,
            "timestamp" | "timestamp without time zone" => WireType::Timestamp,
            "timestamptz" | "timestamp with time zone" => WireType::Timestamptz,
            "interval" => WireType::Interval,
            "int4range" => WireType::Int4Range,
            "int8range" => WireType::Int8Range,
            "numrange" => WireType::NumRange,
            "daterange" => WireType::DateRange,
            "tsrange" => WireType::TsRange,
            "tstzrange" => WireType::TstzRange,
            _ => return None,
        };
        Some(tag)
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}
