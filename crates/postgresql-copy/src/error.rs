//! Error types for the binary COPY codec.

use bulk_core::WireType;
use thiserror::Error;

/// Errors raised while encoding or decoding binary COPY data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// Value variant cannot be written as the column's wire type.
    #[error("cannot encode {found} value as {expected}")]
    TypeMismatch {
        expected: WireType,
        found: &'static str,
    },

    /// NULL for a column that does not accept it.
    #[error("NULL is not allowed here")]
    UnexpectedNull,

    /// Record did not hand out a value for a mapped column.
    #[error("record has no value for mapped column '{0}'")]
    MissingColumn(String),

    /// Value does not fit the wire type (narrowing, infinities, sizes).
    #[error("{wire_type} value out of range: {detail}")]
    OutOfRange { wire_type: WireType, detail: String },

    /// Fixed-width field with the wrong byte count.
    #[error("{wire_type} field has {actual} bytes, expected {expected}")]
    InvalidLength {
        wire_type: WireType,
        expected: usize,
        actual: usize,
    },

    /// Input ended before a complete item could be read.
    #[error("truncated input: needed {needed} bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// Stream header or tuple framing is malformed.
    #[error("invalid COPY framing: {0}")]
    InvalidHeader(String),

    /// Tuple carries a different number of fields than expected.
    #[error("tuple has {actual} fields, expected {expected}")]
    FieldCount { expected: usize, actual: usize },

    /// Text payload is not valid UTF-8.
    #[error("invalid UTF-8 in text field: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// JSON payload failed to parse or serialize.
    #[error("JSON error: {0}")]
    Json(String),

    /// Numeric payload rejected by the decimal codec.
    #[error("numeric error: {0}")]
    Numeric(String),

    /// Returned column type cannot be read as the declared wire type.
    #[error("server column type '{actual}' cannot be read as {expected}")]
    ServerType { expected: WireType, actual: String },

    /// Error attached to a specific column.
    #[error("column '{column}': {source}")]
    Column {
        column: String,
        #[source]
        source: Box<CodecError>,
    },
}

impl CodecError {
    /// Attach a column name to this error.
    pub fn in_column(self, column: &str) -> Self {
        match self {
            already @ CodecError::Column { .. } => already,
            other => CodecError::Column {
                column: column.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(e.to_string())
    }
}
