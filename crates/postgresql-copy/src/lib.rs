//! PostgreSQL binary COPY codec for pg-bulk records.
//!
//! This crate turns [`bulk_core::Record`] values into the binary tuple
//! format consumed by `COPY ... FROM STDIN (FORMAT binary)` and reads the
//! same format back from `COPY ... TO STDOUT` and `RETURNING` rows.
//!
//! - [`encode_value`] / [`decode_value`] - one length-prefixed field
//! - [`encode_record`] / [`decode_tuple`] - one tuple
//! - [`RowEncoder`] / [`CopyReader`] - a whole stream, header to trailer
//! - [`RawField`] - raw capture of result-row fields via `postgres-types`

pub mod codec;
pub mod error;
pub mod pgtype;
pub mod row;

pub use codec::{decode_value, encode_value, range_flags};
pub use error::CodecError;
pub use pgtype::{is_compatible, pg_type, RawField};
pub use row::{
    decode_tuple, encode_record, CopyReader, RowEncoder, COPY_SIGNATURE, DEFAULT_FLUSH_THRESHOLD,
};
