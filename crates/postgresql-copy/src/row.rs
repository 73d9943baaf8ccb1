//! Tuple and stream framing for binary COPY.
//!
//! A binary COPY stream is the 11-byte signature, an `i32` flags word, an
//! `i32` header-extension length (plus that many bytes), then tuples, then
//! an `i16` of `-1`. Each tuple is an `i16` field count followed by the
//! fields.

use crate::codec::{decode_value, encode_value, read_field, read_i16, read_i32, take};
use crate::error::CodecError;
use bulk_core::{ColumnSubset, EntityDescriptor, Record, Value, WireType};
use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

/// Binary COPY signature.
pub const COPY_SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Default flush threshold: one CopyData message of 64 KiB minus its
/// 5-byte message header.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 65536 - 5;

/// Header flag bit meaning each tuple carries an OID.
const FLAG_WITH_OIDS: i32 = 1 << 16;

fn write_header(buf: &mut BytesMut) {
    buf.put_slice(COPY_SIGNATURE);
    buf.put_i32(0); // flags
    buf.put_i32(0); // header extension length
}

/// Append one tuple for `record`: the subset's columns in descriptor
/// order, followed by `ordinal` as an `int8` field when given.
fn write_tuple<R: Record>(
    buf: &mut BytesMut,
    record: &R,
    descriptor: &EntityDescriptor,
    subset: &ColumnSubset,
    ordinal: Option<i64>,
) -> Result<(), CodecError> {
    let fields = subset.len() + usize::from(ordinal.is_some());
    let count = i16::try_from(fields).map_err(|_| {
        CodecError::InvalidHeader(format!("{fields} fields exceed the tuple field limit"))
    })?;
    buf.put_i16(count);

    for column in subset.columns(descriptor) {
        let value = record
            .column_value(&column.name)
            .ok_or_else(|| CodecError::MissingColumn(column.name.clone()))?;
        if value.is_null() && !column.nullable {
            return Err(CodecError::UnexpectedNull.in_column(&column.name));
        }
        encode_value(buf, column.wire_type, &value).map_err(|e| e.in_column(&column.name))?;
    }
    if let Some(ordinal) = ordinal {
        encode_value(buf, WireType::Int8, &Value::Int64(ordinal))?;
    }
    Ok(())
}

/// Encode one tuple (field count plus fields) for `record`.
pub fn encode_record<R: Record>(
    record: &R,
    descriptor: &EntityDescriptor,
    subset: &ColumnSubset,
) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    write_tuple(&mut buf, record, descriptor, subset, None)?;
    Ok(buf.freeze())
}

/// Decode one tuple produced by [`encode_record`] (or by the server).
pub fn decode_tuple(bytes: &[u8], types: &[WireType]) -> Result<Vec<Value>, CodecError> {
    let mut input = bytes;
    let count = read_i16(&mut input)?;
    let values = read_fields(&mut input, count, types)?;
    if !input.is_empty() {
        return Err(CodecError::InvalidHeader(format!(
            "{} trailing bytes after tuple",
            input.len()
        )));
    }
    Ok(values)
}

fn read_fields(input: &mut &[u8], count: i16, types: &[WireType]) -> Result<Vec<Value>, CodecError> {
    if count < 0 || count as usize != types.len() {
        return Err(CodecError::FieldCount {
            expected: types.len(),
            actual: count.max(0) as usize,
        });
    }
    types
        .iter()
        .map(|wire_type| decode_value(*wire_type, read_field(input)?))
        .collect()
}

/// Incremental writer for a whole binary COPY stream.
///
/// The header is written on construction. Rows are appended with
/// [`RowEncoder::encode_row`]; callers drain full chunks with
/// [`RowEncoder::take`] whenever [`RowEncoder::should_flush`] says so, and
/// close the stream with [`RowEncoder::finish`].
#[derive(Debug)]
pub struct RowEncoder {
    buf: BytesMut,
    flush_threshold: usize,
    rows: u64,
}

impl RowEncoder {
    /// Start a new stream.
    pub fn new(flush_threshold: usize) -> Self {
        let flush_threshold = flush_threshold.max(1);
        let mut buf = BytesMut::with_capacity(flush_threshold * 2);
        write_header(&mut buf);
        Self {
            buf,
            flush_threshold,
            rows: 0,
        }
    }

    /// Append one record. A failing record leaves the buffer unchanged.
    pub fn encode_row<R: Record>(
        &mut self,
        record: &R,
        descriptor: &EntityDescriptor,
        subset: &ColumnSubset,
        ordinal: Option<i64>,
    ) -> Result<(), CodecError> {
        let mark = self.buf.len();
        if let Err(e) = write_tuple(&mut self.buf, record, descriptor, subset, ordinal) {
            self.buf.truncate(mark);
            return Err(e);
        }
        self.rows += 1;
        Ok(())
    }

    /// Whether the pending bytes reached the flush threshold.
    pub fn should_flush(&self) -> bool {
        self.buf.len() >= self.flush_threshold
    }

    /// Drain the pending bytes.
    pub fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Rows encoded so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Write the trailer and return the remaining bytes.
    pub fn finish(mut self) -> Bytes {
        self.buf.put_i16(-1);
        self.buf.freeze()
    }
}

/// Reader for a complete binary `COPY ... TO STDOUT` stream.
///
/// Yields one `Vec<Value>` per tuple, decoded with `types`.
#[derive(Debug)]
pub struct CopyReader {
    data: Bytes,
    pos: usize,
    types: Vec<WireType>,
    rows: u64,
    done: bool,
}

/// Check signature, flags and extension; returns the offset of the first
/// tuple.
fn read_header(data: &[u8]) -> Result<usize, CodecError> {
    let mut input = data;
    let signature = take(&mut input, COPY_SIGNATURE.len())?;
    if signature != COPY_SIGNATURE {
        return Err(CodecError::InvalidHeader("missing PGCOPY signature".into()));
    }
    let flags = read_i32(&mut input)?;
    if flags & FLAG_WITH_OIDS != 0 {
        return Err(CodecError::InvalidHeader("streams with OIDs are not supported".into()));
    }
    let extension = read_i32(&mut input)?;
    let extension = usize::try_from(extension).map_err(|_| {
        CodecError::InvalidHeader(format!("negative header extension length {extension}"))
    })?;
    take(&mut input, extension)?;
    Ok(data.len() - input.len())
}

impl CopyReader {
    /// Validate the stream header and position the reader on the first
    /// tuple.
    pub fn new(data: Bytes, types: Vec<WireType>) -> Result<Self, CodecError> {
        let pos = read_header(&data)
            .inspect_err(|e| warn!("Rejected binary COPY stream: {e}"))?;
        debug!(bytes = data.len(), columns = types.len(), "Reading binary COPY stream");
        Ok(Self {
            data,
            pos,
            types,
            rows: 0,
            done: false,
        })
    }

    /// Tuples decoded so far.
    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn read_next(&mut self) -> Result<Option<Vec<Value>>, CodecError> {
        let mut input = &self.data[self.pos..];
        let count = read_i16(&mut input)?;
        if count == -1 {
            self.pos = self.data.len() - input.len();
            debug!(rows = self.rows, "Binary COPY stream complete");
            return Ok(None);
        }
        let values = read_fields(&mut input, count, &self.types)?;
        self.pos = self.data.len() - input.len();
        self.rows += 1;
        Ok(Some(values))
    }
}

impl Iterator for CopyReader {
    type Item = Result<Vec<Value>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(values)) => Some(Ok(values)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                warn!(row = self.rows, "Failed to decode binary COPY tuple: {e}");
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
