//! Per-value binary codec.
//!
//! Every field in a binary COPY tuple is an `i32` byte length followed by
//! that many bytes of the type's binary send format; a length of `-1` marks
//! NULL. All integers are network byte order.

use crate::error::CodecError;
use bulk_core::{Interval, RangeBound, RangeValue, Value, WireType};
use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use postgres_types::{FromSql, ToSql, Type};
use rust_decimal::Decimal;
use uuid::Uuid;

/// Microseconds between the Unix epoch and 2000-01-01.
const PG_EPOCH_MICROS: i64 = 946_684_800_000_000;

/// `num_days_from_ce()` of 2000-01-01.
const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

const MICROS_PER_DAY: i64 = 86_400_000_000;

const JSONB_VERSION: u8 = 1;

/// Range flag bits, as in the server's `rangetypes.h`.
pub mod range_flags {
    pub const EMPTY: u8 = 0x01;
    pub const LB_INC: u8 = 0x02;
    pub const UB_INC: u8 = 0x04;
    pub const LB_INF: u8 = 0x08;
    pub const UB_INF: u8 = 0x10;
}

// ============================================================================
// Encoding
// ============================================================================

/// Append one length-prefixed field.
///
/// On error the buffer is restored to its length before the call.
pub fn encode_value(
    buf: &mut BytesMut,
    wire_type: WireType,
    value: &Value,
) -> Result<(), CodecError> {
    if value.is_null() {
        buf.put_i32(-1);
        return Ok(());
    }

    let start = buf.len();
    buf.put_i32(0); // length, patched below
    if let Err(e) = encode_payload(buf, wire_type, value) {
        buf.truncate(start);
        return Err(e);
    }

    let written = buf.len() - start - 4;
    let Ok(len) = i32::try_from(written) else {
        buf.truncate(start);
        return Err(CodecError::OutOfRange {
            wire_type,
            detail: format!("{written} byte field exceeds the 1 GiB field limit"),
        });
    };
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

fn encode_payload(buf: &mut BytesMut, wire_type: WireType, value: &Value) -> Result<(), CodecError> {
    let mismatch = || CodecError::TypeMismatch {
        expected: wire_type,
        found: value.kind(),
    };

    match (wire_type, value) {
        (WireType::Bool, Value::Bool(b)) => buf.put_u8(u8::from(*b)),

        (WireType::Int2, v) => buf.put_i16(narrow(wire_type, integer(v).ok_or_else(mismatch)?)?),
        (WireType::Int4, v) => buf.put_i32(narrow(wire_type, integer(v).ok_or_else(mismatch)?)?),
        (WireType::Int8, v) => buf.put_i64(integer(v).ok_or_else(mismatch)?),

        (WireType::Float4, Value::Float32(f)) => buf.put_f32(*f),
        (WireType::Float4, Value::Float64(f)) => buf.put_f32(narrow_float(*f)?),
        (WireType::Float8, Value::Float32(f)) => buf.put_f64(f64::from(*f)),
        (WireType::Float8, Value::Float64(f)) => buf.put_f64(*f),

        (WireType::Numeric, v) => {
            let d = numeric(v).ok_or_else(mismatch)?;
            d.to_sql(&Type::NUMERIC, buf)
                .map_err(|e| CodecError::Numeric(e.to_string()))?;
        }

        (WireType::Text | WireType::Varchar | WireType::Bpchar, Value::Text(s)) => {
            buf.put_slice(s.as_bytes())
        }
        (WireType::Bytea, Value::Bytes(b)) => buf.put_slice(b),
        (WireType::Uuid, Value::Uuid(u)) => buf.put_slice(u.as_bytes()),

        (WireType::Json, Value::Json(j)) => serde_json::to_writer((&mut *buf).writer(), j)?,
        (WireType::Jsonb, Value::Json(j)) => {
            buf.put_u8(JSONB_VERSION);
            serde_json::to_writer((&mut *buf).writer(), j)?;
        }

        (WireType::Date, Value::Date(d)) => {
            buf.put_i32(d.num_days_from_ce() - PG_EPOCH_DAYS_FROM_CE)
        }
        (WireType::Time, Value::Time(t)) => buf.put_i64(time_to_micros(t)),
        (WireType::Timestamp, Value::Timestamp(ts)) => {
            buf.put_i64(ts.and_utc().timestamp_micros() - PG_EPOCH_MICROS)
        }
        (WireType::Timestamptz, Value::TimestampTz(ts)) => {
            buf.put_i64(ts.timestamp_micros() - PG_EPOCH_MICROS)
        }
        (WireType::Interval, Value::Interval(iv)) => {
            buf.put_i64(iv.microseconds);
            buf.put_i32(iv.days);
            buf.put_i32(iv.months);
        }

        (range, Value::Range(r)) if range.is_range() => encode_range(buf, range, r)?,

        _ => return Err(mismatch()),
    }
    Ok(())
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int16(v) => Some(i64::from(*v)),
        Value::Int32(v) => Some(i64::from(*v)),
        Value::Int64(v) => Some(*v),
        _ => None,
    }
}

fn numeric(value: &Value) -> Option<Decimal> {
    match value {
        Value::Numeric(d) => Some(*d),
        other => integer(other).map(Decimal::from),
    }
}

fn narrow<T: TryFrom<i64>>(wire_type: WireType, v: i64) -> Result<T, CodecError> {
    T::try_from(v).map_err(|_| CodecError::OutOfRange {
        wire_type,
        detail: format!("{v} does not fit"),
    })
}

fn narrow_float(v: f64) -> Result<f32, CodecError> {
    let narrowed = v as f32;
    if v.is_finite() && f64::from(narrowed) != v {
        return Err(CodecError::OutOfRange {
            wire_type: WireType::Float4,
            detail: format!("{v} is not exactly representable"),
        });
    }
    Ok(narrowed)
}

fn time_to_micros(t: &NaiveTime) -> i64 {
    // Leap-second nanoseconds (>= 1e9) collapse onto the last microsecond.
    let nanos = t.nanosecond().min(999_999_999);
    i64::from(t.num_seconds_from_midnight()) * 1_000_000 + i64::from(nanos / 1_000)
}

fn encode_range(buf: &mut BytesMut, wire_type: WireType, range: &RangeValue) -> Result<(), CodecError> {
    let Some(element) = wire_type.range_element() else {
        return Err(CodecError::TypeMismatch {
            expected: wire_type,
            found: "range",
        });
    };

    let (lower, upper) = match range {
        RangeValue::Empty => {
            buf.put_u8(range_flags::EMPTY);
            return Ok(());
        }
        RangeValue::Span { lower, upper } => (lower, upper),
    };

    let mut flags = 0u8;
    flags |= bound_flags(lower, range_flags::LB_INC, range_flags::LB_INF);
    flags |= bound_flags(upper, range_flags::UB_INC, range_flags::UB_INF);
    buf.put_u8(flags);

    for bound in [lower, upper] {
        if let Some(v) = bound.value() {
            if v.is_null() {
                return Err(CodecError::UnexpectedNull);
            }
            encode_value(buf, element, v)?;
        }
    }
    Ok(())
}

fn bound_flags(bound: &RangeBound, inclusive: u8, infinite: u8) -> u8 {
    match bound {
        RangeBound::Inclusive(_) => inclusive,
        RangeBound::Exclusive(_) => 0,
        RangeBound::Unbounded => infinite,
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode one field payload. `None` is a NULL field.
pub fn decode_value(wire_type: WireType, raw: Option<&[u8]>) -> Result<Value, CodecError> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    if let Some(width) = wire_type.fixed_width() {
        if raw.len() != width {
            return Err(CodecError::InvalidLength {
                wire_type,
                expected: width,
                actual: raw.len(),
            });
        }
    }

    let mut input = raw;
    let value = match wire_type {
        WireType::Bool => Value::Bool(input.get_u8() != 0),
        WireType::Int2 => Value::Int16(input.get_i16()),
        WireType::Int4 => Value::Int32(input.get_i32()),
        WireType::Int8 => Value::Int64(input.get_i64()),
        WireType::Float4 => Value::Float32(input.get_f32()),
        WireType::Float8 => Value::Float64(input.get_f64()),
        WireType::Numeric => Value::Numeric(
            Decimal::from_sql(&Type::NUMERIC, raw)
                .map_err(|e| CodecError::Numeric(e.to_string()))?,
        ),
        WireType::Text | WireType::Varchar | WireType::Bpchar => {
            Value::Text(std::str::from_utf8(raw)?.to_string())
        }
        WireType::Bytea => Value::Bytes(raw.to_vec()),
        WireType::Uuid => {
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(raw);
            Value::Uuid(Uuid::from_bytes(bytes))
        }
        WireType::Json => Value::Json(serde_json::from_slice(raw)?),
        WireType::Jsonb => {
            let (version, body) = raw.split_first().ok_or(CodecError::Truncated {
                needed: 1,
                remaining: 0,
            })?;
            if *version != JSONB_VERSION {
                return Err(CodecError::InvalidHeader(format!(
                    "unsupported jsonb version {version}"
                )));
            }
            Value::Json(serde_json::from_slice(body)?)
        }
        WireType::Date => Value::Date(days_to_date(input.get_i32())?),
        WireType::Time => Value::Time(micros_to_time(input.get_i64())?),
        WireType::Timestamp => {
            Value::Timestamp(micros_to_datetime(wire_type, input.get_i64())?.naive_utc())
        }
        WireType::Timestamptz => Value::TimestampTz(micros_to_datetime(wire_type, input.get_i64())?),
        WireType::Interval => {
            let microseconds = input.get_i64();
            let days = input.get_i32();
            let months = input.get_i32();
            Value::Interval(Interval {
                microseconds,
                days,
                months,
            })
        }
        WireType::Int4Range
        | WireType::Int8Range
        | WireType::NumRange
        | WireType::DateRange
        | WireType::TsRange
        | WireType::TstzRange => Value::Range(Box::new(decode_range(wire_type, raw)?)),
    };
    Ok(value)
}

fn days_to_date(days: i32) -> Result<NaiveDate, CodecError> {
    days.checked_add(PG_EPOCH_DAYS_FROM_CE)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| CodecError::OutOfRange {
            wire_type: WireType::Date,
            detail: format!("{days} days from 2000-01-01"),
        })
}

fn micros_to_time(micros: i64) -> Result<NaiveTime, CodecError> {
    let out_of_range = || CodecError::OutOfRange {
        wire_type: WireType::Time,
        detail: format!("{micros} microseconds since midnight"),
    };
    if !(0..MICROS_PER_DAY).contains(&micros) {
        return Err(out_of_range());
    }
    NaiveTime::from_num_seconds_from_midnight_opt(
        (micros / 1_000_000) as u32,
        ((micros % 1_000_000) * 1_000) as u32,
    )
    .ok_or_else(out_of_range)
}

fn micros_to_datetime(wire_type: WireType, micros: i64) -> Result<DateTime<Utc>, CodecError> {
    micros
        .checked_add(PG_EPOCH_MICROS)
        .and_then(DateTime::from_timestamp_micros)
        .ok_or_else(|| CodecError::OutOfRange {
            wire_type,
            detail: format!("{micros} microseconds from 2000-01-01"),
        })
}

fn decode_range(wire_type: WireType, raw: &[u8]) -> Result<RangeValue, CodecError> {
    let Some(element) = wire_type.range_element() else {
        return Err(CodecError::TypeMismatch {
            expected: wire_type,
            found: "range",
        });
    };

    let mut input = raw;
    let flags = take(&mut input, 1)?[0];
    if flags & range_flags::EMPTY != 0 {
        return Ok(RangeValue::Empty);
    }

    let lower = read_bound(&mut input, element, flags, range_flags::LB_INC, range_flags::LB_INF)?;
    let upper = read_bound(&mut input, element, flags, range_flags::UB_INC, range_flags::UB_INF)?;
    if !input.is_empty() {
        return Err(CodecError::InvalidHeader(format!(
            "{} trailing bytes after {wire_type} bounds",
            input.len()
        )));
    }
    Ok(RangeValue::Span { lower, upper })
}

fn read_bound(
    input: &mut &[u8],
    element: WireType,
    flags: u8,
    inclusive: u8,
    infinite: u8,
) -> Result<RangeBound, CodecError> {
    if flags & infinite != 0 {
        return Ok(RangeBound::Unbounded);
    }
    let field = read_field(input)?.ok_or(CodecError::UnexpectedNull)?;
    let value = decode_value(element, Some(field))?;
    Ok(if flags & inclusive != 0 {
        RangeBound::Inclusive(value)
    } else {
        RangeBound::Exclusive(value)
    })
}

// ============================================================================
// Framing helpers
// ============================================================================

/// Split `n` bytes off the front of `input`.
pub(crate) fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::Truncated {
            needed: n,
            remaining: input.len(),
        });
    }
    let (head, tail) = input.split_at(n);
    *input = tail;
    Ok(head)
}

pub(crate) fn read_i16(input: &mut &[u8]) -> Result<i16, CodecError> {
    Ok(take(input, 2)?.get_i16())
}

pub(crate) fn read_i32(input: &mut &[u8]) -> Result<i32, CodecError> {
    Ok(take(input, 4)?.get_i32())
}

/// Read one length-prefixed field; `None` is NULL.
pub(crate) fn read_field<'a>(input: &mut &'a [u8]) -> Result<Option<&'a [u8]>, CodecError> {
    match read_i32(input)? {
        -1 => Ok(None),
        len if len < 0 => Err(CodecError::InvalidHeader(format!("negative field length {len}"))),
        len => take(input, len as usize).map(Some),
    }
}
