use bulk_core::{
    ColumnSubset, EntityMetadata, FieldMapping, Interval, RangeBound, RangeValue, Record,
    SchemaResolver, Value, WireType,
};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveTime};
use postgresql_copy::{decode_tuple, decode_value, encode_record, encode_value, CopyReader, RowEncoder};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

const PG_EPOCH_DAYS_FROM_CE: i32 = 730_120;

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (-1_000_000i32..1_000_000)
        .prop_map(|d| NaiveDate::from_num_days_from_ce_opt(PG_EPOCH_DAYS_FROM_CE + d).unwrap())
}

/// Unix microseconds, roughly 1000 AD .. 5000 AD.
fn arb_unix_micros() -> impl Strategy<Value = i64> + Clone {
    -31_000_000_000_000_000i64..94_000_000_000_000_000
}

fn arb_time() -> impl Strategy<Value = NaiveTime> {
    (0u32..86_400, 0u32..1_000_000).prop_map(|(secs, micros)| {
        NaiveTime::from_num_seconds_from_midnight_opt(secs, micros * 1_000).unwrap()
    })
}

fn arb_decimal() -> impl Strategy<Value = Decimal> {
    (any::<i64>(), 0u32..=12).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
}

fn arb_json() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        "[a-zA-Z0-9 ]{0,16}".prop_map(serde_json::Value::from),
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4)
            .prop_map(|m| serde_json::json!(m)),
    ]
}

fn arb_bound(element: BoxedStrategy<Value>) -> impl Strategy<Value = RangeBound> {
    prop_oneof![
        element.clone().prop_map(RangeBound::Inclusive),
        element.prop_map(RangeBound::Exclusive),
        Just(RangeBound::Unbounded),
    ]
}

fn arb_range(element: BoxedStrategy<Value>) -> impl Strategy<Value = Value> {
    prop_oneof![
        1 => Just(RangeValue::Empty),
        4 => (arb_bound(element.clone()), arb_bound(element))
            .prop_map(|(lower, upper)| RangeValue::new(lower, upper)),
    ]
    .prop_map(Value::from)
}

/// A wire type and a value of the matching variant (or NULL).
fn arb_typed_value() -> impl Strategy<Value = (WireType, Value)> {
    let timestamp = arb_unix_micros()
        .prop_map(|m| Value::Timestamp(DateTime::from_timestamp_micros(m).unwrap().naive_utc()));
    let timestamptz = arb_unix_micros()
        .prop_map(|m| Value::TimestampTz(DateTime::from_timestamp_micros(m).unwrap()));

    let non_null = prop_oneof![
        any::<bool>().prop_map(|v| (WireType::Bool, Value::Bool(v))),
        any::<i16>().prop_map(|v| (WireType::Int2, Value::Int16(v))),
        any::<i32>().prop_map(|v| (WireType::Int4, Value::Int32(v))),
        any::<i64>().prop_map(|v| (WireType::Int8, Value::Int64(v))),
        Just((WireType::Int2, Value::Int16(i16::MIN))),
        Just((WireType::Int4, Value::Int32(i32::MAX))),
        Just((WireType::Int8, Value::Int64(i64::MIN))),
        any::<f32>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(|v| (WireType::Float4, Value::Float32(v))),
        any::<f64>()
            .prop_filter("NaN never compares equal", |f| !f.is_nan())
            .prop_map(|v| (WireType::Float8, Value::Float64(v))),
        arb_decimal().prop_map(|d| (WireType::Numeric, Value::Numeric(d))),
        ".*".prop_map(|s: String| (WireType::Text, Value::Text(s))),
        "[a-z]{0,32}".prop_map(|s: String| (WireType::Varchar, Value::Text(s))),
        "[A-Z]{4}".prop_map(|s: String| (WireType::Bpchar, Value::Text(s))),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(|b| (WireType::Bytea, Value::Bytes(b))),
        any::<[u8; 16]>().prop_map(|b| (WireType::Uuid, Value::Uuid(Uuid::from_bytes(b)))),
        arb_json().prop_map(|j| (WireType::Json, Value::Json(j))),
        arb_json().prop_map(|j| (WireType::Jsonb, Value::Json(j))),
        arb_date().prop_map(|d| (WireType::Date, Value::Date(d))),
        arb_time().prop_map(|t| (WireType::Time, Value::Time(t))),
        timestamp.clone().prop_map(|v| (WireType::Timestamp, v)),
        timestamptz.clone().prop_map(|v| (WireType::Timestamptz, v)),
        (any::<i32>(), any::<i32>(), any::<i64>())
            .prop_map(|(m, d, us)| (WireType::Interval, Value::Interval(Interval::new(m, d, us)))),
        arb_range(any::<i32>().prop_map(Value::Int32).boxed())
            .prop_map(|v| (WireType::Int4Range, v)),
        arb_range(any::<i64>().prop_map(Value::Int64).boxed())
            .prop_map(|v| (WireType::Int8Range, v)),
        arb_range(arb_decimal().prop_map(Value::Numeric).boxed())
            .prop_map(|v| (WireType::NumRange, v)),
        arb_range(arb_date().prop_map(Value::Date).boxed())
            .prop_map(|v| (WireType::DateRange, v)),
        arb_range(timestamp.boxed()).prop_map(|v| (WireType::TsRange, v)),
        arb_range(timestamptz.boxed()).prop_map(|v| (WireType::TstzRange, v)),
    ];

    prop_oneof![
        9 => non_null,
        1 => prop::sample::select(WireType::ALL.to_vec()).prop_map(|t| (t, Value::Null)),
    ]
}

fn roundtrip(wire_type: WireType, value: &Value) -> Value {
    let mut buf = BytesMut::new();
    encode_value(&mut buf, wire_type, value).unwrap();
    let len = i32::from_be_bytes(buf[..4].try_into().unwrap());
    let field = if len < 0 {
        assert_eq!(buf.len(), 4);
        None
    } else {
        assert_eq!(buf.len(), 4 + len as usize);
        Some(&buf[4..])
    };
    decode_value(wire_type, field).unwrap()
}

proptest! {
    #[test]
    fn prop_every_wire_type_roundtrips((wire_type, value) in arb_typed_value()) {
        prop_assert_eq!(roundtrip(wire_type, &value), value);
    }

    #[test]
    fn prop_fixed_width_types_have_fixed_length((wire_type, value) in arb_typed_value()) {
        prop_assume!(!value.is_null());
        if let Some(width) = wire_type.fixed_width() {
            let mut buf = BytesMut::new();
            encode_value(&mut buf, wire_type, &value).unwrap();
            prop_assert_eq!(buf.len(), 4 + width);
        }
    }

    #[test]
    fn prop_widening_preserves_value(v in any::<i16>()) {
        let widened = roundtrip(WireType::Int8, &Value::Int16(v));
        prop_assert_eq!(widened, Value::Int64(i64::from(v)));
    }
}

// ============================================================================
// Whole-record streams
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Sample {
    id: i64,
    label: Option<String>,
    amount: Decimal,
    seen_on: NaiveDate,
    window: RangeValue,
}

impl Record for Sample {
    fn describe() -> EntityMetadata {
        EntityMetadata::new("samples")
            .field(FieldMapping::new("id", WireType::Int8).key())
            .field(FieldMapping::new("label", WireType::Text).nullable())
            .field(FieldMapping::new("amount", WireType::Numeric))
            .field(FieldMapping::new("seen_on", WireType::Date))
            .field(FieldMapping::new("window", WireType::Int4Range))
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "id" => Some(self.id.into()),
            "label" => Some(self.label.clone().into()),
            "amount" => Some(self.amount.into()),
            "seen_on" => Some(self.seen_on.into()),
            "window" => Some(self.window.clone().into()),
            _ => None,
        }
    }
}

fn arb_sample() -> impl Strategy<Value = Sample> {
    (
        any::<i64>(),
        prop::option::of("[a-z ]{0,20}"),
        arb_decimal(),
        arb_date(),
        (any::<i32>(), any::<i32>()),
    )
        .prop_map(|(id, label, amount, seen_on, (a, b))| Sample {
            id,
            label,
            amount,
            seen_on,
            window: RangeValue::half_open(a.min(b), a.max(b)),
        })
}

fn sample_types() -> Vec<WireType> {
    vec![
        WireType::Int8,
        WireType::Text,
        WireType::Numeric,
        WireType::Date,
        WireType::Int4Range,
    ]
}

fn to_values(sample: &Sample) -> Vec<Value> {
    ["id", "label", "amount", "seen_on", "window"]
        .iter()
        .map(|c| sample.column_value(c).unwrap())
        .collect()
}

proptest! {
    #[test]
    fn prop_record_tuple_roundtrips(sample in arb_sample()) {
        let d = SchemaResolver::resolve::<Sample>().unwrap();
        let bytes = encode_record(&sample, &d, &ColumnSubset::all(&d)).unwrap();
        let values = decode_tuple(&bytes, &sample_types()).unwrap();
        prop_assert_eq!(values, to_values(&sample));
    }

    #[test]
    fn prop_stream_preserves_rows_and_order(
        samples in prop::collection::vec(arb_sample(), 0..40),
        threshold in 1usize..512,
    ) {
        let d = SchemaResolver::resolve::<Sample>().unwrap();
        let subset = ColumnSubset::all(&d);
        let mut encoder = RowEncoder::new(threshold);
        let mut stream = BytesMut::new();
        for sample in &samples {
            encoder.encode_row(sample, &d, &subset, None).unwrap();
            if encoder.should_flush() {
                stream.extend_from_slice(&encoder.take());
            }
        }
        stream.extend_from_slice(&encoder.finish());

        let decoded = CopyReader::new(stream.freeze(), sample_types())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let expected: Vec<Vec<Value>> = samples.iter().map(to_values).collect();
        prop_assert_eq!(decoded, expected);
    }
}
