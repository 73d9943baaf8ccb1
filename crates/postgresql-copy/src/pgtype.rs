//! Bridging between `WireType` tags and `postgres-types`.

use crate::codec::decode_value;
use crate::error::CodecError;
use bulk_core::{Value, WireType};
use bytes::Bytes;
use postgres_types::{FromSql, Type};
use std::error::Error;

/// PostgreSQL type for a wire type tag.
pub fn pg_type(wire_type: WireType) -> Type {
    match wire_type {
        WireType::Bool => Type::BOOL,
        WireType::Int2 => Type::INT2,
        WireType::Int4 => Type::INT4,
        WireType::Int8 => Type::INT8,
        WireType::Float4 => Type::FLOAT4,
        WireType::Float8 => Type::FLOAT8,
        WireType::Numeric => Type::NUMERIC,
        WireType::Text => Type::TEXT,
        WireType::Varchar => Type::VARCHAR,
        WireType::Bpchar => Type::BPCHAR,
        WireType::Bytea => Type::BYTEA,
        WireType::Uuid => Type::UUID,
        WireType::Json => Type::JSON,
        WireType::Jsonb => Type::JSONB,
        WireType::Date => Type::DATE,
        WireType::Time => Type::TIME,
        WireType::Timestamp => Type::TIMESTAMP,
        WireType::Timestamptz => Type::TIMESTAMPTZ,
        WireType::Interval => Type::INTERVAL,
        WireType::Int4Range => Type::INT4_RANGE,
        WireType::Int8Range => Type::INT8_RANGE,
        WireType::NumRange => Type::NUM_RANGE,
        WireType::DateRange => Type::DATE_RANGE,
        WireType::TsRange => Type::TS_RANGE,
        WireType::TstzRange => Type::TSTZ_RANGE,
    }
}

/// Whether a server column of type `actual` can be decoded as `expected`.
///
/// The text family shares one binary format, so `text`, `varchar`, `bpchar`
/// and `name` are interchangeable.
pub fn is_compatible(expected: WireType, actual: &Type) -> bool {
    let text_family = |ty: &Type| {
        *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    };
    let wanted = pg_type(expected);
    wanted == *actual || (text_family(&wanted) && text_family(actual))
}

/// One field of a result row, captured as raw binary bytes.
///
/// Used to read `RETURNING` rows through the same codec that writes COPY
/// data, instead of each type's `FromSql` impl.
#[derive(Debug, Clone, PartialEq)]
pub struct RawField {
    ty: Type,
    bytes: Option<Bytes>,
}

impl RawField {
    /// Build a field from a server type and its payload (`None` for NULL).
    pub fn new(ty: Type, bytes: Option<Bytes>) -> Self {
        Self { ty, bytes }
    }

    /// Server-reported type.
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    /// Whether the field is NULL.
    pub fn is_null(&self) -> bool {
        self.bytes.is_none()
    }

    /// Decode as `expected`, checking the server type first.
    pub fn decode(&self, expected: WireType) -> Result<Value, CodecError> {
        if !is_compatible(expected, &self.ty) {
            return Err(CodecError::ServerType {
                expected,
                actual: self.ty.name().to_string(),
            });
        }
        decode_value(expected, self.bytes.as_deref())
    }
}

impl<'a> FromSql<'a> for RawField {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawField::new(ty.clone(), Some(Bytes::copy_from_slice(raw))))
    }

    fn from_sql_null(ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(RawField::new(ty.clone(), None))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_maps_to_its_pg_name() {
        for tag in WireType::ALL {
            assert_eq!(pg_type(tag).name(), tag.pg_name());
        }
    }

    #[test]
    fn test_text_family_is_interchangeable() {
        assert!(is_compatible(WireType::Text, &Type::VARCHAR));
        assert!(is_compatible(WireType::Bpchar, &Type::TEXT));
        assert!(!is_compatible(WireType::Json, &Type::JSONB));
        assert!(!is_compatible(WireType::Int4, &Type::INT8));
    }

    #[test]
    fn test_raw_field_decode() {
        let field = RawField::from_sql(&Type::INT4, &[0, 0, 0, 42]).unwrap();
        assert_eq!(field.decode(WireType::Int4).unwrap(), Value::Int32(42));

        let null = RawField::from_sql_null(&Type::TIMESTAMP).unwrap();
        assert!(null.is_null());
        assert_eq!(null.decode(WireType::Timestamp).unwrap(), Value::Null);

        let err = field.decode(WireType::Int8).unwrap_err();
        assert!(matches!(err, CodecError::ServerType { .. }));
    }
}
