//! The `addresses` sample table and record generators.

use bulk_core::{
    EntityMetadata, FieldMapping, FromValue, Generation, RangeValue, Record, Value, ValueError,
    WireType,
};
use chrono::NaiveDateTime;

pub const CREATE_ADDRESSES: &str = "CREATE TABLE IF NOT EXISTS addresses (
    address_id SERIAL PRIMARY KEY,
    street_name TEXT NOT NULL,
    house_number INTEGER NOT NULL,
    extra_house_number INTEGER,
    postal_code TEXT,
    duration TSRANGE,
    created_at TIMESTAMP NOT NULL DEFAULT now(),
    localized_name TEXT,
    index2 INTEGER
)";

pub const TRUNCATE_ADDRESSES: &str = "TRUNCATE addresses RESTART IDENTITY CASCADE";

pub const STREETS: [&str; 3] = ["First", "Second", "Third"];

pub const POSTAL_CODES: [&str; 4] = ["001001", "002002", "003003", "004004"];

pub const EXTRA_NUMBERS: [Option<i32>; 9] = [
    None,
    Some(1),
    Some(2),
    Some(3),
    Some(5),
    Some(8),
    Some(13),
    Some(21),
    Some(34),
];

/// A row of `addresses`; `address_id` and `created_at` are filled by the
/// server unless set explicitly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub address_id: i32,
    pub street_name: String,
    pub house_number: i32,
    pub extra_house_number: Option<i32>,
    pub postal_code: Option<String>,
    pub duration: Option<RangeValue>,
    pub created_at: Option<NaiveDateTime>,
}

fn address_metadata() -> EntityMetadata {
    EntityMetadata::new("addresses")
        .field(
            FieldMapping::new("address_id", WireType::Int4)
                .key()
                .generated(Generation::Default),
        )
        .field(FieldMapping::new("street_name", WireType::Text))
        .field(FieldMapping::new("house_number", WireType::Int4))
        .field(FieldMapping::new("extra_house_number", WireType::Int4).nullable())
        .field(FieldMapping::new("postal_code", WireType::Text).nullable())
        .field(FieldMapping::new("duration", WireType::TsRange).nullable())
        .field(FieldMapping::new("created_at", WireType::Timestamp).generated(Generation::Default))
}

impl Record for Address {
    fn describe() -> EntityMetadata {
        address_metadata()
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        Some(match column {
            "address_id" => self.address_id.into(),
            "street_name" => self.street_name.clone().into(),
            "house_number" => self.house_number.into(),
            "extra_house_number" => self.extra_house_number.into(),
            "postal_code" => self.postal_code.clone().into(),
            "duration" => self.duration.clone().into(),
            "created_at" => self.created_at.into(),
            _ => return None,
        })
    }

    fn set_column_value(&mut self, column: &str, value: Value) -> Result<(), ValueError> {
        match column {
            "address_id" => self.address_id = FromValue::from_value(value)?,
            "street_name" => self.street_name = FromValue::from_value(value)?,
            "house_number" => self.house_number = FromValue::from_value(value)?,
            "extra_house_number" => self.extra_house_number = FromValue::from_value(value)?,
            "postal_code" => self.postal_code = FromValue::from_value(value)?,
            "duration" => self.duration = FromValue::from_value(value)?,
            "created_at" => self.created_at = FromValue::from_value(value)?,
            _ => return Err(ValueError::UnknownColumn(column.to_string())),
        }
        Ok(())
    }
}

/// An [`Address`] with the two columns only the extended shape maps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressExtended {
    pub base: Address,
    pub localized_name: Option<String>,
    pub index2: Option<i32>,
}

impl Record for AddressExtended {
    fn describe() -> EntityMetadata {
        EntityMetadata::derived(address_metadata())
            .field(FieldMapping::new("localized_name", WireType::Text).nullable())
            .field(FieldMapping::new("index2", WireType::Int4).nullable())
    }

    fn column_value(&self, column: &str) -> Option<Value> {
        match column {
            "localized_name" => Some(self.localized_name.clone().into()),
            "index2" => Some(self.index2.into()),
            other => self.base.column_value(other),
        }
    }

    fn set_column_value(&mut self, column: &str, value: Value) -> Result<(), ValueError> {
        match column {
            "localized_name" => self.localized_name = FromValue::from_value(value)?,
            "index2" => self.index2 = FromValue::from_value(value)?,
            other => return self.base.set_column_value(other, value),
        }
        Ok(())
    }
}

/// `count` addresses cycling through the sample streets, postal codes and
/// extra numbers, each with an empty-width duration at `now`.
pub fn addresses(count: usize, now: NaiveDateTime) -> Vec<Address> {
    (0..count)
        .map(|i| Address {
            address_id: 0,
            street_name: STREETS[i % STREETS.len()].to_string(),
            house_number: i as i32 + 1,
            extra_house_number: EXTRA_NUMBERS[i % EXTRA_NUMBERS.len()],
            postal_code: Some(POSTAL_CODES[i % POSTAL_CODES.len()].to_string()),
            duration: Some(RangeValue::inclusive(now, now)),
            created_at: None,
        })
        .collect()
}

pub fn extended_addresses(count: usize, now: NaiveDateTime) -> Vec<AddressExtended> {
    addresses(count, now)
        .into_iter()
        .enumerate()
        .map(|(i, base)| AddressExtended {
            localized_name: Some(base.street_name.clone()),
            index2: Some(i as i32),
            base,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulk_core::SchemaResolver;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .and_then(|d| d.and_hms_opt(8, 30, 0))
            .unwrap()
    }

    #[test]
    fn test_generated_addresses_cycle_sample_values() {
        let rows = addresses(10, now());
        assert_eq!(rows.len(), 10);
        assert_eq!(rows[0].street_name, "First");
        assert_eq!(rows[4].street_name, "Second");
        assert_eq!(rows[5].postal_code.as_deref(), Some("002002"));
        assert_eq!(rows[0].extra_house_number, None);
        assert_eq!(rows[9].extra_house_number, None);
        assert_eq!(rows[8].extra_house_number, Some(34));
        assert_eq!(rows[9].house_number, 10);
        assert!(rows.iter().all(|r| r.address_id == 0 && r.created_at.is_none()));
    }

    #[test]
    fn test_extended_addresses_carry_index_and_name() {
        let rows = extended_addresses(4, now());
        assert_eq!(rows[3].index2, Some(3));
        assert_eq!(rows[2].localized_name.as_deref(), Some("Third"));
        assert_eq!(rows[2].base.street_name, "Third");
    }

    #[test]
    fn test_both_shapes_resolve_to_addresses() {
        let base = SchemaResolver::resolve::<Address>().unwrap();
        let extended = SchemaResolver::resolve::<AddressExtended>().unwrap();
        assert_eq!(base.table(), extended.table());
        assert_eq!(base.columns().len(), 7);
        assert_eq!(extended.columns().len(), 9);
        assert_eq!(extended.key().unwrap().name, "address_id");
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let mut address = Address::default();
        let err = address
            .set_column_value("nope", Value::Int32(1))
            .unwrap_err();
        assert!(matches!(err, ValueError::UnknownColumn(c) if c == "nope"));
        assert_eq!(address.column_value("nope"), None);
    }
}
