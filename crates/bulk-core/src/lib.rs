//! Core types for the pg-bulk loader.
//!
//! This crate provides the database-agnostic half of the loader:
//!
//! - [`WireType`] - Binary wire representation of a column
//! - [`Value`] - Dynamically-typed column value handed to the row codec
//! - [`Record`] / [`EntityMetadata`] - The metadata provider boundary
//! - [`SchemaResolver`] - Record type → [`EntityDescriptor`], cached per type
//! - [`ColumnSubset`] - Ordered sub-sequence of a descriptor's columns
//! - [`ConflictAction`] - What an insert does when a key already exists
//!
//! # Architecture
//!
//! ```text
//! bulk-core (this crate)
//!    │
//!    ├─── postgresql-copy   (binary COPY codec over Value / WireType)
//!    │
//!    └─── postgresql-bulk   (upload engine, transactions, transport)
//! ```
//!
//! # Example
//!
//! ```rust
//! use bulk_core::{EntityMetadata, FieldMapping, Record, SchemaResolver, Value, WireType};
//!
//! struct Tag {
//!     id: i64,
//!     label: String,
//! }
//!
//! impl Record for Tag {
//!     fn describe() -> EntityMetadata {
//!         EntityMetadata::new("tags")
//!             .field(FieldMapping::new("id", WireType::Int8).key())
//!             .field(FieldMapping::new("label", WireType::Text))
//!     }
//!
//!     fn column_value(&self, column: &str) -> Option<Value> {
//!         match column {
//!             "id" => Some(self.id.into()),
//!             "label" => Some(self.label.as_str().into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! let descriptor = SchemaResolver::resolve::<Tag>().unwrap();
//! assert_eq!(descriptor.column_names(), vec!["id", "label"]);
//! assert_eq!(descriptor.key().unwrap().name, "id");
//! ```

pub mod conflict;
pub mod resolver;
pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use conflict::{ConflictAction, PolicyError};
pub use resolver::SchemaResolver;
pub use schema::{
    ColumnDescriptor, ColumnSubset, EntityDescriptor, EntityMetadata, FieldMapping, Generation,
    Record, SchemaError, TableName,
};
pub use types::WireType;
pub use values::{FromValue, Interval, RangeBound, RangeValue, Value, ValueError};
