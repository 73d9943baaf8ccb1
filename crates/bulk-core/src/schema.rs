//! Schema definitions for the pg-bulk loader.
//!
//! ## Type Hierarchy
//!
//! **Provider types** (what a record shape declares):
//! - `FieldMapping` - One declared field and how it maps to a column
//! - `EntityMetadata` - Table name, fields, optional base shape and key override
//! - `Record` - The trait a record type implements to describe itself and
//!   hand out column values
//!
//! **Resolved types** (what the resolver produces, immutable):
//! - `ColumnDescriptor` - Single persisted column
//! - `EntityDescriptor` - Ordered columns plus key for one record type
//! - `ColumnSubset` - Ordered sub-sequence of a descriptor's columns

use crate::types::WireType;
use crate::values::{Value, ValueError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Error Types
// ============================================================================

/// Error type for schema resolution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// The record type maps no persisted column at all
    #[error("record type '{0}' maps no persisted columns")]
    NoColumns(String),

    /// Two fields map to the same column
    #[error("column '{column}' is mapped twice in '{record}'")]
    DuplicateColumn { record: String, column: String },

    /// Update/import need a key column and the type has none
    #[error("record type '{0}' has no key column; only plain insert is available")]
    NoKey(String),

    /// More than one field is flagged as key
    #[error("record type '{record}' declares a composite key ({columns:?}); a single key column is required")]
    CompositeKey { record: String, columns: Vec<String> },

    /// Key override names a column that is not mapped
    #[error("key column '{column}' is not mapped in '{record}'")]
    UnknownKey { record: String, column: String },

    /// A column name that the descriptor does not contain
    #[error("column '{column}' not found in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// A column subset that does not follow descriptor order
    #[error("column '{column}' is out of descriptor order in table '{table}'")]
    ColumnOrder { table: String, column: String },
}

// ============================================================================
// Provider Types
// ============================================================================

/// How the server fills a column the client may not send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// `serial` / `GENERATED ... AS IDENTITY`; writable only with
    /// `OVERRIDING SYSTEM VALUE`
    Identity,
    /// Plain `DEFAULT` expression; omitted on insert, writable on update
    Default,
    /// `GENERATED ALWAYS AS (...) STORED`; never writable
    Computed,
}

impl Generation {
    /// Whether a client-supplied value may ever be written to the column
    /// by an `UPDATE`.
    pub fn is_updatable(&self) -> bool {
        matches!(self, Generation::Default)
    }
}

/// Table name, optionally schema-qualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// Schema (namespace), `None` means the connection's search path
    pub schema: Option<String>,
    /// Table name
    pub name: String,
}

impl TableName {
    /// Unqualified table name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Schema-qualified table name.
    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One declared field of a record shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column name
    pub name: String,

    /// Wire type of the column
    pub wire_type: WireType,

    /// Whether this field is the key column
    #[serde(default)]
    pub key: bool,

    /// Server-side value generation, if any
    #[serde(default)]
    pub generation: Option<Generation>,

    /// Whether the column accepts NULL
    #[serde(default)]
    pub nullable: bool,

    /// Declaration order; fields are sorted by it (stable)
    #[serde(default)]
    pub order: u32,

    /// Unmapped fields are not persisted and are skipped by the resolver
    #[serde(default = "default_mapped")]
    pub mapped: bool,
}

fn default_mapped() -> bool {
    true
}

impl FieldMapping {
    /// Create a non-null, mapped, non-key field.
    pub fn new(name: impl Into<String>, wire_type: WireType) -> Self {
        Self {
            name: name.into(),
            wire_type,
            key: false,
            generation: None,
            nullable: false,
            order: 0,
            mapped: true,
        }
    }

    /// Mark as the key column.
    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    /// Mark as nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as server-generated.
    pub fn generated(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Set the declaration order explicitly.
    pub fn order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    /// Mark as not persisted.
    pub fn unmapped(mut self) -> Self {
        self.mapped = false;
        self
    }
}

/// Metadata a record shape declares about itself.
///
/// # Example
///
/// ```
/// use bulk_core::{EntityMetadata, FieldMapping, Generation, WireType};
///
/// let base = EntityMetadata::new("addresses")
///     .field(FieldMapping::new("address_id", WireType::Int4).key().generated(Generation::Identity))
///     .field(FieldMapping::new("street_name", WireType::Text).nullable());
///
/// // A derived shape stored in the same table with one extra column.
/// let derived = EntityMetadata::derived(base)
///     .field(FieldMapping::new("localized_name", WireType::Text).nullable());
/// assert_eq!(derived.table.name, "addresses");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// Target table
    pub table: TableName,

    /// Fields declared by this shape (not including the base's)
    pub fields: Vec<FieldMapping>,

    /// Supertype shape, whose columns come first
    #[serde(default)]
    pub base: Option<Box<EntityMetadata>>,

    /// Explicit key column, overriding field key flags
    #[serde(default)]
    pub key_override: Option<String>,
}

impl EntityMetadata {
    /// Create metadata for a shape stored in `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self::for_table(TableName::new(table))
    }

    /// Create metadata for a shape stored in an explicit table name.
    pub fn for_table(table: TableName) -> Self {
        Self {
            table,
            fields: Vec::new(),
            base: None,
            key_override: None,
        }
    }

    /// Create metadata for a shape derived from `base`, stored in the
    /// base's table.
    pub fn derived(base: EntityMetadata) -> Self {
        Self {
            table: base.table.clone(),
            fields: Vec::new(),
            base: Some(Box::new(base)),
            key_override: None,
        }
    }

    /// Add a field. Fields without an explicit order keep insertion order.
    pub fn field(mut self, mut field: FieldMapping) -> Self {
        if field.order == 0 {
            field.order = self.fields.len() as u32 + 1;
        }
        self.fields.push(field);
        self
    }

    /// Use `column` as the key regardless of field flags.
    pub fn with_key(mut self, column: impl Into<String>) -> Self {
        self.key_override = Some(column.into());
        self
    }
}

/// A record type the loader can move in and out of a table.
///
/// `describe` is the metadata provider boundary: it is called once per type
/// and the result is cached process-wide, so it must be a pure function of
/// the type.
pub trait Record: Send + Sync + 'static {
    /// Describe the persisted shape of this record type.
    fn describe() -> EntityMetadata;

    /// Value of the named column, `None` if the record does not map it.
    fn column_value(&self, column: &str) -> Option<Value>;

    /// Store a value read from the server (generated keys, exports).
    fn set_column_value(&mut self, column: &str, value: Value) -> Result<(), ValueError> {
        let _ = value;
        Err(ValueError::UnknownColumn(column.to_string()))
    }
}

// ============================================================================
// Resolved Types
// ============================================================================

/// A resolved, persisted column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Position in the descriptor (0-based)
    pub ordinal: usize,
    /// Wire type
    pub wire_type: WireType,
    /// Whether the column accepts NULL
    pub nullable: bool,
    /// Whether this is the key column
    pub primary_key: bool,
    /// Server-side value generation
    pub generation: Option<Generation>,
}

impl ColumnDescriptor {
    /// Whether the server generates this column's value on insert.
    pub fn is_generated(&self) -> bool {
        self.generation.is_some()
    }

    /// Whether an `UPDATE` may write this column.
    pub fn is_updatable(&self) -> bool {
        self.generation.map_or(true, |g| g.is_updatable())
    }
}

/// Resolved column map for one record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescriptor {
    record: String,
    table: TableName,
    columns: Vec<ColumnDescriptor>,
    key: Option<usize>,
}

impl EntityDescriptor {
    pub(crate) fn new(
        record: String,
        table: TableName,
        columns: Vec<ColumnDescriptor>,
        key: Option<usize>,
    ) -> Self {
        Self {
            record,
            table,
            columns,
            key,
        }
    }

    /// Name of the record type this descriptor was resolved from.
    pub fn record(&self) -> &str {
        &self.record
    }

    /// Target table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Columns in wire order.
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Key column, if any.
    pub fn key(&self) -> Option<&ColumnDescriptor> {
        self.key.map(|idx| &self.columns[idx])
    }

    /// Key column, or `SchemaError::NoKey`.
    pub fn require_key(&self) -> Result<&ColumnDescriptor, SchemaError> {
        self.key()
            .ok_or_else(|| SchemaError::NoKey(self.record.clone()))
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column by name, or `SchemaError::UnknownColumn`.
    pub fn require_column(&self, name: &str) -> Result<&ColumnDescriptor, SchemaError> {
        self.column(name).ok_or_else(|| SchemaError::UnknownColumn {
            table: self.table.to_string(),
            column: name.to_string(),
        })
    }

    /// All column names in wire order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns the server generates.
    pub fn generated_columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(|c| c.is_generated())
    }
}

/// An ordered sub-sequence of a descriptor's columns.
///
/// The positions always follow descriptor order, so binding values
/// positionally against a statement's column list built from the same
/// subset cannot drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSubset {
    positions: Vec<usize>,
}

impl ColumnSubset {
    /// Every column of the descriptor.
    pub fn all(descriptor: &EntityDescriptor) -> Self {
        Self {
            positions: (0..descriptor.columns().len()).collect(),
        }
    }

    /// Columns matching a predicate, in descriptor order.
    pub fn filter(
        descriptor: &EntityDescriptor,
        mut keep: impl FnMut(&ColumnDescriptor) -> bool,
    ) -> Self {
        Self {
            positions: descriptor
                .columns()
                .iter()
                .filter(|c| keep(c))
                .map(|c| c.ordinal)
                .collect(),
        }
    }

    /// Named columns; names must appear in descriptor order.
    pub fn from_names(descriptor: &EntityDescriptor, names: &[&str]) -> Result<Self, SchemaError> {
        let mut positions = Vec::with_capacity(names.len());
        for name in names {
            let column = descriptor.require_column(name)?;
            if positions.last().is_some_and(|&last| column.ordinal <= last) {
                return Err(SchemaError::ColumnOrder {
                    table: descriptor.table().to_string(),
                    column: name.to_string(),
                });
            }
            positions.push(column.ordinal);
        }
        Ok(Self { positions })
    }

    /// Number of columns in the subset.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the subset is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Whether the subset contains the column at `ordinal`.
    pub fn contains(&self, ordinal: usize) -> bool {
        self.positions.binary_search(&ordinal).is_ok()
    }

    /// Iterate the selected columns in descriptor order.
    pub fn columns<'d>(
        &'d self,
        descriptor: &'d EntityDescriptor,
    ) -> impl Iterator<Item = &'d ColumnDescriptor> + 'd {
        self.positions.iter().map(move |&p| &descriptor.columns()[p])
    }

    /// Names of the selected columns in descriptor order.
    pub fn names<'d>(&'d self, descriptor: &'d EntityDescriptor) -> Vec<&'d str> {
        self.columns(descriptor).map(|c| c.name.as_str()).collect()
    }
}
