//! Schema resolution: record metadata → `EntityDescriptor`.
//!
//! Resolution is a pure function of the metadata a record type declares.
//! Results are memoised process-wide by `TypeId`; entries are never
//! evicted because a record's persisted shape cannot change at runtime.

use crate::schema::{
    ColumnDescriptor, EntityDescriptor, EntityMetadata, FieldMapping, Record, SchemaError,
};
use parking_lot::RwLock;
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

type DescriptorCache = RwLock<HashMap<TypeId, Arc<EntityDescriptor>>>;

static CACHE: OnceLock<DescriptorCache> = OnceLock::new();

fn cache() -> &'static DescriptorCache {
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolves record types to their column maps.
pub struct SchemaResolver;

impl SchemaResolver {
    /// Resolve `R`, building and caching its descriptor on first use.
    ///
    /// Two threads resolving the same type for the first time may both
    /// build a descriptor; the results are identical and the last insert
    /// wins. Failed resolutions are not cached.
    pub fn resolve<R: Record>() -> Result<Arc<EntityDescriptor>, SchemaError> {
        let id = TypeId::of::<R>();
        if let Some(found) = cache().read().get(&id) {
            return Ok(Arc::clone(found));
        }

        let descriptor = Arc::new(Self::describe(type_name::<R>(), &R::describe())?);
        debug!(
            "Resolved {} → {} ({} columns, key: {:?})",
            descriptor.record(),
            descriptor.table(),
            descriptor.columns().len(),
            descriptor.key().map(|k| k.name.as_str())
        );
        cache().write().insert(id, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Whether `R` already has a cached descriptor.
    pub fn is_cached<R: Record>() -> bool {
        cache().read().contains_key(&TypeId::of::<R>())
    }

    /// Build a descriptor from metadata without touching the cache.
    pub fn describe(record: &str, metadata: &EntityMetadata) -> Result<EntityDescriptor, SchemaError> {
        let mut columns: Vec<ColumnDescriptor> = Vec::new();
        let mut key_candidates: Vec<String> = Vec::new();
        let mut inherited_key: Option<String> = None;

        if let Some(base) = &metadata.base {
            let base_descriptor = Self::describe(record, base)?;
            inherited_key = base_descriptor.key().map(|k| k.name.clone());
            columns.extend(base_descriptor.columns().iter().cloned());
        }
        let inherited = columns.len();

        for field in ordered_fields(&metadata.fields) {
            if columns[..inherited].iter().any(|c| c.name == field.name) {
                // Provider repeated a base column for the subtype.
                continue;
            }
            if columns[inherited..].iter().any(|c| c.name == field.name) {
                return Err(SchemaError::DuplicateColumn {
                    record: record.to_string(),
                    column: field.name.clone(),
                });
            }
            if field.key {
                key_candidates.push(field.name.clone());
            }
            columns.push(ColumnDescriptor {
                name: field.name.clone(),
                ordinal: columns.len(),
                wire_type: field.wire_type,
                nullable: field.nullable,
                primary_key: false,
                generation: field.generation,
            });
        }

        if columns.is_empty() {
            return Err(SchemaError::NoColumns(record.to_string()));
        }

        let key_name = match &metadata.key_override {
            Some(column) => Some(column.clone()),
            None if key_candidates.len() > 1 => {
                return Err(SchemaError::CompositeKey {
                    record: record.to_string(),
                    columns: key_candidates,
                })
            }
            None => key_candidates.pop().or(inherited_key),
        };

        let key = match key_name {
            Some(name) => {
                let position = columns.iter().position(|c| c.name == name).ok_or_else(|| {
                    SchemaError::UnknownKey {
                        record: record.to_string(),
                        column: name.clone(),
                    }
                })?;
                Some(position)
            }
            None => None,
        };

        for column in columns.iter_mut() {
            column.primary_key = key == Some(column.ordinal);
        }

        Ok(EntityDescriptor::new(
            record.to_string(),
            metadata.table.clone(),
            columns,
            key,
        ))
    }
}

/// Mapped fields sorted by declaration order; ties keep insertion order.
fn ordered_fields(fields: &[FieldMapping]) -> Vec<&FieldMapping> {
    let mut mapped: Vec<&FieldMapping> = fields.iter().filter(|f| f.mapped).collect();
    mapped.sort_by_key(|f| f.order);
    mapped
}
