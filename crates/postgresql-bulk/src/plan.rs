//! Column selection for each operation.
//!
//! A plan is computed from the resolved descriptor, the conflict policy and
//! the config before any I/O, so every shape error surfaces as a
//! `Schema`/`Policy` error with the target untouched.

use crate::config::BulkConfig;
use bulk_core::{
    ColumnDescriptor, ColumnSubset, ConflictAction, EntityDescriptor, Generation, PolicyError,
    SchemaError,
};

/// How rows reach the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    /// `COPY` straight into the target.
    Direct,
    /// `COPY` into a staging table, then one `INSERT ... SELECT`.
    Staged,
}

#[derive(Debug, Clone)]
pub(crate) struct InsertPlan {
    pub sent: ColumnSubset,
    /// Generated columns read back with `RETURNING`.
    pub returning: ColumnSubset,
    pub overriding_system_value: bool,
    pub route: Route,
    pub conflict: Option<ConflictAction>,
}

impl InsertPlan {
    pub fn new(
        descriptor: &EntityDescriptor,
        conflict: Option<ConflictAction>,
        config: &BulkConfig,
    ) -> Result<Self, PolicyError> {
        if let Some(policy) = &conflict {
            policy.validate(descriptor)?;
        }

        let key = descriptor.key().map(|k| k.name.as_str());
        let policy_columns: Vec<&str> = match &conflict {
            Some(ConflictAction::UpdateColumns { key, columns }) => std::iter::once(key.as_str())
                .chain(columns.iter().map(String::as_str))
                .collect(),
            Some(_) => key.into_iter().collect(),
            None => Vec::new(),
        };

        let sent = ColumnSubset::filter(descriptor, |c| {
            is_insertable(c, config.insert_generated) || policy_columns.contains(&c.name.as_str())
        });
        if sent.is_empty() {
            return Err(SchemaError::NoColumns(descriptor.record().to_string()).into());
        }

        let returning = if conflict.is_none() && config.read_back_generated {
            ColumnSubset::filter(descriptor, |c| c.is_generated() && !sent.contains(c.ordinal))
        } else {
            ColumnSubset::filter(descriptor, |_| false)
        };

        let overriding_system_value = sent
            .columns(descriptor)
            .any(|c| c.generation == Some(Generation::Identity));

        let route = if conflict.is_some() || !returning.is_empty() {
            Route::Staged
        } else {
            Route::Direct
        };

        Ok(Self {
            sent,
            returning,
            overriding_system_value,
            route,
            conflict,
        })
    }
}

fn is_insertable(column: &ColumnDescriptor, insert_generated: bool) -> bool {
    match column.generation {
        None => true,
        Some(Generation::Computed) => false,
        Some(Generation::Identity | Generation::Default) => insert_generated,
    }
}

#[derive(Debug, Clone)]
pub(crate) struct UpdatePlan {
    /// Key plus every column written by the update.
    pub staged: ColumnSubset,
    pub key: String,
    pub set_columns: Vec<String>,
}

impl UpdatePlan {
    pub fn new(descriptor: &EntityDescriptor) -> Result<Self, PolicyError> {
        let key = descriptor.require_key()?;
        let staged = ColumnSubset::filter(descriptor, |c| c.primary_key || c.is_updatable());
        let set_columns: Vec<String> = staged
            .columns(descriptor)
            .filter(|c| !c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        if set_columns.is_empty() {
            return Err(PolicyError::EmptyColumns);
        }
        Ok(Self {
            staged,
            key: key.name.clone(),
            set_columns,
        })
    }
}

/// Import policy: the given one, or update every writable non-key column.
pub(crate) fn import_policy(
    descriptor: &EntityDescriptor,
    conflict: Option<ConflictAction>,
) -> Result<ConflictAction, PolicyError> {
    match conflict {
        Some(policy) => Ok(policy),
        None => ConflictAction::update_all(descriptor),
    }
}
