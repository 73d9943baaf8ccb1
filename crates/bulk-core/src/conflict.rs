//! Conflict policy for inserts that collide with existing keys.
//!
//! A `ConflictAction` is a decision record, not an operation: the upload
//! engine reads it when it builds the reconciliation statement. All
//! validation happens here, before any statement is sent.

use crate::resolver::SchemaResolver;
use crate::schema::{EntityDescriptor, Record, SchemaError};
use std::collections::HashSet;

/// Error type for invalid conflict policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    /// `UpdateColumns` with nothing to update
    #[error("update policy must name at least one column to update")]
    EmptyColumns,

    /// The key column is also listed as an update target
    #[error("key column '{0}' cannot also be an update target")]
    KeyInColumns(String),

    /// The same update target listed twice
    #[error("update column '{0}' is listed more than once")]
    DuplicateColumn(String),

    /// Policy names a column the table does not have
    #[error("policy column '{column}' not found in table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Update target the server never lets a client write
    #[error("column '{0}' is server-generated and cannot be updated")]
    NotUpdatable(String),

    /// Policy passed to an operation that does not take one
    #[error("a conflict policy does not apply to {0}")]
    NotApplicable(&'static str),

    /// Descriptor resolution failed while validating the policy
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// What to do when an inserted row collides with an existing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    /// Colliding rows are silently dropped from the write
    DoNothing,
    /// Any collision aborts the whole call
    Fail,
    /// Colliding rows get exactly `columns` overwritten
    UpdateColumns {
        /// Column that uniquely identifies a row
        key: String,
        /// Columns to overwrite on collision (never contains `key`)
        columns: Vec<String>,
    },
}

impl ConflictAction {
    /// Build an `UpdateColumns` policy, checking its shape.
    ///
    /// Column existence is checked later against the resolved descriptor;
    /// use [`ConflictAction::update_columns_for`] to check both at once.
    pub fn update_columns<I, S>(key: impl Into<String>, columns: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(PolicyError::EmptyColumns);
        }
        let mut seen = HashSet::new();
        for column in &columns {
            if *column == key {
                return Err(PolicyError::KeyInColumns(key));
            }
            if !seen.insert(column.as_str()) {
                return Err(PolicyError::DuplicateColumn(column.clone()));
            }
        }
        Ok(ConflictAction::UpdateColumns { key, columns })
    }

    /// Build an `UpdateColumns` policy for `R`, validated against its
    /// resolved descriptor.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let policy = ConflictAction::update_columns_for::<Address>("address_id", ["postal_code"])?;
    /// ```
    pub fn update_columns_for<R: Record>(
        key: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, PolicyError> {
        let action = Self::update_columns(key, columns)?;
        let descriptor = SchemaResolver::resolve::<R>()?;
        action.validate(&descriptor)?;
        Ok(action)
    }

    /// Policy that updates every writable non-key column of `R` on
    /// collision with its key.
    pub fn update_all_for<R: Record>() -> Result<Self, PolicyError> {
        let descriptor = SchemaResolver::resolve::<R>()?;
        Self::update_all(&descriptor)
    }

    /// Policy that updates every writable non-key column of `descriptor`.
    pub fn update_all(descriptor: &EntityDescriptor) -> Result<Self, PolicyError> {
        let key = descriptor.require_key()?;
        let columns = descriptor
            .columns()
            .iter()
            .filter(|c| !c.primary_key && c.is_updatable() && !c.is_generated())
            .map(|c| c.name.clone());
        Self::update_columns(key.name.clone(), columns)
    }

    /// Check the policy against a resolved descriptor.
    pub fn validate(&self, descriptor: &EntityDescriptor) -> Result<(), PolicyError> {
        let ConflictAction::UpdateColumns { key, columns } = self else {
            return Ok(());
        };
        let unknown = |column: &str| PolicyError::UnknownColumn {
            table: descriptor.table().to_string(),
            column: column.to_string(),
        };
        descriptor.column(key).ok_or_else(|| unknown(key))?;
        for name in columns {
            let column = descriptor.column(name).ok_or_else(|| unknown(name))?;
            if !column.is_updatable() {
                return Err(PolicyError::NotUpdatable(name.clone()));
            }
        }
        Ok(())
    }

    /// Conflict target column, if the policy names one.
    pub fn key(&self) -> Option<&str> {
        match self {
            ConflictAction::UpdateColumns { key, .. } => Some(key),
            _ => None,
        }
    }
}
