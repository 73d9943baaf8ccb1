//! Error types for bulk operations.

use bulk_core::{PolicyError, SchemaError, ValueError};
use postgresql_copy::CodecError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Public bulk operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Insert,
    Update,
    Import,
    Export,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Import => "import",
            OperationKind::Export => "export",
        })
    }
}

/// Per-call lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Resolving,
    Streaming,
    Reconciling,
    Committed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Resolving => "resolving",
            Phase::Streaming => "streaming",
            Phase::Reconciling => "reconciling",
            Phase::Committed => "committed",
            Phase::Failed => "failed",
        })
    }
}

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Error, Debug)]
pub enum TransportError {
    /// PostgreSQL connection or query error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Operation exceeded the configured statement timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Connection is gone.
    #[error("connection closed")]
    Closed,

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

/// Why streaming rows failed.
#[derive(Error, Debug)]
pub enum TransferCause {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Exported value could not be stored in the record.
    #[error("cannot assign column '{column}': {source}")]
    Value {
        column: String,
        #[source]
        source: ValueError,
    },
}

/// Why the reconciliation statement failed.
#[derive(Error, Debug)]
pub enum ReconcileCause {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Update staged rows whose keys are absent from the target.
    #[error("only {matched} of {expected} staged rows matched an existing key")]
    UnmatchedKeys { expected: u64, matched: u64 },

    /// `RETURNING` produced a different number of rows than were sent.
    #[error("server returned {returned} rows for {sent} inserted records")]
    RowCount { sent: usize, returned: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Record refused a value read back from the server.
    #[error("cannot assign column '{column}': {source}")]
    Assign {
        column: String,
        #[source]
        source: ValueError,
    },
}

/// Errors returned by bulk operations.
#[derive(Error, Debug)]
pub enum BulkError {
    /// Record type cannot be mapped.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Conflict policy is invalid for the record type or operation.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// Encoding or sending rows failed; `row` is the index of the record
    /// being processed.
    #[error("{operation} failed at row {row}: {cause}")]
    Transfer {
        operation: OperationKind,
        row: usize,
        #[source]
        cause: TransferCause,
    },

    /// The single reconciliation statement failed.
    #[error("{operation} reconciliation failed: {cause}")]
    Reconciliation {
        operation: OperationKind,
        #[source]
        cause: ReconcileCause,
    },

    /// A transport operation exceeded the statement timeout.
    #[error("{operation} timed out after {after:?} while {phase}")]
    Timeout {
        operation: OperationKind,
        phase: Phase,
        after: Duration,
    },

    /// The caller cancelled the call before reconciliation.
    #[error("{operation} was cancelled")]
    Cancelled { operation: OperationKind },

    /// BEGIN / COMMIT / ROLLBACK / SAVEPOINT failed.
    #[error("transaction control failed: {0}")]
    Transaction(#[source] TransportError),

    /// Opening the session failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] TransportError),

    /// A caller-supplied statement inside a transaction failed.
    #[error("statement failed: {0}")]
    Statement(#[source] TransportError),

    /// The blocking facade could not start its runtime.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl BulkError {
    /// Streaming failure at `row`, surfacing timeouts as [`BulkError::Timeout`].
    pub(crate) fn transfer(operation: OperationKind, row: usize, cause: TransferCause) -> Self {
        match cause {
            TransferCause::Transport(TransportError::Timeout(after)) => BulkError::Timeout {
                operation,
                phase: Phase::Streaming,
                after,
            },
            cause => BulkError::Transfer {
                operation,
                row,
                cause,
            },
        }
    }

    /// Reconciliation failure, surfacing timeouts as [`BulkError::Timeout`].
    pub(crate) fn reconciliation(operation: OperationKind, cause: ReconcileCause) -> Self {
        match cause {
            ReconcileCause::Transport(TransportError::Timeout(after)) => BulkError::Timeout {
                operation,
                phase: Phase::Reconciling,
                after,
            },
            cause => BulkError::Reconciliation { operation, cause },
        }
    }

    /// Whether the target table is guaranteed untouched by the failed call.
    pub fn is_pre_io(&self) -> bool {
        matches!(self, BulkError::Schema(_) | BulkError::Policy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_lifted() {
        let err = BulkError::transfer(
            OperationKind::Insert,
            7,
            TransferCause::Transport(TransportError::Timeout(Duration::from_secs(2))),
        );
        assert!(matches!(
            err,
            BulkError::Timeout {
                operation: OperationKind::Insert,
                phase: Phase::Streaming,
                ..
            }
        ));

        let err = BulkError::reconciliation(
            OperationKind::Update,
            ReconcileCause::UnmatchedKeys {
                expected: 3,
                matched: 2,
            },
        );
        assert_eq!(
            err.to_string(),
            "update reconciliation failed: only 2 of 3 staged rows matched an existing key"
        );
    }

    #[test]
    fn test_transfer_message_names_row() {
        let err = BulkError::transfer(
            OperationKind::Import,
            41,
            TransferCause::Codec(CodecError::MissingColumn("street_name".into())),
        );
        assert_eq!(
            err.to_string(),
            "import failed at row 41: record has no value for mapped column 'street_name'"
        );
    }
}
