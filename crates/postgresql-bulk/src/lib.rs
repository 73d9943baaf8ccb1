//! Bulk insert, update and upsert of typed records into PostgreSQL.
//!
//! Records implementing [`bulk_core::Record`] are streamed to the server
//! over binary `COPY` and, where the operation needs it, merged into the
//! target by a single statement from a per-call temporary staging table.
//! Each call is all-or-nothing.
//!
//! # Insert and upsert
//!
//! ```ignore
//! use postgresql_bulk::{BulkConfig, BulkUploader, ConflictAction, WriteOptions};
//!
//! let mut uploader = BulkUploader::connect(&connection_string, BulkConfig::default()).await?;
//!
//! // Plain insert; generated keys are written back into `addresses`.
//! uploader.insert(&mut addresses).await?;
//!
//! // Upsert only the postal code of colliding rows.
//! let policy = ConflictAction::update_columns_for::<Address>("address_id", ["postal_code"])?;
//! uploader
//!     .insert_with(&mut more, WriteOptions::new().on_conflict(policy))
//!     .await?;
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! let mut tx = uploader.begin().await?;
//! tx.update(&changed).await?;
//! tx.import(&incoming).await?;
//! tx.commit().await?;
//! ```
//!
//! A failed call inside a transaction rolls back to its own savepoint and
//! leaves the transaction usable.

pub mod blocking;
mod client;
pub mod config;
pub mod error;
mod plan;
pub mod statement;
mod transaction;
pub mod transport;
mod uploader;

// Make testing module available for integration tests
#[doc(hidden)]
pub mod testing;

pub use blocking::{BlockingBulkUploader, BlockingTransaction};
pub use bulk_core::{ConflictAction, Record};
pub use client::{PgCopyChannel, PgTransport};
pub use config::{BulkConfig, UnmatchedUpdate};
pub use error::{BulkError, OperationKind, Phase, ReconcileCause, TransferCause, TransportError};
pub use transaction::BulkTransaction;
pub use transport::{CopyChannel, RawRow, Transport};
pub use uploader::{BulkOutcome, BulkUploader, WriteOptions};
pub use tokio_util::sync::CancellationToken;
