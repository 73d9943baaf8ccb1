//! Transport boundary between the upload engine and the database.
//!
//! The engine only ever needs a byte sink for COPY data, a way to run one
//! statement, and transaction control. Everything else about the
//! connection stays behind these traits, so the engine can be driven by an
//! in-memory transport in tests.

use crate::error::TransportError;
use crate::statement::quote_ident;
use async_trait::async_trait;
use bytes::Bytes;
use postgresql_copy::RawField;

/// One result row, each field captured as raw binary bytes.
pub type RawRow = Vec<RawField>;

/// An open `COPY ... FROM STDIN` stream.
///
/// Dropping a channel without calling [`CopyChannel::finish`] aborts the
/// COPY.
#[async_trait]
pub trait CopyChannel: Send {
    /// Send one chunk of binary COPY data.
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError>;

    /// Complete the COPY; returns the number of rows the server accepted.
    async fn finish(&mut self) -> Result<u64, TransportError>;
}

/// A single database session.
#[async_trait]
pub trait Transport: Send {
    type Channel: CopyChannel;

    /// Start a `COPY ... FROM STDIN` statement.
    async fn open_channel(&mut self, statement: &str) -> Result<Self::Channel, TransportError>;

    /// Run one statement; returns the affected row count.
    async fn execute(&mut self, statement: &str) -> Result<u64, TransportError>;

    /// Run one statement and capture every returned row.
    async fn query_raw(&mut self, statement: &str) -> Result<Vec<RawRow>, TransportError>;

    /// Run a `COPY ... TO STDOUT` statement and collect the whole stream.
    async fn copy_out(&mut self, statement: &str) -> Result<Bytes, TransportError>;

    /// Run one or more statements with the simple query protocol.
    async fn batch_execute(&mut self, statements: &str) -> Result<(), TransportError>;

    async fn begin(&mut self) -> Result<(), TransportError> {
        self.batch_execute("BEGIN").await
    }

    async fn commit(&mut self) -> Result<(), TransportError> {
        self.batch_execute("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), TransportError> {
        self.batch_execute("ROLLBACK").await
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), TransportError> {
        self.batch_execute(&format!("SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), TransportError> {
        self.batch_execute(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), TransportError> {
        self.batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await
    }
}
