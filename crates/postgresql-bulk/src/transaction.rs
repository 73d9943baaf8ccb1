//! Transaction scopes.
//!
//! Without an open [`BulkTransaction`] every call runs in its own
//! `BEGIN ... COMMIT`. Inside one, each call runs in a savepoint, so a
//! failed call rolls back only its own work and the transaction stays
//! usable.

use crate::client::PgTransport;
use crate::error::{BulkError, OperationKind, Phase};
use crate::transport::Transport;
use crate::uploader::{BulkOutcome, BulkUploader, WriteOptions};
use bulk_core::Record;
use std::fmt;
use tracing::{debug, info, warn};

/// Scope a single call runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Scope {
    Transaction,
    Savepoint(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Transaction => f.write_str("transaction"),
            Scope::Savepoint(name) => write!(f, "savepoint {name}"),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ScopeState {
    /// A `BulkTransaction` is open.
    pub ambient: bool,
    /// The `BulkTransaction` was dropped without commit or rollback.
    pub ambient_abandoned: bool,
    /// Scope of a call that never closed it (its future was dropped).
    pub open: Option<Scope>,
    pub savepoints: u64,
}

impl<T: Transport> BulkUploader<T> {
    /// Start a transaction; every operation on the handle runs in it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut tx = uploader.begin().await?;
    /// tx.execute("DELETE FROM addresses WHERE postal_code IS NULL").await?;
    /// tx.import(&addresses).await?;
    /// tx.commit().await?;
    /// ```
    pub async fn begin(&mut self) -> Result<BulkTransaction<'_, T>, BulkError> {
        self.recover().await?;
        // Until BEGIN returns, treat the transaction as abandoned so an
        // interrupted call still gets rolled back.
        self.state.ambient = true;
        self.state.ambient_abandoned = true;
        self.transport
            .begin()
            .await
            .map_err(BulkError::Transaction)?;
        self.state.ambient_abandoned = false;
        info!("Started transaction");
        Ok(BulkTransaction {
            uploader: self,
            finished: false,
        })
    }

    /// Roll back whatever an abandoned transaction or an interrupted call
    /// left open.
    pub(crate) async fn recover(&mut self) -> Result<(), BulkError> {
        if self.state.ambient_abandoned {
            warn!("Rolling back abandoned transaction");
            self.transport
                .rollback()
                .await
                .map_err(BulkError::Transaction)?;
            self.state.ambient = false;
            self.state.ambient_abandoned = false;
            self.state.open = None;
            return Ok(());
        }
        if let Some(scope) = self.state.open.clone() {
            warn!("Rolling back interrupted {}", scope);
            self.rollback_scope(&scope).await?;
            self.state.open = None;
        }
        Ok(())
    }

    pub(crate) async fn open_scope(&mut self) -> Result<(), BulkError> {
        let scope = if self.state.ambient {
            self.state.savepoints += 1;
            Scope::Savepoint(format!("pgbulk_call_{}", self.state.savepoints))
        } else {
            Scope::Transaction
        };

        self.state.open = Some(scope.clone());
        let opened = match &scope {
            Scope::Transaction => self.transport.begin().await,
            Scope::Savepoint(name) => self.transport.savepoint(name).await,
        };
        if let Err(e) = opened {
            self.state.open = None;
            return Err(BulkError::Transaction(e));
        }
        debug!("Opened {}", scope);
        Ok(())
    }

    /// Commit or release on success; roll back on failure and hand back
    /// the original error.
    pub(crate) async fn close_scope(
        &mut self,
        operation: OperationKind,
        result: Result<u64, BulkError>,
    ) -> Result<u64, BulkError> {
        let Some(scope) = self.state.open.clone() else {
            return result;
        };

        match result {
            Ok(affected) => {
                let closed = match &scope {
                    Scope::Transaction => self.transport.commit().await,
                    Scope::Savepoint(name) => self.transport.release_savepoint(name).await,
                };
                // On failure the scope stays open for the next call to roll back.
                closed.map_err(BulkError::Transaction)?;
                self.state.open = None;
                debug!("Closed {}", scope);
                Ok(affected)
            }
            Err(error) => {
                debug!("{} phase: {}", operation, Phase::Failed);
                warn!("{} failed, rolling back {}: {}", operation, scope, error);
                match self.rollback_scope(&scope).await {
                    Ok(()) => self.state.open = None,
                    Err(e) => warn!("Rollback of {} failed: {}", scope, e),
                }
                Err(error)
            }
        }
    }

    async fn rollback_scope(&mut self, scope: &Scope) -> Result<(), BulkError> {
        let rolled_back = match scope {
            Scope::Transaction => self.transport.rollback().await,
            Scope::Savepoint(name) => match self.transport.rollback_to_savepoint(name).await {
                Ok(()) => self.transport.release_savepoint(name).await,
                Err(e) => Err(e),
            },
        };
        rolled_back.map_err(BulkError::Transaction)
    }
}

/// An open transaction on a [`BulkUploader`].
///
/// Dropping the handle without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls the transaction back on the
/// uploader's next call.
pub struct BulkTransaction<'u, T: Transport = PgTransport> {
    uploader: &'u mut BulkUploader<T>,
    finished: bool,
}

impl<T: Transport> BulkTransaction<'_, T> {
    pub async fn insert<R: Record>(&mut self, records: &mut [R]) -> Result<BulkOutcome, BulkError> {
        self.uploader.insert(records).await
    }

    pub async fn insert_with<R: Record>(
        &mut self,
        records: &mut [R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.uploader.insert_with(records, options).await
    }

    pub async fn update<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.uploader.update(records).await
    }

    pub async fn update_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.uploader.update_with(records, options).await
    }

    pub async fn import<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.uploader.import(records).await
    }

    pub async fn import_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.uploader.import_with(records, options).await
    }

    pub async fn export<R: Record + Default>(&mut self) -> Result<Vec<R>, BulkError> {
        self.uploader.export().await
    }

    /// Run a statement in this transaction; returns the affected row count.
    pub async fn execute(&mut self, statement: &str) -> Result<u64, BulkError> {
        self.uploader.recover().await?;
        self.uploader
            .transport
            .execute(statement)
            .await
            .map_err(BulkError::Statement)
    }

    pub async fn commit(mut self) -> Result<(), BulkError> {
        self.uploader.recover().await?;
        self.uploader
            .transport
            .commit()
            .await
            .map_err(BulkError::Transaction)?;
        self.close();
        info!("Committed transaction");
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), BulkError> {
        self.uploader
            .transport
            .rollback()
            .await
            .map_err(BulkError::Transaction)?;
        self.uploader.state.open = None;
        self.close();
        info!("Rolled back transaction");
        Ok(())
    }

    fn close(&mut self) {
        self.uploader.state.ambient = false;
        self.finished = true;
    }
}

impl<T: Transport> Drop for BulkTransaction<'_, T> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction dropped without commit or rollback; rolling back on next use");
            self.uploader.state.ambient_abandoned = true;
        }
    }
}
