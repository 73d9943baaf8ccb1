//! Blocking facade over [`BulkUploader`].
//!
//! Each call drives the same future the async API returns on a runtime
//! owned by the facade. Do not call these from inside another Tokio
//! runtime.

use crate::client::PgTransport;
use crate::config::BulkConfig;
use crate::error::BulkError;
use crate::transaction::BulkTransaction;
use crate::transport::Transport;
use crate::uploader::{BulkOutcome, BulkUploader, WriteOptions};
use bulk_core::Record;
use tokio::runtime::{Builder, Runtime};

fn build_runtime() -> Result<Runtime, BulkError> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .map_err(BulkError::Runtime)
}

/// Synchronous counterpart of [`BulkUploader`].
pub struct BlockingBulkUploader<T: Transport = PgTransport> {
    runtime: Runtime,
    inner: BulkUploader<T>,
}

impl BlockingBulkUploader<PgTransport> {
    pub fn connect(connection_string: &str, config: BulkConfig) -> Result<Self, BulkError> {
        let runtime = build_runtime()?;
        let inner = runtime.block_on(BulkUploader::connect(connection_string, config))?;
        Ok(Self { runtime, inner })
    }
}

impl<T: Transport> BlockingBulkUploader<T> {
    /// Wrap an uploader built elsewhere.
    pub fn new(inner: BulkUploader<T>) -> Result<Self, BulkError> {
        Ok(Self {
            runtime: build_runtime()?,
            inner,
        })
    }

    pub fn uploader(&self) -> &BulkUploader<T> {
        &self.inner
    }

    pub fn insert<R: Record>(&mut self, records: &mut [R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.insert(records))
    }

    pub fn insert_with<R: Record>(
        &mut self,
        records: &mut [R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.insert_with(records, options))
    }

    pub fn update<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.update(records))
    }

    pub fn update_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.update_with(records, options))
    }

    pub fn import<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.import(records))
    }

    pub fn import_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.import_with(records, options))
    }

    pub fn export<R: Record + Default>(&mut self) -> Result<Vec<R>, BulkError> {
        self.runtime.block_on(self.inner.export())
    }

    pub fn begin(&mut self) -> Result<BlockingTransaction<'_, T>, BulkError> {
        let inner = self.runtime.block_on(self.inner.begin())?;
        Ok(BlockingTransaction {
            runtime: &self.runtime,
            inner,
        })
    }
}

/// Synchronous counterpart of [`BulkTransaction`].
pub struct BlockingTransaction<'u, T: Transport = PgTransport> {
    runtime: &'u Runtime,
    inner: BulkTransaction<'u, T>,
}

impl<T: Transport> BlockingTransaction<'_, T> {
    pub fn insert<R: Record>(&mut self, records: &mut [R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.insert(records))
    }

    pub fn insert_with<R: Record>(
        &mut self,
        records: &mut [R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.insert_with(records, options))
    }

    pub fn update<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.update(records))
    }

    pub fn update_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.update_with(records, options))
    }

    pub fn import<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.import(records))
    }

    pub fn import_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        self.runtime.block_on(self.inner.import_with(records, options))
    }

    pub fn export<R: Record + Default>(&mut self) -> Result<Vec<R>, BulkError> {
        self.runtime.block_on(self.inner.export())
    }

    pub fn execute(&mut self, statement: &str) -> Result<u64, BulkError> {
        self.runtime.block_on(self.inner.execute(statement))
    }

    pub fn commit(self) -> Result<(), BulkError> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(self) -> Result<(), BulkError> {
        self.runtime.block_on(self.inner.rollback())
    }
}
