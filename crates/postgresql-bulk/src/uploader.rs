//! The bulk upload engine.
//!
//! Every write call is one `COPY` stream plus at most one reconciliation
//! statement, run inside its own scope:
//!
//! ```text
//!   resolve descriptor ──► validate policy ──► plan columns      (no I/O)
//!            │
//!            ▼
//!   BEGIN / SAVEPOINT ──► [CREATE TEMP staging] ──► COPY rows ──► reconcile
//!            │                                                       │
//!            └──────────── ROLLBACK on any failure ◄─────────────────┤
//!                                                                    ▼
//!                                                     COMMIT / RELEASE
//! ```

use crate::client::PgTransport;
use crate::config::{BulkConfig, UnmatchedUpdate};
use crate::error::{BulkError, OperationKind, Phase, ReconcileCause, TransferCause};
use crate::plan::{import_policy, InsertPlan, Route, UpdatePlan};
use crate::statement::{self, StagedInsert};
use crate::transaction::ScopeState;
use crate::transport::{CopyChannel, RawRow, Transport};
use bulk_core::{
    ColumnSubset, ConflictAction, EntityDescriptor, PolicyError, Record, SchemaResolver, Value,
    ValueError, WireType,
};
use postgresql_copy::{CodecError, CopyReader, RowEncoder};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Per-call options for the `*_with` operations.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Collision handling; `None` means a plain insert.
    pub conflict: Option<ConflictAction>,
    /// Checked before every row and before reconciliation.
    pub cancellation: Option<CancellationToken>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_conflict(mut self, policy: ConflictAction) -> Self {
        self.conflict = Some(policy);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Result of a completed write call.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkOutcome {
    pub operation: OperationKind,
    /// Records sent over `COPY`
    pub rows_streamed: u64,
    /// Rows inserted or updated in the target
    pub rows_affected: u64,
    pub elapsed: Duration,
}

impl BulkOutcome {
    fn empty(operation: OperationKind) -> Self {
        Self {
            operation,
            rows_streamed: 0,
            rows_affected: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Streamed rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.rows_streamed as f64 / secs
        } else {
            0.0
        }
    }
}

/// Rows produced by the staged insert statement.
struct Reconciled {
    affected: u64,
    returned: Vec<RawRow>,
}

fn enter(operation: OperationKind, phase: Phase) {
    debug!("{} phase: {}", operation, phase);
}

fn check_cancelled(
    operation: OperationKind,
    token: Option<&CancellationToken>,
) -> Result<(), BulkError> {
    if token.is_some_and(|t| t.is_cancelled()) {
        return Err(BulkError::Cancelled { operation });
    }
    Ok(())
}

/// Moves typed records in and out of PostgreSQL over one session.
///
/// # Example
///
/// ```ignore
/// let mut uploader = BulkUploader::connect(&connection_string, BulkConfig::default()).await?;
/// let outcome = uploader.insert(&mut addresses).await?;
/// println!("{} rows in {:?}", outcome.rows_affected, outcome.elapsed);
/// ```
pub struct BulkUploader<T: Transport = PgTransport> {
    pub(crate) transport: T,
    config: BulkConfig,
    pub(crate) state: ScopeState,
}

impl BulkUploader<PgTransport> {
    /// Connect with `config.statement_timeout` applied to every network
    /// operation.
    pub async fn connect(connection_string: &str, config: BulkConfig) -> Result<Self, BulkError> {
        let transport = PgTransport::connect(connection_string)
            .await
            .map_err(BulkError::Connect)?
            .with_timeout(config.statement_timeout);
        Ok(Self::new(transport, config))
    }
}

impl<T: Transport> BulkUploader<T> {
    pub fn new(transport: T, config: BulkConfig) -> Self {
        Self {
            transport,
            config,
            state: ScopeState::default(),
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether a [`BulkTransaction`](crate::BulkTransaction) is open.
    pub fn in_transaction(&self) -> bool {
        self.state.ambient
    }

    /// Insert `records`; server-generated values are read back into them
    /// when [`BulkConfig::read_back_generated`] is set.
    pub async fn insert<R: Record>(&mut self, records: &mut [R]) -> Result<BulkOutcome, BulkError> {
        self.insert_with(records, WriteOptions::default()).await
    }

    /// Insert `records`, resolving key collisions with `options.conflict`.
    pub async fn insert_with<R: Record>(
        &mut self,
        records: &mut [R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        let operation = OperationKind::Insert;
        enter(operation, Phase::Resolving);
        let descriptor = SchemaResolver::resolve::<R>()?;
        let plan = InsertPlan::new(&descriptor, options.conflict, &self.config)?;
        if records.is_empty() {
            return Ok(BulkOutcome::empty(operation));
        }

        let started = self.begin_call(operation, &descriptor, records.len()).await?;
        let cancellation = options.cancellation.as_ref();
        let result = match plan.route {
            Route::Direct => {
                self.copy_direct(operation, &descriptor, &plan.sent, records, cancellation)
                    .await
            }
            Route::Staged => {
                match self
                    .insert_staged(operation, &descriptor, &plan, records, cancellation)
                    .await
                {
                    Ok(reconciled) if plan.returning.is_empty() => Ok(reconciled.affected),
                    Ok(reconciled) => {
                        assign_generated(operation, &descriptor, &plan, records, reconciled.returned)
                    }
                    Err(e) => Err(e),
                }
            }
        };
        self.end_call(operation, records.len(), started, result).await
    }

    /// Update existing rows by key, writing every updatable non-key column.
    pub async fn update<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.update_with(records, WriteOptions::default()).await
    }

    /// Update with options; a conflict policy is rejected.
    pub async fn update_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        let operation = OperationKind::Update;
        enter(operation, Phase::Resolving);
        if options.conflict.is_some() {
            return Err(PolicyError::NotApplicable("update").into());
        }
        let descriptor = SchemaResolver::resolve::<R>()?;
        descriptor.require_key()?;
        let plan = UpdatePlan::new(&descriptor)?;
        if records.is_empty() {
            return Ok(BulkOutcome::empty(operation));
        }

        let started = self.begin_call(operation, &descriptor, records.len()).await?;
        let result = self
            .update_staged(
                operation,
                &descriptor,
                &plan,
                records,
                options.cancellation.as_ref(),
            )
            .await;
        self.end_call(operation, records.len(), started, result).await
    }

    /// Insert-or-update by key, overwriting every writable non-key column
    /// of colliding rows.
    pub async fn import<R: Record>(&mut self, records: &[R]) -> Result<BulkOutcome, BulkError> {
        self.import_with(records, WriteOptions::default()).await
    }

    /// Import with an explicit policy in place of the default update-all.
    pub async fn import_with<R: Record>(
        &mut self,
        records: &[R],
        options: WriteOptions,
    ) -> Result<BulkOutcome, BulkError> {
        let operation = OperationKind::Import;
        enter(operation, Phase::Resolving);
        let descriptor = SchemaResolver::resolve::<R>()?;
        descriptor.require_key()?;
        let policy = import_policy(&descriptor, options.conflict)?;
        let plan = InsertPlan::new(&descriptor, Some(policy), &self.config)?;
        if records.is_empty() {
            return Ok(BulkOutcome::empty(operation));
        }

        let started = self.begin_call(operation, &descriptor, records.len()).await?;
        let result = self
            .insert_staged(
                operation,
                &descriptor,
                &plan,
                records,
                options.cancellation.as_ref(),
            )
            .await
            .map(|reconciled| reconciled.affected);
        self.end_call(operation, records.len(), started, result).await
    }

    /// Read every row of `R`'s table.
    pub async fn export<R: Record + Default>(&mut self) -> Result<Vec<R>, BulkError> {
        let operation = OperationKind::Export;
        enter(operation, Phase::Resolving);
        let descriptor = SchemaResolver::resolve::<R>()?;
        self.recover().await?;

        let started = Instant::now();
        info!("Starting export from {}", descriptor.table());
        enter(operation, Phase::Streaming);
        let sql = statement::copy_out(descriptor.table(), &descriptor.column_names());
        let data = self
            .transport
            .copy_out(&sql)
            .await
            .map_err(|e| BulkError::transfer(operation, 0, e.into()))?;

        let types: Vec<WireType> = descriptor.columns().iter().map(|c| c.wire_type).collect();
        let reader =
            CopyReader::new(data, types).map_err(|e| BulkError::transfer(operation, 0, e.into()))?;

        let mut records = Vec::new();
        for (row, tuple) in reader.enumerate() {
            let values = tuple.map_err(|e| BulkError::transfer(operation, row, e.into()))?;
            let mut record = R::default();
            for (column, value) in descriptor.columns().iter().zip(values) {
                record
                    .set_column_value(&column.name, value)
                    .map_err(|source| {
                        BulkError::transfer(
                            operation,
                            row,
                            TransferCause::Value {
                                column: column.name.clone(),
                                source,
                            },
                        )
                    })?;
            }
            records.push(record);
        }

        let elapsed = started.elapsed();
        info!(
            "Exported {} rows from {} in {:?}",
            records.len(),
            descriptor.table(),
            elapsed
        );
        Ok(records)
    }

    async fn begin_call(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        rows: usize,
    ) -> Result<Instant, BulkError> {
        self.recover().await?;
        info!(
            "Starting {} of {} rows into {}",
            operation,
            rows,
            descriptor.table()
        );
        self.open_scope().await?;
        Ok(Instant::now())
    }

    async fn end_call(
        &mut self,
        operation: OperationKind,
        rows: usize,
        started: Instant,
        result: Result<u64, BulkError>,
    ) -> Result<BulkOutcome, BulkError> {
        let rows_affected = self.close_scope(operation, result).await?;
        enter(operation, Phase::Committed);
        let outcome = BulkOutcome {
            operation,
            rows_streamed: rows as u64,
            rows_affected,
            elapsed: started.elapsed(),
        };
        info!(
            "Completed {}: {} rows streamed, {} affected in {:?} ({:.2} rows/sec)",
            operation,
            outcome.rows_streamed,
            outcome.rows_affected,
            outcome.elapsed,
            outcome.rows_per_second()
        );
        Ok(outcome)
    }

    fn staging_name(&self) -> String {
        format!("{}_{}", self.config.staging_prefix, Uuid::new_v4().simple())
    }

    /// Encode and send `records`, flushing whenever the pending bytes reach
    /// the threshold. Returns the row count the server accepted.
    #[allow(clippy::too_many_arguments)]
    async fn stream_rows<R: Record>(
        &mut self,
        operation: OperationKind,
        copy_statement: &str,
        descriptor: &EntityDescriptor,
        subset: &ColumnSubset,
        records: &[R],
        with_ordinals: bool,
        cancellation: Option<&CancellationToken>,
    ) -> Result<u64, BulkError> {
        enter(operation, Phase::Streaming);
        let mut channel = self
            .transport
            .open_channel(copy_statement)
            .await
            .map_err(|e| BulkError::transfer(operation, 0, e.into()))?;

        let mut encoder = RowEncoder::new(self.config.flush_threshold);
        for (row, record) in records.iter().enumerate() {
            check_cancelled(operation, cancellation)?;
            let ordinal = with_ordinals.then_some(row as i64);
            encoder
                .encode_row(record, descriptor, subset, ordinal)
                .map_err(|e| BulkError::transfer(operation, row, e.into()))?;
            if encoder.should_flush() {
                channel
                    .send(encoder.take())
                    .await
                    .map_err(|e| BulkError::transfer(operation, row, e.into()))?;
            }
        }

        let last = records.len().saturating_sub(1);
        let encoded = encoder.rows();
        channel
            .send(encoder.finish())
            .await
            .map_err(|e| BulkError::transfer(operation, last, e.into()))?;
        let accepted = channel
            .finish()
            .await
            .map_err(|e| BulkError::transfer(operation, last, e.into()))?;
        debug!("Streamed {} rows, server accepted {}", encoded, accepted);
        Ok(accepted)
    }

    async fn copy_direct<R: Record>(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        subset: &ColumnSubset,
        records: &[R],
        cancellation: Option<&CancellationToken>,
    ) -> Result<u64, BulkError> {
        let target = statement::qualified_table(descriptor.table());
        let sql = statement::copy_in(&target, &subset.names(descriptor));
        self.stream_rows(operation, &sql, descriptor, subset, records, false, cancellation)
            .await
    }

    /// Create the staging table and stream `records` into it.
    async fn stage<R: Record>(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        subset: &ColumnSubset,
        records: &[R],
        cancellation: Option<&CancellationToken>,
    ) -> Result<String, BulkError> {
        let staging = self.staging_name();
        let columns = subset.names(descriptor);
        self.transport
            .execute(&statement::create_staging(&staging, descriptor.table(), &columns))
            .await
            .map_err(|e| BulkError::transfer(operation, 0, e.into()))?;

        let sql = statement::copy_in_staging(&staging, &columns);
        self.stream_rows(operation, &sql, descriptor, subset, records, true, cancellation)
            .await?;
        check_cancelled(operation, cancellation)?;
        Ok(staging)
    }

    async fn drop_staging(&mut self, operation: OperationKind, staging: &str) -> Result<(), BulkError> {
        self.transport
            .execute(&statement::drop_staging(staging))
            .await
            .map_err(|e| BulkError::reconciliation(operation, e.into()))?;
        Ok(())
    }

    async fn insert_staged<R: Record>(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        plan: &InsertPlan,
        records: &[R],
        cancellation: Option<&CancellationToken>,
    ) -> Result<Reconciled, BulkError> {
        let staging = self
            .stage(operation, descriptor, &plan.sent, records, cancellation)
            .await?;

        enter(operation, Phase::Reconciling);
        let columns = plan.sent.names(descriptor);
        let returning = plan.returning.names(descriptor);
        let sql = statement::insert_from_staging(&StagedInsert {
            target: descriptor.table(),
            staging: &staging,
            columns: &columns,
            overriding_system_value: plan.overriding_system_value,
            conflict: plan.conflict.as_ref(),
            key: descriptor
                .key()
                .map(|k| k.name.as_str())
                .filter(|k| columns.contains(k)),
            returning: &returning,
        });

        let reconciled = if returning.is_empty() {
            let affected = self
                .transport
                .execute(&sql)
                .await
                .map_err(|e| BulkError::reconciliation(operation, e.into()))?;
            Reconciled {
                affected,
                returned: Vec::new(),
            }
        } else {
            let returned = self
                .transport
                .query_raw(&sql)
                .await
                .map_err(|e| BulkError::reconciliation(operation, e.into()))?;
            Reconciled {
                affected: returned.len() as u64,
                returned,
            }
        };

        self.drop_staging(operation, &staging).await?;
        Ok(reconciled)
    }

    async fn update_staged<R: Record>(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        plan: &UpdatePlan,
        records: &[R],
        cancellation: Option<&CancellationToken>,
    ) -> Result<u64, BulkError> {
        let staging = self
            .stage(operation, descriptor, &plan.staged, records, cancellation)
            .await?;

        enter(operation, Phase::Reconciling);
        let set_columns: Vec<&str> = plan.set_columns.iter().map(String::as_str).collect();
        let sql =
            statement::update_from_staging(descriptor.table(), &staging, &plan.key, &set_columns);
        let affected = self
            .transport
            .execute(&sql)
            .await
            .map_err(|e| BulkError::reconciliation(operation, e.into()))?;

        let streamed = records.len() as u64;
        if affected < streamed && self.config.unmatched_update == UnmatchedUpdate::Fail {
            let unmatched = self
                .count_unmatched(operation, descriptor, &staging, &plan.key)
                .await?;
            if unmatched > 0 {
                return Err(BulkError::reconciliation(
                    operation,
                    ReconcileCause::UnmatchedKeys {
                        expected: streamed,
                        matched: streamed.saturating_sub(unmatched),
                    },
                ));
            }
        }

        self.drop_staging(operation, &staging).await?;
        Ok(affected)
    }

    async fn count_unmatched(
        &mut self,
        operation: OperationKind,
        descriptor: &EntityDescriptor,
        staging: &str,
        key: &str,
    ) -> Result<u64, BulkError> {
        let sql = statement::count_unmatched(descriptor.table(), staging, key);
        let rows = self
            .transport
            .query_raw(&sql)
            .await
            .map_err(|e| BulkError::reconciliation(operation, e.into()))?;
        let field = rows.first().and_then(|row| row.first()).ok_or_else(|| {
            BulkError::reconciliation(
                operation,
                CodecError::FieldCount {
                    expected: 1,
                    actual: 0,
                }
                .into(),
            )
        })?;
        match field
            .decode(WireType::Int8)
            .map_err(|e| BulkError::reconciliation(operation, e.into()))?
        {
            Value::Int64(count) => Ok(u64::try_from(count).unwrap_or(0)),
            other => Err(BulkError::reconciliation(
                operation,
                CodecError::TypeMismatch {
                    expected: WireType::Int8,
                    found: other.kind(),
                }
                .into(),
            )),
        }
    }
}

/// Store `RETURNING` rows into `records` in submission order.
///
/// A record whose `set_column_value` reports the column as unknown simply
/// does not keep that generated value.
fn assign_generated<R: Record>(
    operation: OperationKind,
    descriptor: &EntityDescriptor,
    plan: &InsertPlan,
    records: &mut [R],
    returned: Vec<RawRow>,
) -> Result<u64, BulkError> {
    if returned.len() != records.len() {
        return Err(BulkError::reconciliation(
            operation,
            ReconcileCause::RowCount {
                sent: records.len(),
                returned: returned.len(),
            },
        ));
    }

    for (record, row) in records.iter_mut().zip(&returned) {
        if row.len() != plan.returning.len() {
            return Err(BulkError::reconciliation(
                operation,
                CodecError::FieldCount {
                    expected: plan.returning.len(),
                    actual: row.len(),
                }
                .into(),
            ));
        }
        for (column, field) in plan.returning.columns(descriptor).zip(row) {
            let value = field
                .decode(column.wire_type)
                .map_err(|e| BulkError::reconciliation(operation, e.in_column(&column.name).into()))?;
            match record.set_column_value(&column.name, value) {
                Ok(()) | Err(ValueError::UnknownColumn(_)) => {}
                Err(source) => {
                    return Err(BulkError::reconciliation(
                        operation,
                        ReconcileCause::Assign {
                            column: column.name.clone(),
                            source,
                        },
                    ))
                }
            }
        }
    }
    Ok(returned.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::{raw_field, RecordingTransport};
    use crate::transaction::Scope;
    use bulk_core::{EntityMetadata, FieldMapping, FromValue, Generation, SchemaError};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Address {
        address_id: i32,
        street_name: Option<String>,
        postal_code: Option<String>,
    }

    impl Record for Address {
        fn describe() -> EntityMetadata {
            EntityMetadata::new("addresses")
                .field(
                    FieldMapping::new("address_id", WireType::Int4)
                        .key()
                        .generated(Generation::Default),
                )
                .field(FieldMapping::new("street_name", WireType::Text))
                .field(FieldMapping::new("postal_code", WireType::Text).nullable())
        }

        fn column_value(&self, column: &str) -> Option<Value> {
            match column {
                "address_id" => Some(self.address_id.into()),
                "street_name" => Some(self.street_name.clone().into()),
                "postal_code" => Some(self.postal_code.clone().into()),
                _ => None,
            }
        }

        fn set_column_value(&mut self, column: &str, value: Value) -> Result<(), ValueError> {
            match column {
                "address_id" => self.address_id = FromValue::from_value(value)?,
                "street_name" => self.street_name = FromValue::from_value(value)?,
                "postal_code" => self.postal_code = FromValue::from_value(value)?,
                _ => return Err(ValueError::UnknownColumn(column.to_string())),
            }
            Ok(())
        }
    }

    fn address(id: i32, street: &str) -> Address {
        Address {
            address_id: id,
            street_name: Some(street.to_string()),
            postal_code: Some(format!("00{id}")),
        }
    }

    fn direct_config() -> BulkConfig {
        BulkConfig::default().with_read_back_generated(false)
    }

    const DIRECT_COPY: &str =
        "COPY \"addresses\" (\"street_name\", \"postal_code\") FROM STDIN (FORMAT binary)";

    #[tokio::test]
    async fn test_direct_insert_is_one_copy_in_one_transaction() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());
        let mut records = vec![address(0, "First"), address(0, "Second")];

        let outcome = uploader.insert(&mut records).await.unwrap();

        assert_eq!(outcome.operation, OperationKind::Insert);
        assert_eq!(outcome.rows_streamed, 2);
        assert_eq!(outcome.rows_affected, 2);
        assert_eq!(transport.statements(), ["BEGIN", DIRECT_COPY, "COMMIT"]);
        assert_eq!(transport.copied().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_input_does_no_io() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());

        let outcome = uploader.insert::<Address>(&mut []).await.unwrap();
        assert_eq!(outcome.rows_streamed, 0);
        let outcome = uploader.update::<Address>(&[]).await.unwrap();
        assert_eq!(outcome.rows_affected, 0);
        let outcome = uploader.import::<Address>(&[]).await.unwrap();
        assert_eq!(outcome.operation, OperationKind::Import);

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_insert_reads_generated_keys_back_in_order() {
        let returned = (1..=3)
            .map(|id| vec![raw_field(WireType::Int4, &Value::Int32(id * 10)).unwrap()])
            .collect();
        let transport = RecordingTransport::new().reply_query("RETURNING", returned);
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let mut records = vec![
            address(0, "First"),
            address(0, "Second"),
            address(0, "Third"),
        ];

        let outcome = uploader.insert(&mut records).await.unwrap();

        assert_eq!(outcome.rows_affected, 3);
        let ids: Vec<i32> = records.iter().map(|r| r.address_id).collect();
        assert_eq!(ids, [10, 20, 30]);

        let statements = transport.statements();
        assert!(statements[1].starts_with("CREATE TEMP TABLE \"pgbulk_stage_"));
        assert!(statements[3].starts_with("INSERT INTO \"addresses\""));
        assert!(statements[3].ends_with("RETURNING \"address_id\""));
        assert!(statements[4].starts_with("DROP TABLE IF EXISTS"));
        assert_eq!(statements.last().unwrap(), "COMMIT");
    }

    #[tokio::test]
    async fn test_read_back_count_mismatch_rolls_back() {
        let returned = vec![vec![raw_field(WireType::Int4, &Value::Int32(1)).unwrap()]];
        let transport = RecordingTransport::new().reply_query("RETURNING", returned);
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let mut records = vec![address(0, "First"), address(0, "Second")];

        let err = uploader.insert(&mut records).await.unwrap_err();

        assert!(matches!(
            err,
            BulkError::Reconciliation {
                cause: ReconcileCause::RowCount {
                    sent: 2,
                    returned: 1
                },
                ..
            }
        ));
        assert_eq!(records[0].address_id, 0);
        assert_eq!(transport.statements().last().unwrap(), "ROLLBACK");
        assert!(!transport.issued("COMMIT"));
    }

    #[tokio::test]
    async fn test_send_failure_reports_row_and_skips_reconciliation() {
        let transport = RecordingTransport::new().fail_send(2);
        let config = BulkConfig::default().with_flush_threshold(1);
        let mut uploader = BulkUploader::new(transport.clone(), config);
        let mut records: Vec<Address> = (0..5).map(|i| address(i, "First")).collect();

        let err = uploader.insert(&mut records).await.unwrap_err();

        match err {
            BulkError::Transfer {
                operation,
                row,
                cause: TransferCause::Transport(TransportError::Other(_)),
            } => {
                assert_eq!(operation, OperationKind::Insert);
                assert_eq!(row, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!transport.issued("INSERT"));
        assert_eq!(transport.statements().last().unwrap(), "ROLLBACK");
    }

    #[tokio::test]
    async fn test_encode_failure_names_row_and_column() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());
        let mut records = vec![address(1, "First"), Address::default()];

        let err = uploader.insert(&mut records).await.unwrap_err();

        assert!(matches!(err, BulkError::Transfer { row: 1, .. }));
        assert!(err.to_string().contains("street_name"));
        assert_eq!(transport.statements(), ["BEGIN", DIRECT_COPY, "ROLLBACK"]);
        // Nothing was flushed before the failing row.
        assert!(transport.copied()[0].is_empty());
    }

    #[tokio::test]
    async fn test_update_with_unmatched_keys_fails() {
        let unmatched = vec![vec![raw_field(WireType::Int8, &Value::Int64(1)).unwrap()]];
        let transport = RecordingTransport::new()
            .reply_execute("UPDATE", 2)
            .reply_query("NOT EXISTS", unmatched);
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let records = vec![address(1, "A"), address(2, "B"), address(99, "C")];

        let err = uploader.update(&records).await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "update reconciliation failed: only 2 of 3 staged rows matched an existing key"
        );
        assert_eq!(transport.statements().last().unwrap(), "ROLLBACK");
    }

    #[tokio::test]
    async fn test_update_can_ignore_unmatched_keys() {
        let transport = RecordingTransport::new().reply_execute("UPDATE", 2);
        let config = BulkConfig::default().with_unmatched_update(crate::UnmatchedUpdate::Ignore);
        let mut uploader = BulkUploader::new(transport.clone(), config);
        let records = vec![address(1, "A"), address(2, "B"), address(99, "C")];

        let outcome = uploader.update(&records).await.unwrap();

        assert_eq!(outcome.rows_streamed, 3);
        assert_eq!(outcome.rows_affected, 2);
        assert!(!transport.issued("SELECT count"));
        let statements = transport.statements();
        let update = &statements[3];
        assert!(update.starts_with(
            "UPDATE \"addresses\" AS \"target\" SET \"street_name\" = \"staged\".\"street_name\", \
             \"postal_code\" = \"staged\".\"postal_code\" FROM \"pgbulk_stage_"
        ));
        assert!(update.ends_with(
            "AS \"staged\" WHERE \"target\".\"address_id\" = \"staged\".\"address_id\""
        ));
    }

    /// A row whose `created_at` has a server default.
    #[derive(Debug, Clone, Default)]
    struct Stamped {
        id: i64,
        name: String,
        created_at: Option<i64>,
    }

    impl Record for Stamped {
        fn describe() -> EntityMetadata {
            EntityMetadata::new("stamped")
                .field(FieldMapping::new("id", WireType::Int8).key())
                .field(FieldMapping::new("name", WireType::Text))
                .field(
                    FieldMapping::new("created_at", WireType::Int8)
                        .generated(Generation::Default),
                )
        }

        fn column_value(&self, column: &str) -> Option<Value> {
            match column {
                "id" => Some(self.id.into()),
                "name" => Some(self.name.clone().into()),
                "created_at" => Some(self.created_at.into()),
                _ => None,
            }
        }
    }

    struct Keyless {
        note: String,
    }

    impl Record for Keyless {
        fn describe() -> EntityMetadata {
            EntityMetadata::new("notes").field(FieldMapping::new("note", WireType::Text))
        }

        fn column_value(&self, column: &str) -> Option<Value> {
            (column == "note").then(|| self.note.clone().into())
        }
    }

    #[tokio::test]
    async fn test_update_writes_default_columns() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let records = vec![Stamped {
            id: 1,
            name: "renamed".to_string(),
            created_at: Some(1_700_000_000),
        }];

        let outcome = uploader.update(&records).await.unwrap();

        assert_eq!(outcome.rows_affected, 1);
        let statements = transport.statements();
        assert!(statements[1].contains("\"id\", \"name\", \"created_at\""));
        assert!(statements[3].starts_with(
            "UPDATE \"stamped\" AS \"target\" SET \"name\" = \"staged\".\"name\", \
             \"created_at\" = \"staged\".\"created_at\" FROM"
        ));
    }

    #[tokio::test]
    async fn test_keyless_update_and_import_are_schema_errors() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let records = [Keyless {
            note: "no key".to_string(),
        }];

        let err = uploader.update(&records).await.unwrap_err();
        assert!(matches!(err, BulkError::Schema(SchemaError::NoKey(_))), "{err:?}");
        let err = uploader.import(&records).await.unwrap_err();
        assert!(matches!(err, BulkError::Schema(SchemaError::NoKey(_))), "{err:?}");
        assert!(err.is_pre_io());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_conflict_policy() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let options = WriteOptions::new().on_conflict(ConflictAction::DoNothing);

        let err = uploader
            .update_with(&[address(1, "A")], options)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BulkError::Policy(PolicyError::NotApplicable("update"))
        ));
        assert!(err.is_pre_io());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_import_defaults_to_update_all() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());

        let outcome = uploader
            .import(&[address(1, "A"), address(2, "B")])
            .await
            .unwrap();

        assert_eq!(outcome.rows_affected, 2);
        let insert = transport
            .statements()
            .into_iter()
            .find(|s| s.starts_with("INSERT"))
            .unwrap();
        assert!(insert.contains(
            "(\"address_id\", \"street_name\", \"postal_code\") SELECT \"address_id\""
        ));
        assert!(insert.ends_with(
            "ON CONFLICT (\"address_id\") DO UPDATE SET \"street_name\" = EXCLUDED.\"street_name\", \
             \"postal_code\" = EXCLUDED.\"postal_code\""
        ));
        assert!(!insert.contains("RETURNING"));
    }

    #[tokio::test]
    async fn test_cancelled_call_rolls_back() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let err = uploader
            .import_with(
                &[address(1, "A")],
                WriteOptions::new().with_cancellation(token),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BulkError::Cancelled {
                operation: OperationKind::Import
            }
        ));
        assert!(!transport.issued("INSERT"));
        assert_eq!(transport.statements().last().unwrap(), "ROLLBACK");
    }

    #[tokio::test]
    async fn test_reconciliation_timeout_is_reported() {
        let transport =
            RecordingTransport::new().time_out_on("INSERT INTO", Duration::from_secs(2));
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());

        let err = uploader.import(&[address(1, "A")]).await.unwrap_err();

        assert!(matches!(
            err,
            BulkError::Timeout {
                operation: OperationKind::Import,
                phase: Phase::Reconciling,
                ..
            }
        ));
        assert_eq!(transport.statements().last().unwrap(), "ROLLBACK");
    }

    #[tokio::test]
    async fn test_calls_inside_transaction_use_savepoints() {
        let transport = RecordingTransport::new().fail_send(1);
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());

        let mut tx = uploader.begin().await.unwrap();
        tx.insert(&mut [address(0, "First")]).await.unwrap();
        let err = tx.insert(&mut [address(0, "Second")]).await.unwrap_err();
        assert!(matches!(err, BulkError::Transfer { row: 0, .. }));
        tx.commit().await.unwrap();

        assert_eq!(
            transport.statements(),
            [
                "BEGIN",
                "SAVEPOINT \"pgbulk_call_1\"",
                DIRECT_COPY,
                "RELEASE SAVEPOINT \"pgbulk_call_1\"",
                "SAVEPOINT \"pgbulk_call_2\"",
                DIRECT_COPY,
                "ROLLBACK TO SAVEPOINT \"pgbulk_call_2\"",
                "RELEASE SAVEPOINT \"pgbulk_call_2\"",
                "COMMIT",
            ]
        );
        assert!(!uploader.in_transaction());
    }

    #[tokio::test]
    async fn test_dropped_transaction_is_rolled_back_by_next_call() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());

        let mut tx = uploader.begin().await.unwrap();
        tx.execute("DELETE FROM addresses").await.unwrap();
        drop(tx);

        uploader.insert(&mut [address(0, "First")]).await.unwrap();

        assert_eq!(
            transport.statements(),
            [
                "BEGIN",
                "DELETE FROM addresses",
                "ROLLBACK",
                "BEGIN",
                DIRECT_COPY,
                "COMMIT"
            ]
        );
    }

    #[tokio::test]
    async fn test_interrupted_scope_is_rolled_back_first() {
        let transport = RecordingTransport::new();
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());
        uploader.state.open = Some(Scope::Transaction);

        uploader.insert(&mut [address(0, "First")]).await.unwrap();

        assert_eq!(
            transport.statements(),
            ["ROLLBACK", "BEGIN", DIRECT_COPY, "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_is_rolled_back_by_next_call() {
        let transport = RecordingTransport::new().fail_on("COMMIT");
        let mut uploader = BulkUploader::new(transport.clone(), direct_config());

        let err = uploader
            .insert(&mut [address(0, "First")])
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Transaction(_)));

        let _ = uploader.insert(&mut [address(0, "Second")]).await;
        assert_eq!(transport.statements()[3], "ROLLBACK");
    }

    #[tokio::test]
    async fn test_export_decodes_every_row() {
        let descriptor = SchemaResolver::resolve::<Address>().unwrap();
        let all = ColumnSubset::all(&descriptor);
        let rows = vec![address(1, "First"), address(2, "Second")];
        let mut encoder = RowEncoder::new(postgresql_copy::DEFAULT_FLUSH_THRESHOLD);
        for row in &rows {
            encoder.encode_row(row, &descriptor, &all, None).unwrap();
        }

        let transport = RecordingTransport::new().reply_copy_out(encoder.finish());
        let mut uploader = BulkUploader::new(transport.clone(), BulkConfig::default());

        let exported: Vec<Address> = uploader.export().await.unwrap();

        assert_eq!(exported, rows);
        assert_eq!(
            transport.statements(),
            ["COPY (SELECT \"address_id\", \"street_name\", \"postal_code\" FROM \"addresses\") TO STDOUT (FORMAT binary)"]
        );
    }

    #[test]
    fn test_rows_per_second() {
        let outcome = BulkOutcome {
            operation: OperationKind::Insert,
            rows_streamed: 500,
            rows_affected: 500,
            elapsed: Duration::from_millis(250),
        };
        assert_eq!(outcome.rows_per_second(), 2000.0);
        assert_eq!(BulkOutcome::empty(OperationKind::Update).rows_per_second(), 0.0);
    }
}
