//! Scripted in-memory transport.
//!
//! Records every statement and every COPY payload, answers with scripted
//! results and injects failures on demand. Clones share one recording, so
//! a test can keep a handle after moving the transport into an uploader.

use crate::error::TransportError;
use crate::transport::{CopyChannel, RawRow, Transport};
use async_trait::async_trait;
use bulk_core::{Value, WireType};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use postgresql_copy::{encode_value, pg_type, RawField};
use std::sync::Arc;
use std::time::Duration;

/// One call made on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Batch(String),
    Execute(String),
    Query(String),
    CopyIn(String),
    CopyOut(String),
}

impl Call {
    pub fn statement(&self) -> &str {
        match self {
            Call::Batch(s) | Call::Execute(s) | Call::Query(s) | Call::CopyIn(s) | Call::CopyOut(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
enum Failure {
    Error(String),
    Timeout(Duration),
}

impl Failure {
    fn to_error(&self) -> TransportError {
        match self {
            Failure::Error(message) => TransportError::Other(message.clone()),
            Failure::Timeout(after) => TransportError::Timeout(*after),
        }
    }
}

#[derive(Debug, Default)]
struct Recording {
    calls: Vec<Call>,
    copies: Vec<BytesMut>,
    sends: usize,
    last_copy_rows: u64,
    execute_replies: Vec<(String, u64)>,
    query_replies: Vec<(String, Vec<RawRow>)>,
    copy_out_data: Option<Bytes>,
    failures: Vec<(String, Failure)>,
    fail_send_at: Option<usize>,
}

impl Recording {
    fn record(&mut self, call: Call) -> Result<(), TransportError> {
        let failure = self
            .failures
            .iter()
            .find(|(pattern, _)| call.statement().contains(pattern.as_str()))
            .map(|(_, failure)| failure.to_error());
        self.calls.push(call);
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-memory [`Transport`] for engine tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `execute` calls containing `pattern` with `rows`.
    ///
    /// Unscripted `INSERT`/`UPDATE` statements report the row count of the
    /// last COPY; anything else reports 0.
    pub fn reply_execute(self, pattern: &str, rows: u64) -> Self {
        self.inner
            .lock()
            .execute_replies
            .push((pattern.to_string(), rows));
        self
    }

    /// Answer `query_raw` calls containing `pattern` with `rows`.
    pub fn reply_query(self, pattern: &str, rows: Vec<RawRow>) -> Self {
        self.inner
            .lock()
            .query_replies
            .push((pattern.to_string(), rows));
        self
    }

    /// Stream returned by `copy_out`.
    pub fn reply_copy_out(self, data: Bytes) -> Self {
        self.inner.lock().copy_out_data = Some(data);
        self
    }

    /// Fail any statement containing `pattern`.
    pub fn fail_on(self, pattern: &str) -> Self {
        self.inner
            .lock()
            .failures
            .push((pattern.to_string(), Failure::Error(format!("injected failure on {pattern}"))));
        self
    }

    /// Time out any statement containing `pattern`.
    pub fn time_out_on(self, pattern: &str, after: Duration) -> Self {
        self.inner
            .lock()
            .failures
            .push((pattern.to_string(), Failure::Timeout(after)));
        self
    }

    /// Fail the `index`-th COPY data send (0-based, across all COPYs).
    pub fn fail_send(self, index: usize) -> Self {
        self.inner.lock().fail_send_at = Some(index);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().calls.clone()
    }

    /// Statement text of every call, in order.
    pub fn statements(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .map(|c| c.statement().to_string())
            .collect()
    }

    /// Whether any statement so far starts with `prefix`.
    pub fn issued(&self, prefix: &str) -> bool {
        self.inner
            .lock()
            .calls
            .iter()
            .any(|c| c.statement().starts_with(prefix))
    }

    /// Data received by each COPY, in order.
    pub fn copied(&self) -> Vec<Bytes> {
        self.inner
            .lock()
            .copies
            .iter()
            .map(|b| b.clone().freeze())
            .collect()
    }

    /// Number of data sends so far.
    pub fn sends(&self) -> usize {
        self.inner.lock().sends
    }
}

/// Channel handed out by [`RecordingTransport::open_channel`].
pub struct RecordingChannel {
    inner: Arc<Mutex<Recording>>,
    index: usize,
}

#[async_trait]
impl CopyChannel for RecordingChannel {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        let mut recording = self.inner.lock();
        let send = recording.sends;
        recording.sends += 1;
        if recording.fail_send_at == Some(send) {
            return Err(TransportError::Other(format!("injected failure on send {send}")));
        }
        recording.copies[self.index].extend_from_slice(&chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, TransportError> {
        let mut recording = self.inner.lock();
        let rows = count_tuples(&recording.copies[self.index]);
        recording.last_copy_rows = rows;
        Ok(rows)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    type Channel = RecordingChannel;

    async fn open_channel(&mut self, statement: &str) -> Result<RecordingChannel, TransportError> {
        let mut recording = self.inner.lock();
        recording.record(Call::CopyIn(statement.to_string()))?;
        recording.copies.push(BytesMut::new());
        Ok(RecordingChannel {
            inner: Arc::clone(&self.inner),
            index: recording.copies.len() - 1,
        })
    }

    async fn execute(&mut self, statement: &str) -> Result<u64, TransportError> {
        let mut recording = self.inner.lock();
        recording.record(Call::Execute(statement.to_string()))?;
        let scripted = recording
            .execute_replies
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
            .map(|(_, rows)| *rows);
        Ok(match scripted {
            Some(rows) => rows,
            None if statement.starts_with("INSERT") || statement.starts_with("UPDATE") => {
                recording.last_copy_rows
            }
            None => 0,
        })
    }

    async fn query_raw(&mut self, statement: &str) -> Result<Vec<RawRow>, TransportError> {
        let mut recording = self.inner.lock();
        recording.record(Call::Query(statement.to_string()))?;
        Ok(recording
            .query_replies
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn copy_out(&mut self, statement: &str) -> Result<Bytes, TransportError> {
        let mut recording = self.inner.lock();
        recording.record(Call::CopyOut(statement.to_string()))?;
        recording.copy_out_data.clone().ok_or(TransportError::Closed)
    }

    async fn batch_execute(&mut self, statements: &str) -> Result<(), TransportError> {
        self.inner
            .lock()
            .record(Call::Batch(statements.to_string()))
    }
}

/// A result field carrying `value` in binary form, as the server would
/// send it.
pub fn raw_field(wire_type: WireType, value: &Value) -> Result<RawField, postgresql_copy::CodecError> {
    if value.is_null() {
        return Ok(RawField::new(pg_type(wire_type), None));
    }
    let mut buf = BytesMut::new();
    encode_value(&mut buf, wire_type, value)?;
    // Drop the length prefix.
    let payload = buf.split_off(4).freeze();
    Ok(RawField::new(pg_type(wire_type), Some(payload)))
}

/// Count tuples in a binary COPY stream without decoding the fields.
fn count_tuples(data: &[u8]) -> u64 {
    fn read<const N: usize>(data: &[u8], pos: &mut usize) -> Option<[u8; N]> {
        let bytes = data.get(*pos..*pos + N)?;
        *pos += N;
        bytes.try_into().ok()
    }

    let mut pos = 11 + 4;
    let Some(extension) = read::<4>(data, &mut pos) else {
        return 0;
    };
    pos += i32::from_be_bytes(extension).max(0) as usize;

    let mut rows = 0;
    while let Some(count) = read::<2>(data, &mut pos) {
        let count = i16::from_be_bytes(count);
        if count < 0 {
            break;
        }
        for _ in 0..count {
            let Some(len) = read::<4>(data, &mut pos) else {
                return rows;
            };
            pos += i32::from_be_bytes(len).max(0) as usize;
        }
        rows += 1;
    }
    rows
}
