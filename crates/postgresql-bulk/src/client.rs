//! `tokio-postgres` implementation of the transport traits.

use crate::error::TransportError;
use crate::transport::{CopyChannel, RawRow, Transport};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use postgresql_copy::RawField;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio_postgres::{Client, CopyInSink, NoTls};
use tracing::{debug, error};

/// Run `fut`, failing with [`TransportError::Timeout`] after `limit`.
async fn bounded<T, F>(limit: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, tokio_postgres::Error>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(TransportError::from),
        None => fut.await.map_err(TransportError::from),
    }
}

/// A PostgreSQL session over `tokio-postgres`.
pub struct PgTransport {
    client: Client,
    timeout: Option<Duration>,
}

impl PgTransport {
    /// Connect and spawn the connection task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let transport = PgTransport::connect(
    ///     "host=localhost user=postgres password=postgres dbname=testdb",
    /// ).await?;
    /// ```
    pub async fn connect(connection_string: &str) -> Result<Self, TransportError> {
        let (client, connection) = tokio_postgres::connect(connection_string, NoTls).await?;

        // Spawn the connection task
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self::new(client))
    }

    /// Wrap an already-connected client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Bound every network operation by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Underlying client, for work outside the bulk operations.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Open `COPY ... FROM STDIN` on a `tokio-postgres` connection.
pub struct PgCopyChannel {
    sink: Pin<Box<CopyInSink<Bytes>>>,
    timeout: Option<Duration>,
}

#[async_trait]
impl CopyChannel for PgCopyChannel {
    async fn send(&mut self, chunk: Bytes) -> Result<(), TransportError> {
        bounded(self.timeout, self.sink.send(chunk)).await
    }

    async fn finish(&mut self) -> Result<u64, TransportError> {
        bounded(self.timeout, self.sink.as_mut().finish()).await
    }
}

#[async_trait]
impl Transport for PgTransport {
    type Channel = PgCopyChannel;

    async fn open_channel(&mut self, statement: &str) -> Result<PgCopyChannel, TransportError> {
        debug!("COPY: {}", statement);
        let sink = bounded(self.timeout, self.client.copy_in(statement)).await?;
        Ok(PgCopyChannel {
            sink: Box::pin(sink),
            timeout: self.timeout,
        })
    }

    async fn execute(&mut self, statement: &str) -> Result<u64, TransportError> {
        debug!("SQL: {}", statement);
        bounded(self.timeout, self.client.execute(statement, &[])).await
    }

    async fn query_raw(&mut self, statement: &str) -> Result<Vec<RawRow>, TransportError> {
        debug!("SQL: {}", statement);
        let rows = bounded(self.timeout, self.client.query(statement, &[])).await?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| row.try_get::<_, RawField>(idx).map_err(TransportError::from))
                    .collect()
            })
            .collect()
    }

    async fn copy_out(&mut self, statement: &str) -> Result<Bytes, TransportError> {
        debug!("COPY: {}", statement);
        let timeout = self.timeout;
        let collect = async {
            let stream = self.client.copy_out(statement).await?;
            futures::pin_mut!(stream);
            let mut data = BytesMut::new();
            while let Some(chunk) = stream.next().await {
                data.extend_from_slice(&chunk?);
            }
            Ok::<_, tokio_postgres::Error>(data.freeze())
        };
        bounded(timeout, collect).await
    }

    async fn batch_execute(&mut self, statements: &str) -> Result<(), TransportError> {
        debug!("SQL: {}", statements);
        bounded(self.timeout, self.client.batch_execute(statements)).await
    }
}
