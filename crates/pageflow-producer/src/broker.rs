//! Minimal wire client for the partitioned log broker.
//!
//! One connection per partition. Frames are a big-endian u32 length prefix
//! followed by a postcard-encoded message; a produce call writes the whole
//! record batch and reads a single aggregate response.

use async_trait::async_trait;
use bytes::Bytes;
use pageflow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Upper bound on response frames; guards against a misbehaving server
/// exhausting client memory.
const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

/// A single record as shipped to the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

/// Client → broker messages.
///
/// Variant order must stay stable for postcard compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Produce {
        topic: String,
        partition: u32,
        records: Vec<Record>,
    },
}

/// Broker → client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Produced { appended: u32 },
    Error { message: String },
}

impl Request {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(data)?)
    }
}

impl Response {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(postcard::from_bytes(data)?)
    }
}

/// Sink for one partition's record batches.
///
/// The attempt token comes from the dispatcher; implementations that can
/// abandon work early should observe it.
#[async_trait]
pub trait PartitionWriter: Send + Sync {
    async fn write_batch(&self, token: &CancellationToken, records: Vec<Record>) -> Result<()>;
}

/// A connection to one partition's leader.
pub struct BrokerConnection {
    stream: TcpStream,
    topic: String,
    partition: u32,
}

impl BrokerConnection {
    /// Dial the broker for a single partition of `topic`.
    pub async fn connect(addr: &str, topic: &str, partition: u32) -> Result<Self> {
        info!(addr, topic, partition, "connecting to broker partition");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(format!("failed to connect to {addr}: {e}")))?;
        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            topic: topic.to_string(),
            partition,
        })
    }

    /// Write a record batch and wait for the broker's aggregate verdict.
    pub async fn write_batch(&mut self, records: Vec<Record>) -> Result<()> {
        let request = Request::Produce {
            topic: self.topic.clone(),
            partition: self.partition,
            records,
        };

        let request_bytes = request.to_bytes()?;
        let len = request_bytes.len() as u32;
        self.stream.write_all(&len.to_be_bytes()).await?;
        self.stream.write_all(&request_bytes).await?;
        self.stream.flush().await?;

        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await?;
        let response_len = u32::from_be_bytes(len_buf) as usize;
        if response_len > MAX_RESPONSE_SIZE {
            return Err(Error::Connection(format!(
                "response of {response_len} bytes exceeds limit"
            )));
        }

        let mut response_buf = vec![0u8; response_len];
        self.stream.read_exact(&mut response_buf).await?;

        match Response::from_bytes(&response_buf)? {
            Response::Produced { .. } => Ok(()),
            Response::Error { message } => Err(Error::Write(message)),
        }
    }

    /// Shut the connection down. Errors here are for logging only.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Shareable [`PartitionWriter`] over an exclusive broker connection.
#[derive(Clone)]
pub struct SharedBrokerWriter {
    inner: std::sync::Arc<tokio::sync::Mutex<Option<BrokerConnection>>>,
}

impl SharedBrokerWriter {
    pub fn new(connection: BrokerConnection) -> Self {
        Self {
            inner: std::sync::Arc::new(tokio::sync::Mutex::new(Some(connection))),
        }
    }

    /// Take the connection down; subsequent writes fail.
    pub async fn close(&self) -> Result<()> {
        match self.inner.lock().await.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PartitionWriter for SharedBrokerWriter {
    async fn write_batch(&self, _token: &CancellationToken, records: Vec<Record>) -> Result<()> {
        let mut guard = self.inner.lock().await;
        match guard.as_mut() {
            Some(connection) => connection.write_batch(records).await,
            None => Err(Error::Connection("broker connection closed".into())),
        }
    }
}
