//! Blob fetches from the documentation bucket.
//!
//! The rest of the service only sees the [`StorageGateway`] capability: fetch
//! an object by bucket and key, getting back its change token, content
//! metadata and a read-once body. Backends are selected from configuration
//! with [`get_gateway`].
pub mod config;
pub mod filesystem;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use config::StorageConfig;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("object store returned status {0}")]
    Status(http::StatusCode),

    #[error("object store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("object store operation timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object is larger than {limit} bytes")]
    TooLarge { limit: usize },

    #[error("invalid object store URL: {0}")]
    InvalidUrl(String),
}

impl StorageError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;
}

#[derive(Debug)]
pub struct StoredObject {
    /// Opaque change token, e.g. the object's ETag.
    pub etag: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub body: ObjectBody,
}

enum BodySource {
    Remote(reqwest::Response),
    Buffered(Bytes),
    Done,
}

/// The object's content, read sequentially and at most once.
///
/// Dropping the body (or calling [`ObjectBody::close`]) before it is drained
/// releases the underlying connection.
pub struct ObjectBody {
    source: BodySource,
    pending: Bytes,
    read_timeout: Option<Duration>,
}

impl ObjectBody {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        ObjectBody {
            source: BodySource::Buffered(data.into()),
            pending: Bytes::new(),
            read_timeout: None,
        }
    }

    pub(crate) fn from_response(response: reqwest::Response, read_timeout: Duration) -> Self {
        ObjectBody {
            source: BodySource::Remote(response),
            pending: Bytes::new(),
            read_timeout: Some(read_timeout),
        }
    }

    /// Reads the next chunk of at most `max` bytes. Returns `None` once the
    /// body is exhausted.
    pub async fn read(&mut self, max: usize) -> Result<Option<Bytes>, StorageError> {
        while self.pending.is_empty() {
            match self.next_chunk().await? {
                Some(chunk) => self.pending = chunk,
                None => return Ok(None),
            }
        }

        let len = max.max(1).min(self.pending.len());
        Ok(Some(self.pending.split_to(len)))
    }

    /// Drains the whole body, failing if it grows beyond `limit` bytes.
    pub async fn read_to_end(mut self, limit: usize) -> Result<Bytes, StorageError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.read(usize::MAX).await? {
            if buf.len() + chunk.len() > limit {
                return Err(StorageError::TooLarge { limit });
            }
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    pub fn close(self) {
        if !self.is_drained() {
            tracing::trace!("Closing object body before it was drained");
        }
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && matches!(self.source, BodySource::Done)
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StorageError> {
        let chunk = match &mut self.source {
            BodySource::Remote(response) => match self.read_timeout {
                Some(limit) => timeout(limit, response.chunk())
                    .await
                    .map_err(|_| StorageError::Timeout)??,
                None => response.chunk().await?,
            },
            BodySource::Buffered(data) if !data.is_empty() => Some(std::mem::take(data)),
            BodySource::Buffered(_) | BodySource::Done => None,
        };

        if chunk.is_none() {
            self.source = BodySource::Done;
        }
        Ok(chunk)
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            BodySource::Remote(_) => "remote",
            BodySource::Buffered(_) => "buffered",
            BodySource::Done => "done",
        };
        f.debug_struct("ObjectBody")
            .field("source", &source)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Quoted hex SHA-256 of the content, used by backends that have no native
/// change token.
pub fn content_etag(data: &[u8]) -> String {
    format!("\"{:x}\"", Sha256::digest(data))
}

pub fn get_gateway(
    config: &StorageConfig,
    client: reqwest::Client,
    timeout: Duration,
) -> Result<Arc<dyn StorageGateway>, StorageError> {
    let gateway: Arc<dyn StorageGateway> = match config {
        StorageConfig::S3 { endpoint } => {
            let endpoint =
                url::Url::parse(endpoint).map_err(|_| StorageError::InvalidUrl(endpoint.clone()))?;
            Arc::new(s3::S3Gateway::new(client, endpoint, timeout))
        }
        StorageConfig::Filesystem { base_dir } => {
            Arc::new(filesystem::FilesystemGateway::new(base_dir))
        }
    };
    Ok(gateway)
}
