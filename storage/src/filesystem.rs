use crate::{ObjectBody, StorageError, StorageGateway, StoredObject, content_etag};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Serves objects from `{base_dir}/{bucket}/{key}`. Intended for local
/// development against a checked-out copy of the bucket.
pub struct FilesystemGateway {
    base_dir: PathBuf,
}

impl FilesystemGateway {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        FilesystemGateway {
            base_dir: base_dir.into(),
        }
    }

    /// Maps a bucket and key onto a path below `base_dir`, refusing anything
    /// that could escape it.
    fn object_path(&self, bucket: &str, key: &str) -> Option<PathBuf> {
        let mut path = self.base_dir.clone();
        for part in std::iter::once(bucket).chain(key.split('/')) {
            let mut components = Path::new(part).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(c)), None) => path.push(c),
                _ => return None,
            }
        }
        Some(path)
    }
}

#[async_trait]
impl StorageGateway for FilesystemGateway {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let path = self
            .object_path(bucket, key)
            .ok_or_else(|| StorageError::not_found(bucket, key))?;

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(bucket, key));
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Err(StorageError::not_found(bucket, key));
        }

        let data = tokio::fs::read(&path).await?;

        Ok(StoredObject {
            etag: Some(content_etag(&data)),
            content_type: None,
            content_encoding: None,
            body: ObjectBody::from_bytes(data),
        })
    }
}
