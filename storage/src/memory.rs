use crate::{ObjectBody, StorageError, StorageGateway, StoredObject, content_etag};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};

type ObjectKey = (String, String);

#[derive(Clone)]
struct MemoryObject {
    data: Bytes,
    etag: String,
    content_type: Option<String>,
}

/// Failures that can be queued against a key to simulate an unhealthy store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InjectedFailure {
    Unavailable,
    Timeout,
}

/// In-process object store. Used by tests and for running the service
/// without any external storage.
#[derive(Default)]
pub struct MemoryGateway {
    objects: RwLock<HashMap<ObjectKey, MemoryObject>>,
    failures: Mutex<HashMap<ObjectKey, VecDeque<InjectedFailure>>>,
    fetches: Mutex<HashMap<ObjectKey, usize>>,
}

fn object_key(bucket: &str, key: &str) -> ObjectKey {
    (bucket.to_string(), key.to_string())
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object and returns its ETag.
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        let data = data.into();
        let etag = content_etag(&data);
        self.objects.write().insert(
            object_key(bucket, key),
            MemoryObject {
                data,
                etag: etag.clone(),
                content_type: None,
            },
        );
        etag
    }

    pub fn put_with_content_type(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Bytes>,
        content_type: &str,
    ) -> String {
        let etag = self.put(bucket, key, data);
        if let Some(object) = self.objects.write().get_mut(&object_key(bucket, key)) {
            object.content_type = Some(content_type.to_string());
        }
        etag
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects.write().remove(&object_key(bucket, key));
    }

    /// Makes the next fetch of this key fail. Failures queue up in order.
    pub fn fail_next(&self, bucket: &str, key: &str, failure: InjectedFailure) {
        self.failures
            .lock()
            .entry(object_key(bucket, key))
            .or_default()
            .push_back(failure);
    }

    /// Number of fetches attempted for this key, including failed ones.
    pub fn fetch_count(&self, bucket: &str, key: &str) -> usize {
        self.fetches
            .lock()
            .get(&object_key(bucket, key))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let id = object_key(bucket, key);
        *self.fetches.lock().entry(id.clone()).or_default() += 1;

        let failure = self
            .failures
            .lock()
            .get_mut(&id)
            .and_then(|queue| queue.pop_front());
        match failure {
            Some(InjectedFailure::Unavailable) => {
                return Err(StorageError::Status(http::StatusCode::SERVICE_UNAVAILABLE));
            }
            Some(InjectedFailure::Timeout) => return Err(StorageError::Timeout),
            None => {}
        }

        let object = self
            .objects
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(bucket, key))?;

        Ok(StoredObject {
            etag: Some(object.etag),
            content_type: object.content_type,
            content_encoding: None,
            body: ObjectBody::from_bytes(object.data),
        })
    }
}
