use arc_swap::ArcSwap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use storage::{StorageError, StorageGateway};

/// Upper bound on the size of the redirect table object.
pub const MAX_TABLE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct RedirectEntry {
    pub base_uri: String,
    pub include_path: bool,
}

impl RedirectEntry {
    /// Where a request for `path` under this project is sent. `path` is
    /// expected to be URL-safe already.
    pub fn location(&self, path: &str) -> String {
        if self.include_path {
            format!("{}/{path}", self.base_uri)
        } else {
            self.base_uri.clone()
        }
    }
}

/// One line of the table file.
#[derive(Deserialize)]
struct RedirectRecord {
    project_name: String,
    include_path: bool,
    base_uri: String,
}

#[derive(thiserror::Error, Debug)]
pub enum RefreshError {
    #[error("failed to fetch redirect table: {0}")]
    Fetch(#[from] StorageError),
    #[error("invalid redirect record on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl RefreshError {
    /// Failures to reach the object are retried sooner than bad content.
    pub fn is_fetch_failure(&self) -> bool {
        match self {
            RefreshError::Fetch(StorageError::TooLarge { .. }) => false,
            RefreshError::Fetch(_) => true,
            RefreshError::Parse { .. } => false,
        }
    }
}

/// An immutable, complete copy of the table together with the change token
/// of the object it was built from.
#[derive(Debug, Default)]
pub struct RedirectSnapshot {
    entries: HashMap<String, RedirectEntry>,
    etag: Option<String>,
}

impl RedirectSnapshot {
    /// Parses newline-delimited JSON records. Blank lines are skipped and a
    /// later record for the same project replaces an earlier one. A single bad
    /// line rejects the whole table.
    pub fn parse(data: &[u8], etag: Option<String>) -> Result<Self, RefreshError> {
        let mut entries = HashMap::new();
        for (i, line) in data.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let record: RedirectRecord =
                serde_json::from_slice(line).map_err(|source| RefreshError::Parse {
                    line: i + 1,
                    source,
                })?;
            entries.insert(
                record.project_name,
                RedirectEntry {
                    base_uri: record.base_uri,
                    include_path: record.include_path,
                },
            );
        }
        Ok(RedirectSnapshot { entries, etag })
    }

    pub fn get(&self, project_name: &str) -> Option<&RedirectEntry> {
        self.entries.get(project_name)
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The currently published snapshot. Readers never block and always see a
/// whole snapshot; only the refresher publishes new ones.
pub struct RedirectTable {
    current: ArcSwap<RedirectSnapshot>,
}

impl Default for RedirectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RedirectTable {
    pub fn new() -> Self {
        RedirectTable {
            current: ArcSwap::from_pointee(RedirectSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<RedirectSnapshot> {
        self.current.load_full()
    }

    pub fn lookup(&self, project_name: &str) -> Option<RedirectEntry> {
        self.current.load().get(project_name).cloned()
    }

    pub(crate) fn publish(&self, snapshot: Arc<RedirectSnapshot>) {
        self.current.store(snapshot);
    }
}

#[derive(Debug)]
pub enum RefreshOutcome {
    Unchanged,
    Updated(RedirectSnapshot),
}

/// Fetches the table object and builds a new snapshot if its change token
/// differs from `current`'s. Nothing is published here.
pub async fn refresh_once(
    storage: &dyn StorageGateway,
    bucket: &str,
    key: &str,
    current: &RedirectSnapshot,
) -> Result<RefreshOutcome, RefreshError> {
    let object = storage.fetch(bucket, key).await?;

    if object.etag.is_some() && object.etag.as_deref() == current.etag() {
        object.body.close();
        return Ok(RefreshOutcome::Unchanged);
    }

    let data = object.body.read_to_end(MAX_TABLE_SIZE).await?;
    let snapshot = RedirectSnapshot::parse(&data, object.etag)?;
    Ok(RefreshOutcome::Updated(snapshot))
}
