use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

const DEFAULT_S3_ENDPOINT: &str = "https://s3.amazonaws.com";

fn default_s3_endpoint() -> String {
    DEFAULT_S3_ENDPOINT.to_string()
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// Anonymous, path-style reads from an S3-compatible endpoint.
    S3 {
        #[serde(default = "default_s3_endpoint")]
        endpoint: String,
    },
    /// Objects laid out as `{base_dir}/{bucket}/{key}` on local disk.
    Filesystem { base_dir: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::S3 {
            endpoint: default_s3_endpoint(),
        }
    }
}

impl StorageConfig {
    /// The parsed S3 endpoint, or `None` for backends without one.
    pub fn s3_endpoint(&self) -> Option<Result<Url, url::ParseError>> {
        match self {
            StorageConfig::S3 { endpoint } => Some(Url::parse(endpoint)),
            StorageConfig::Filesystem { .. } => None,
        }
    }
}
