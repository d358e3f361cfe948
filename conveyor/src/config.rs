use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use storage::config::StorageConfig;
use thiserror::Error;
use url::Url;

/// Upstream index base URL.
pub const ENDPOINT_ENV: &str = "CONVEYOR_ENDPOINT";
/// Documentation bucket name.
pub const DOCS_BUCKET_ENV: &str = "DOCS_BUCKET";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("{0} cannot be 0")]
    ZeroDuration(&'static str),

    #[error("Index endpoint must be an http(s) URL, got {0}")]
    UnsupportedEndpoint(Url),

    #[error("Docs bucket cannot be empty")]
    EmptyBucket,

    #[error("Redirect table key cannot be empty")]
    EmptyRedirectKey,

    #[error("Invalid storage endpoint: {0}")]
    InvalidStorageEndpoint(url::ParseError),

    #[error("Invalid sentry DSN: {0}")]
    InvalidSentryDsn(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("{0} is not set")]
    MissingSetting(&'static str),
    #[error("invalid index endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
    #[error("invalid config: {0}")]
    Invalid(#[from] ValidationError),
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn new(host: &str, port: u16) -> Self {
        Listener {
            host: host.to_string(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener::new("0.0.0.0", 8000)
}

fn default_admin_listener() -> Listener {
    Listener::new("127.0.0.1", 8001)
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedirectsConfig {
    /// Key of the redirect table object in the docs bucket.
    pub key: String,
    pub refresh_interval_secs: u64,
    /// Used instead of the refresh interval after the table could not be fetched.
    pub retry_interval_secs: u64,
}

impl Default for RedirectsConfig {
    fn default() -> Self {
        RedirectsConfig {
            key: "redirects.txt".into(),
            refresh_interval_secs: 600,
            retry_interval_secs: 60,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_secs: u64,
    /// Whole request to the index, body included.
    pub index_secs: u64,
    /// Each storage operation: the request, and every body read.
    pub storage_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        TimeoutsConfig {
            connect_secs: 5,
            index_secs: 10,
            storage_secs: 10,
        }
    }
}

impl TimeoutsConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn index(&self) -> Duration {
        Duration::from_secs(self.index_secs)
    }

    pub fn storage(&self) -> Duration {
        Duration::from_secs(self.storage_secs)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

/// The config file as written. Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    listener: Option<Listener>,
    admin_listener: Option<Listener>,
    endpoint: Option<String>,
    docs_bucket: Option<String>,
    storage: StorageConfig,
    redirects: RedirectsConfig,
    timeouts: TimeoutsConfig,
    metrics: Option<MetricsConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub listener: Listener,
    pub admin_listener: Listener,
    pub endpoint: Url,
    pub docs_bucket: String,
    pub storage: StorageConfig,
    pub redirects: RedirectsConfig,
    pub timeouts: TimeoutsConfig,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Reads the optional config file, applies environment overrides looked
    /// up through `env`, and validates the result.
    pub fn load<E>(path: Option<&Path>, env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let file: ConfigFile = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path)?;
                if contents.trim().is_empty() {
                    ConfigFile::default()
                } else {
                    serde_yaml::from_str(&contents)?
                }
            }
            None => ConfigFile::default(),
        };

        let endpoint = env(ENDPOINT_ENV)
            .or(file.endpoint)
            .ok_or(ConfigError::MissingSetting(ENDPOINT_ENV))?;
        let docs_bucket = env(DOCS_BUCKET_ENV)
            .or(file.docs_bucket)
            .ok_or(ConfigError::MissingSetting(DOCS_BUCKET_ENV))?;

        let config = Config {
            listener: file.listener.unwrap_or_else(default_listener),
            admin_listener: file.admin_listener.unwrap_or_else(default_admin_listener),
            endpoint: Url::parse(&endpoint)?,
            docs_bucket,
            storage: file.storage,
            redirects: file.redirects,
            timeouts: file.timeouts,
            metrics: file.metrics,
            logging: file.logging,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if !matches!(self.endpoint.scheme(), "http" | "https") {
            return Err(ValidationError::UnsupportedEndpoint(self.endpoint.clone()));
        }
        if self.docs_bucket.is_empty() {
            return Err(ValidationError::EmptyBucket);
        }
        if self.redirects.key.is_empty() {
            return Err(ValidationError::EmptyRedirectKey);
        }
        if let Some(Err(e)) = self.storage.s3_endpoint() {
            return Err(ValidationError::InvalidStorageEndpoint(e));
        }
        if let Some(logging) = &self.logging {
            sentry::types::Dsn::from_str(&logging.sentry_dsn)
                .map_err(|e| ValidationError::InvalidSentryDsn(e.to_string()))?;
        }

        for (name, value) in [
            ("redirects.refresh_interval_secs", self.redirects.refresh_interval_secs),
            ("redirects.retry_interval_secs", self.redirects.retry_interval_secs),
            ("timeouts.connect_secs", self.timeouts.connect_secs),
            ("timeouts.index_secs", self.timeouts.index_secs),
            ("timeouts.storage_secs", self.timeouts.storage_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::ZeroDuration(name));
            }
        }

        Ok(())
    }
}
