use crate::metrics_defs::INDEX_REQUEST_DURATION;
use async_trait::async_trait;
use http::StatusCode;
use indexmap::IndexMap;
use serde::Deserialize;
use shared::histogram;
use std::time::Instant;
use url::Url;

/// One uploaded file as listed by the index's JSON API.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReleaseFile {
    pub filename: String,
    pub python_version: String,
    #[serde(rename = "url")]
    pub download_url: String,
    #[serde(rename = "has_sig", default)]
    has_signature: Option<bool>,
}

impl ReleaseFile {
    pub fn new(filename: &str, python_version: &str, download_url: &str, has_signature: bool) -> Self {
        ReleaseFile {
            filename: filename.into(),
            python_version: python_version.into(),
            download_url: download_url.into(),
            has_signature: Some(has_signature),
        }
    }

    pub fn has_signature(&self) -> bool {
        self.has_signature.unwrap_or(false)
    }
}

/// The `/pypi/{project}/json` document, keeping only what resolution needs.
/// Releases keep the order the index sent them in.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ProjectReleases {
    #[serde(default)]
    pub releases: IndexMap<String, Vec<ReleaseFile>>,
}

impl ProjectReleases {
    pub fn files(&self) -> impl Iterator<Item = &ReleaseFile> {
        self.releases.values().flatten()
    }
}

#[derive(Debug)]
pub enum IndexResponse {
    Releases(ProjectReleases),
    /// Any non-200 answer from the index.
    Status(StatusCode),
}

#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("index request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid index response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("invalid index URL: {0}")]
    InvalidUrl(String),
}

#[async_trait]
pub trait IndexGateway: Send + Sync {
    async fn fetch_releases(&self, project_name: &str) -> Result<IndexResponse, IndexError>;
}

/// Talks to a PyPI-compatible JSON API.
pub struct HttpIndex {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpIndex {
    pub fn new(client: reqwest::Client, endpoint: Url) -> Self {
        HttpIndex { client, endpoint }
    }

    fn project_url(&self, project_name: &str) -> Result<Url, IndexError> {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|()| IndexError::InvalidUrl(self.endpoint.to_string()))?
            .clear()
            .extend(["pypi", project_name, "json"]);
        Ok(url)
    }
}

#[async_trait]
impl IndexGateway for HttpIndex {
    async fn fetch_releases(&self, project_name: &str) -> Result<IndexResponse, IndexError> {
        let url = self.project_url(project_name)?;
        let start = Instant::now();

        let response = self.client.get(url).send().await?;
        let status = response.status();
        histogram!(INDEX_REQUEST_DURATION, "status" => status.as_u16().to_string())
            .record(start.elapsed().as_secs_f64());

        if status != StatusCode::OK {
            return Ok(IndexResponse::Status(status));
        }

        let body = response.bytes().await?;
        let releases = serde_json::from_slice(&body)?;
        Ok(IndexResponse::Releases(releases))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper::{Request, Response};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    const SPAM_JSON: &str = r#"{
        "info": {"name": "spam"},
        "releases": {
            "1.0": [
                {"filename": "spam-1.0.tar.gz", "python_version": "source",
                 "url": "https://files.example/spam-1.0.tar.gz", "has_sig": true,
                 "size": 12}
            ],
            "0.9": [
                {"filename": "spam-0.9.zip", "python_version": "source",
                 "url": "https://files.example/spam-0.9.zip", "has_sig": null}
            ]
        }
    }"#;

    async fn index_handler(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let agent = req
            .headers()
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let response = match req.uri().path() {
            "/pypi/spam/json" if agent == "conveyor" => Response::new(Full::new(Bytes::from(SPAM_JSON))),
            "/pypi/broken/json" => Response::new(Full::new(Bytes::from_static(b"<html>"))),
            "/pypi/flaky/json" => Response::builder()
                .status(502)
                .body(Full::new(Bytes::new()))
                .unwrap(),
            _ => Response::builder()
                .status(404)
                .body(Full::new(Bytes::new()))
                .unwrap(),
        };
        Ok(response)
    }

    async fn start_test_index() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(index_handler))
                        .await;
                });
            }
        });

        Url::parse(&format!("http://127.0.0.1:{port}/simple/?x=1")).unwrap()
    }

    fn client() -> reqwest::Client {
        reqwest::Client::builder().user_agent("conveyor").build().unwrap()
    }

    #[test]
    fn test_project_url() {
        let index = HttpIndex::new(client(), Url::parse("https://pypi.org/some/path").unwrap());
        assert_eq!(
            index.project_url("Flask").unwrap().as_str(),
            "https://pypi.org/pypi/Flask/json"
        );
        assert_eq!(
            index.project_url("a/b").unwrap().as_str(),
            "https://pypi.org/pypi/a%2Fb/json"
        );
    }

    #[tokio::test]
    async fn test_fetch_releases() {
        let index = HttpIndex::new(client(), start_test_index().await);

        let response = index.fetch_releases("spam").await.unwrap();
        let IndexResponse::Releases(releases) = response else {
            panic!("expected releases");
        };
        let files: Vec<_> = releases.files().collect();
        assert_eq!(files.len(), 2);
        // document order is preserved
        assert_eq!(files[0].filename, "spam-1.0.tar.gz");
        assert!(files[0].has_signature());
        assert_eq!(files[1].download_url, "https://files.example/spam-0.9.zip");
        assert!(!files[1].has_signature());
    }

    #[tokio::test]
    async fn test_fetch_status() {
        let index = HttpIndex::new(client(), start_test_index().await);

        assert!(matches!(
            index.fetch_releases("missing").await.unwrap(),
            IndexResponse::Status(StatusCode::NOT_FOUND)
        ));
        assert!(matches!(
            index.fetch_releases("flaky").await.unwrap(),
            IndexResponse::Status(StatusCode::BAD_GATEWAY)
        ));
        assert!(matches!(
            index.fetch_releases("broken").await,
            Err(IndexError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_missing_releases() {
        let releases: ProjectReleases = serde_json::from_str(r#"{"info": {}}"#).unwrap();
        assert_eq!(releases.files().count(), 0);
    }
}
