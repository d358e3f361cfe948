use crate::content::{DEFAULT_CONTENT_TYPE, guess_type};
use crate::metrics_defs::DOCS_RESPONSES;
use crate::redirect_table::RedirectTable;
use shared::counter;
use std::sync::Arc;
use storage::{ObjectBody, StorageError, StorageGateway};

const INDEX_DOCUMENT: &str = "index.html";

#[derive(thiserror::Error, Debug)]
pub enum DocsError {
    #[error("documentation bucket unavailable: {0}")]
    Storage(#[from] StorageError),
}

/// An object ready to be streamed to the client.
#[derive(Debug)]
pub struct DocsContent {
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub etag: Option<String>,
    pub body: ObjectBody,
}

#[derive(Debug)]
pub enum DocsResponse {
    Redirect { location: String, permanent: bool },
    Content(DocsContent),
    NotFound,
}

impl DocsResponse {
    fn outcome(&self) -> &'static str {
        match self {
            DocsResponse::Redirect {
                permanent: true, ..
            } => "canonical_redirect",
            DocsResponse::Redirect {
                permanent: false, ..
            } => "external_redirect",
            DocsResponse::Content(_) => "content",
            DocsResponse::NotFound => "not_found",
        }
    }
}

pub struct DocumentationServer {
    storage: Arc<dyn StorageGateway>,
    bucket: String,
    redirects: Arc<RedirectTable>,
}

impl DocumentationServer {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        bucket: String,
        redirects: Arc<RedirectTable>,
    ) -> Self {
        DocumentationServer {
            storage,
            bucket,
            redirects,
        }
    }

    /// `/{project}` always moves to `/{project}/`.
    pub fn top_level(&self, project_name: &str) -> DocsResponse {
        let response = DocsResponse::Redirect {
            location: format!("/{}/", escape_path(project_name)),
            permanent: true,
        };
        counter!(DOCS_RESPONSES, "outcome" => response.outcome()).increment(1);
        response
    }

    /// Serves `path` (already decoded) for `project_name`. Projects in the
    /// redirect table are sent to their external host without touching the
    /// bucket.
    pub async fn serve(&self, project_name: &str, path: &str) -> Result<DocsResponse, DocsError> {
        let result = self.serve_inner(project_name, path).await;
        record(&result);
        result
    }

    /// Serves `index.html` from the root of the bucket.
    pub async fn serve_index(&self) -> Result<DocsResponse, DocsError> {
        let result = match self.fetch(INDEX_DOCUMENT).await {
            Ok(Some(content)) => Ok(DocsResponse::Content(content)),
            Ok(None) => Ok(DocsResponse::NotFound),
            Err(e) => Err(e),
        };
        record(&result);
        result
    }

    async fn serve_inner(&self, project_name: &str, path: &str) -> Result<DocsResponse, DocsError> {
        if let Some(entry) = self.redirects.lookup(project_name) {
            return Ok(DocsResponse::Redirect {
                location: entry.location(&escape_path(path)),
                permanent: false,
            });
        }

        let mut key = format!("{project_name}/{path}");
        if key.ends_with('/') {
            key.push_str(INDEX_DOCUMENT);
        }

        if let Some(content) = self.fetch(&key).await? {
            return Ok(DocsResponse::Content(content));
        }

        // A directory requested without its trailing slash.
        let index_key = format!("{key}/{INDEX_DOCUMENT}");
        match self.fetch(&index_key).await? {
            Some(content) => {
                content.body.close();
                Ok(DocsResponse::Redirect {
                    location: format!("/{}/", escape_path(&key)),
                    permanent: true,
                })
            }
            None => Ok(DocsResponse::NotFound),
        }
    }

    /// `Ok(None)` when the key does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<DocsContent>, DocsError> {
        let object = match self.storage.fetch(&self.bucket, key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => {
                tracing::warn!(bucket = %self.bucket, key, error = %e, "Object fetch failed");
                return Err(e.into());
            }
        };

        let (media_type, encoding) = guess_type(key);
        let content_type = media_type
            .map(str::to_string)
            .or(object.content_type)
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let content_encoding = encoding.map(str::to_string).or(object.content_encoding);

        Ok(Some(DocsContent {
            content_type,
            content_encoding,
            etag: object.etag,
            body: object.body,
        }))
    }
}

fn record(result: &Result<DocsResponse, DocsError>) {
    let outcome = match result {
        Ok(response) => response.outcome(),
        Err(_) => "unavailable",
    };
    counter!(DOCS_RESPONSES, "outcome" => outcome).increment(1);
}

/// Percent-encodes each segment of `path` for use in a Location header.
fn escape_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redirect_table::RedirectSnapshot;
    use storage::memory::{InjectedFailure, MemoryGateway};

    fn server(storage: &Arc<MemoryGateway>, table: &str) -> DocumentationServer {
        let redirects = Arc::new(RedirectTable::new());
        redirects.publish(Arc::new(
            RedirectSnapshot::parse(table.as_bytes(), None).unwrap(),
        ));
        DocumentationServer::new(storage.clone(), "docs".into(), redirects)
    }

    fn assert_redirect(response: DocsResponse, expected: &str, expected_permanent: bool) {
        match response {
            DocsResponse::Redirect {
                location,
                permanent,
            } => {
                assert_eq!(location, expected);
                assert_eq!(permanent, expected_permanent);
            }
            other => panic!("expected a redirect, got {other:?}"),
        }
    }

    async fn content(response: DocsResponse) -> (String, Option<String>, Vec<u8>) {
        match response {
            DocsResponse::Content(content) => {
                let body = content.body.read_to_end(1 << 20).await.unwrap();
                (content.content_type, content.content_encoding, body.to_vec())
            }
            other => panic!("expected content, got {other:?}"),
        }
    }

    #[test]
    fn test_top_level() {
        let storage = Arc::new(MemoryGateway::new());
        let server = server(&storage, "");
        assert_redirect(server.top_level("flask"), "/flask/", true);
        assert_redirect(server.top_level("a b"), "/a%20b/", true);
    }

    #[tokio::test]
    async fn test_redirect_table_takes_priority() {
        let storage = Arc::new(MemoryGateway::new());
        storage.put("docs", "requests/index.html", "<h1>stale</h1>");
        let server = server(
            &storage,
            concat!(
                r#"{"project_name": "requests", "include_path": true, "base_uri": "https://docs.example.com"}"#,
                "\n",
                r#"{"project_name": "flask", "include_path": false, "base_uri": "https://flask.example.com"}"#,
            ),
        );

        let response = server.serve("requests", "guide/intro").await.unwrap();
        assert_redirect(response, "https://docs.example.com/guide/intro", false);

        let response = server.serve("requests", "").await.unwrap();
        assert_redirect(response, "https://docs.example.com/", false);

        let response = server.serve("flask", "guide/intro").await.unwrap();
        assert_redirect(response, "https://flask.example.com", false);

        assert_eq!(storage.fetch_count("docs", "requests/index.html"), 0);
    }

    #[tokio::test]
    async fn test_serve_object() {
        let storage = Arc::new(MemoryGateway::new());
        storage.put("docs", "flask/index.html", "<h1>flask</h1>");
        storage.put("docs", "flask/_static/basic.css", "body {}");
        storage.put_with_content_type("docs", "flask/objects.inv", "inv", "text/x-inventory");
        storage.put("docs", "flask/blob", "?");
        let server = server(&storage, "");

        let (content_type, encoding, body) = content(server.serve("flask", "").await.unwrap()).await;
        assert_eq!(content_type, "text/html");
        assert_eq!(encoding, None);
        assert_eq!(body, b"<h1>flask</h1>");

        let (content_type, ..) = content(server.serve("flask", "_static/basic.css").await.unwrap()).await;
        assert_eq!(content_type, "text/css");

        let (content_type, ..) = content(server.serve("flask", "objects.inv").await.unwrap()).await;
        assert_eq!(content_type, "text/x-inventory");

        let (content_type, ..) = content(server.serve("flask", "blob").await.unwrap()).await;
        assert_eq!(content_type, DEFAULT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_directory_redirect() {
        let storage = Arc::new(MemoryGateway::new());
        storage.put("docs", "proj/x/index.html", "<h1>x</h1>");
        let server = server(&storage, "");

        let response = server.serve("proj", "x").await.unwrap();
        assert_redirect(response, "/proj/x/", true);

        let (_, _, body) = content(server.serve("proj", "x/").await.unwrap()).await;
        assert_eq!(body, b"<h1>x</h1>");
    }

    #[tokio::test]
    async fn test_not_found() {
        let storage = Arc::new(MemoryGateway::new());
        let server = server(&storage, "");

        assert!(matches!(
            server.serve("proj", "missing.html").await.unwrap(),
            DocsResponse::NotFound
        ));
        assert_eq!(storage.fetch_count("docs", "proj/missing.html"), 1);
        assert_eq!(storage.fetch_count("docs", "proj/missing.html/index.html"), 1);

        assert!(matches!(
            server.serve("proj", "").await.unwrap(),
            DocsResponse::NotFound
        ));
        assert!(matches!(
            server.serve_index().await.unwrap(),
            DocsResponse::NotFound
        ));
    }

    #[tokio::test]
    async fn test_storage_unavailable() {
        let storage = Arc::new(MemoryGateway::new());
        storage.put("docs", "proj/index.html", "<h1>proj</h1>");
        storage.fail_next("docs", "proj/index.html", InjectedFailure::Unavailable);
        let server = server(&storage, "");

        let err = server.serve("proj", "").await.unwrap_err();
        assert!(matches!(err, DocsError::Storage(_)));

        // only not-found falls back to the directory index
        storage.fail_next("docs", "proj/page", InjectedFailure::Timeout);
        assert!(server.serve("proj", "page").await.is_err());
        assert_eq!(storage.fetch_count("docs", "proj/page/index.html"), 0);
    }

    #[tokio::test]
    async fn test_serve_index() {
        let storage = Arc::new(MemoryGateway::new());
        storage.put("docs", "index.html", "<h1>all projects</h1>");
        // the redirect table does not apply to the bucket index
        let server = server(
            &storage,
            r#"{"project_name": "index.html", "include_path": false, "base_uri": "https://elsewhere"}"#,
        );

        let (content_type, _, body) = content(server.serve_index().await.unwrap()).await;
        assert_eq!(content_type, "text/html");
        assert_eq!(body, b"<h1>all projects</h1>");
    }

    #[test]
    fn test_escape_path() {
        assert_eq!(escape_path("guide/intro"), "guide/intro");
        assert_eq!(escape_path("a b/ü?x#y%"), "a%20b/%C3%BC%3Fx%23y%25");
        assert_eq!(escape_path("x/"), "x/");
        assert_eq!(escape_path(""), "");
    }
}
