use crate::{ObjectBody, StorageError, StorageGateway, StoredObject};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, ETAG, HeaderMap, HeaderName};
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Unsigned GETs against an S3-compatible endpoint using path-style URLs
/// (`{endpoint}/{bucket}/{key}`). The documentation bucket is public, so no
/// credentials are involved.
pub struct S3Gateway {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl S3Gateway {
    pub fn new(client: reqwest::Client, endpoint: Url, timeout: Duration) -> Self {
        S3Gateway {
            client,
            endpoint,
            timeout,
        }
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StorageError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| StorageError::InvalidUrl(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(bucket)
            .extend(key.split('/'));
        Ok(url)
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl StorageGateway for S3Gateway {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let url = self.object_url(bucket, key)?;

        let response = timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| StorageError::Timeout)??;

        let status = response.status();
        // Anonymous reads of a missing key come back as 403 rather than 404.
        if status.is_client_error() {
            tracing::debug!(bucket, key, %status, "Object not found");
            return Err(StorageError::not_found(bucket, key));
        }
        if !status.is_success() {
            return Err(StorageError::Status(status));
        }

        let headers = response.headers();
        let etag = header_string(headers, ETAG);
        let content_type = header_string(headers, CONTENT_TYPE);
        let content_encoding = header_string(headers, CONTENT_ENCODING);

        Ok(StoredObject {
            etag,
            content_type,
            content_encoding,
            body: ObjectBody::from_response(response, self.timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::{TokioExecutor, TokioIo};
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    // Serves `/docs/redirects.txt`, fails `/docs/broken`, and 403s everything else.
    async fn bucket_handler(
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/docs/redirects.txt" => Response::builder()
                .header("etag", "\"abc\"")
                .header("content-type", "text/plain")
                .body(Full::new(Bytes::from_static(b"line1\nline2\n"))),
            "/docs/some%20dir/page.html" => Response::builder()
                .header("etag", "\"def\"")
                .body(Full::new(Bytes::from_static(b"<html></html>"))),
            "/docs/broken" => Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .body(Full::new(Bytes::new())),
            _ => Response::builder()
                .status(StatusCode::FORBIDDEN)
                .body(Full::new(Bytes::from_static(b"AccessDenied"))),
        };
        Ok(response.unwrap())
    }

    async fn start_test_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(io, service_fn(bucket_handler))
                        .await;
                });
            }
        });

        port
    }

    fn gateway(port: u16) -> S3Gateway {
        S3Gateway::new(
            reqwest::Client::new(),
            Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_object_url() {
        let gateway = S3Gateway::new(
            reqwest::Client::new(),
            Url::parse("https://s3.amazonaws.com").unwrap(),
            Duration::from_secs(1),
        );
        assert_eq!(
            gateway.object_url("docs", "flask/en/index.html").unwrap().as_str(),
            "https://s3.amazonaws.com/docs/flask/en/index.html"
        );
        assert_eq!(
            gateway.object_url("docs", "a b/c?d").unwrap().as_str(),
            "https://s3.amazonaws.com/docs/a%20b/c%3Fd"
        );
    }

    #[tokio::test]
    async fn test_fetch_object() {
        let port = start_test_server().await;
        let gateway = gateway(port);

        let object = gateway.fetch("docs", "redirects.txt").await.unwrap();
        assert_eq!(object.etag.as_deref(), Some("\"abc\""));
        assert_eq!(object.content_type.as_deref(), Some("text/plain"));
        assert!(object.content_encoding.is_none());
        let body = object.body.read_to_end(1024).await.unwrap();
        assert_eq!(body.as_ref(), b"line1\nline2\n");

        let object = gateway.fetch("docs", "some dir/page.html").await.unwrap();
        assert_eq!(object.etag.as_deref(), Some("\"def\""));
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        let port = start_test_server().await;
        let gateway = gateway(port);

        let err = gateway.fetch("docs", "missing.html").await.unwrap_err();
        assert!(err.is_not_found());

        let err = gateway.fetch("docs", "broken").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Status(StatusCode::SERVICE_UNAVAILABLE)
        ));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = gateway(port).fetch("docs", "index.html").await.unwrap_err();
        assert!(matches!(err, StorageError::Request(_)));
        assert!(!err.is_not_found());
    }
}
