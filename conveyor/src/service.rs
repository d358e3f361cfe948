use crate::ConveyorError;
use bytes::Bytes;
use docs::server::{DocsContent, DocsResponse, DocumentationServer};
use docs::stream::ObjectStream;
use http::header::{
    ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG, HeaderName,
    HeaderValue, LOCATION, ORIGIN,
};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::service::Service;
use packages::resolver::{self, ArtifactKey, ArtifactResolver, ResolveError};
use shared::http::{empty_body, make_error_response};
use shared::routing::{Resolution, Route, RouteMatch, Router};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type Body = BoxBody<Bytes, ConveyorError>;

const REASON: HeaderName = HeaderName::from_static("reason");

#[derive(Debug, Clone, Copy, PartialEq)]
enum RouteAction {
    Artifact,
    PackagesNotFound,
    Health,
    BucketIndex,
    DocsTopLevel,
    Docs,
}

fn routes() -> Router<RouteAction> {
    let get = &[Method::GET];
    let get_head = &[Method::GET, Method::HEAD];

    Router::new(vec![
        Route::new(
            get_head,
            "/packages/{python_version}/{project_l}/{project_name}/{filename}",
            RouteAction::Artifact,
        ),
        Route::new(get, "/packages", RouteAction::PackagesNotFound),
        Route::new(get, "/packages/{*tail}", RouteAction::PackagesNotFound),
        Route::new(get, "/_health", RouteAction::Health),
        Route::new(get, "/_health/", RouteAction::Health),
        Route::new(get_head, "/", RouteAction::BucketIndex),
        Route::new(get, "/{project_name}", RouteAction::DocsTopLevel),
        Route::new(get, "/{project_name}/{*path}", RouteAction::Docs),
    ])
}

/// The public listener: artifact redirects and documentation.
pub struct ConveyorService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    router: Router<RouteAction>,
    resolver: ArtifactResolver,
    docs: DocumentationServer,
}

impl ConveyorService {
    pub fn new(resolver: ArtifactResolver, docs: DocumentationServer) -> Self {
        ConveyorService {
            inner: Arc::new(ServiceInner {
                router: routes(),
                resolver,
                docs,
            }),
        }
    }
}

impl Service<Request<Incoming>> for ConveyorService {
    type Response = Response<Body>;
    type Error = ConveyorError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { Ok(inner.handle(req).await) })
    }
}

impl ServiceInner {
    async fn handle<B>(&self, req: Request<B>) -> Response<Body> {
        let method = req.method().clone();
        let cross_origin = req.headers().contains_key(ORIGIN);

        let mut response = match self.router.resolve(&method, req.uri().path()) {
            Resolution::Matched(route) => self.dispatch(&method, route).await,
            Resolution::MethodNotAllowed => make_error_response(StatusCode::METHOD_NOT_ALLOWED),
            Resolution::NotFound => make_error_response(StatusCode::NOT_FOUND),
        };

        if cross_origin {
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        }
        tracing::debug!(%method, path = req.uri().path(), status = %response.status(), "Handled request");
        response
    }

    async fn dispatch(&self, method: &Method, route: RouteMatch<'_, RouteAction>) -> Response<Body> {
        let Some(params) = decode_params(&route) else {
            return make_error_response(StatusCode::BAD_REQUEST);
        };
        let param = |name: &str| params.get(name).map(String::as_str).unwrap_or_default();
        let head = method == Method::HEAD;

        match route.action {
            RouteAction::Artifact => {
                let key = ArtifactKey::new(
                    param("python_version"),
                    param("project_l"),
                    param("project_name"),
                    param("filename"),
                );
                artifact_response(self.resolver.resolve(&key).await)
            }
            RouteAction::PackagesNotFound => make_error_response(StatusCode::NOT_FOUND),
            RouteAction::Health => Response::new(empty_body()),
            RouteAction::BucketIndex => docs_response(self.docs.serve_index().await, head),
            RouteAction::DocsTopLevel => {
                docs_response(Ok(self.docs.top_level(param("project_name"))), head)
            }
            RouteAction::Docs => docs_response(
                self.docs
                    .serve(param("project_name"), param("path"))
                    .await,
                head,
            ),
        }
    }
}

/// Percent-decodes every path parameter. `None` if any of them is not UTF-8.
fn decode_params(route: &RouteMatch<'_, RouteAction>) -> Option<HashMap<String, String>> {
    route
        .params
        .iter()
        .map(|(name, raw)| {
            let value = urlencoding::decode(raw).ok()?;
            Some((name.clone(), value.into_owned()))
        })
        .collect()
}

fn redirect(status: StatusCode, location: &str) -> Response<Body> {
    let Ok(location) = HeaderValue::try_from(location) else {
        tracing::error!(location, "Redirect target is not a valid header value");
        return make_error_response(StatusCode::BAD_GATEWAY);
    };
    let mut response = Response::new(empty_body());
    *response.status_mut() = status;
    response.headers_mut().insert(LOCATION, location);
    response
}

fn artifact_response(result: Result<resolver::RedirectTarget, ResolveError>) -> Response<Body> {
    match result {
        Ok(target) => {
            let mut response = redirect(StatusCode::FOUND, &target.location);
            if response.status() == StatusCode::FOUND {
                response.headers_mut().insert(
                    CACHE_CONTROL,
                    HeaderValue::from_static(resolver::CACHE_CONTROL),
                );
            }
            response
        }
        Err(ResolveError::NotFound(reason)) => {
            let mut response = make_error_response(StatusCode::NOT_FOUND);
            response
                .headers_mut()
                .insert(REASON, HeaderValue::from_static(reason.as_str()));
            response
        }
        Err(ResolveError::ClientRejected(status)) => make_error_response(status),
        Err(ResolveError::UpstreamUnavailable) => {
            make_error_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn docs_response(
    result: Result<DocsResponse, docs::server::DocsError>,
    head: bool,
) -> Response<Body> {
    match result {
        Ok(DocsResponse::Redirect {
            location,
            permanent,
        }) => {
            let status = if permanent {
                StatusCode::MOVED_PERMANENTLY
            } else {
                StatusCode::FOUND
            };
            redirect(status, &location)
        }
        Ok(DocsResponse::Content(content)) => content_response(content, head),
        Ok(DocsResponse::NotFound) => make_error_response(StatusCode::NOT_FOUND),
        Err(_) => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
    }
}

fn content_response(content: DocsContent, head: bool) -> Response<Body> {
    let body = if head {
        content.body.close();
        empty_body()
    } else {
        ObjectStream::new(content.body)
            .map_err(ConveyorError::from)
            .boxed()
    };

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    for (name, value) in [
        (CONTENT_TYPE, Some(content.content_type)),
        (CONTENT_ENCODING, content.content_encoding),
        (ETAG, content.etag),
    ] {
        if let Some(value) = value.and_then(|v| HeaderValue::try_from(v).ok()) {
            headers.insert(name, value);
        }
    }
    response
}
