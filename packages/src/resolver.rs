use crate::filename::normalize_filename;
use crate::index::{IndexGateway, IndexResponse, ReleaseFile};
use crate::metrics_defs::ARTIFACT_RESOLUTIONS;
use http::StatusCode;
use shared::counter;
use std::sync::Arc;

const SIGNATURE_SUFFIX: &str = ".asc";

/// Redirect targets never change once published.
pub const CACHE_CONTROL: &str = "max-age=604800, public";

/// A single artifact request, as parsed from the request path.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactKey {
    pub python_version: String,
    pub bucket_letter: String,
    pub project_name: String,
    /// Filename with any signature suffix removed.
    pub filename: String,
    pub wants_signature: bool,
}

impl ArtifactKey {
    pub fn new(python_version: &str, bucket_letter: &str, project_name: &str, filename: &str) -> Self {
        let (filename, wants_signature) = match filename.strip_suffix(SIGNATURE_SUFFIX) {
            Some(stripped) => (stripped, true),
            None => (filename, false),
        };
        ArtifactKey {
            python_version: python_version.to_string(),
            bucket_letter: bucket_letter.to_string(),
            project_name: project_name.to_string(),
            filename: filename.to_string(),
            wants_signature,
        }
    }

    /// Projects are sharded by their first character. Both the lowercased
    /// and the exact-case character are accepted.
    fn in_expected_bucket(&self) -> bool {
        let Some(first) = self.project_name.chars().next() else {
            return false;
        };
        self.bucket_letter == first.to_lowercase().collect::<String>()
            || self.bucket_letter == first.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotFoundReason {
    IncorrectBucket,
    MissingSignature,
    NoFile,
}

impl NotFoundReason {
    /// Value of the `Reason` header sent with the 404.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotFoundReason::IncorrectBucket => "Incorrect project bucket",
            NotFoundReason::MissingSignature => "missing signature file",
            NotFoundReason::NoFile => "no file found",
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ResolveError {
    #[error("not found: {}", .0.as_str())]
    NotFound(NotFoundReason),
    #[error("index rejected the request with {0}")]
    ClientRejected(StatusCode),
    #[error("index unavailable")]
    UpstreamUnavailable,
}

impl ResolveError {
    fn outcome(&self) -> &'static str {
        match self {
            ResolveError::NotFound(NotFoundReason::IncorrectBucket) => "incorrect_bucket",
            ResolveError::NotFound(NotFoundReason::MissingSignature) => "missing_signature",
            ResolveError::NotFound(NotFoundReason::NoFile) => "no_file",
            ResolveError::ClientRejected(_) => "client_rejected",
            ResolveError::UpstreamUnavailable => "unavailable",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RedirectTarget {
    pub location: String,
}

pub struct ArtifactResolver {
    index: Arc<dyn IndexGateway>,
}

impl ArtifactResolver {
    pub fn new(index: Arc<dyn IndexGateway>) -> Self {
        ArtifactResolver { index }
    }

    pub async fn resolve(&self, key: &ArtifactKey) -> Result<RedirectTarget, ResolveError> {
        let result = self.resolve_inner(key).await;
        let outcome = match &result {
            Ok(_) => "redirect",
            Err(e) => e.outcome(),
        };
        counter!(ARTIFACT_RESOLUTIONS, "outcome" => outcome).increment(1);
        result
    }

    async fn resolve_inner(&self, key: &ArtifactKey) -> Result<RedirectTarget, ResolveError> {
        if !key.in_expected_bucket() {
            return Err(ResolveError::NotFound(NotFoundReason::IncorrectBucket));
        }

        let releases = match self.index.fetch_releases(&key.project_name).await {
            Ok(IndexResponse::Releases(releases)) => releases,
            Ok(IndexResponse::Status(status)) if status.is_client_error() => {
                return Err(ResolveError::ClientRejected(status));
            }
            Ok(IndexResponse::Status(status)) if status.is_server_error() => {
                tracing::warn!(project = %key.project_name, %status, "Index unavailable");
                return Err(ResolveError::UpstreamUnavailable);
            }
            Ok(IndexResponse::Status(status)) => {
                tracing::error!(
                    project = %key.project_name,
                    %status,
                    "Unexpected status from index"
                );
                return Err(ResolveError::UpstreamUnavailable);
            }
            Err(e) => {
                tracing::warn!(project = %key.project_name, error = %e, "Index request failed");
                return Err(ResolveError::UpstreamUnavailable);
            }
        };

        let wanted = normalize_filename(&key.filename);
        let is_match = |file: &ReleaseFile| {
            file.python_version == key.python_version
                && (file.filename == key.filename || normalize_filename(&file.filename) == wanted)
        };

        let Some(file) = releases.files().find(|&file| is_match(file)) else {
            return Err(ResolveError::NotFound(NotFoundReason::NoFile));
        };

        match (key.wants_signature, file.has_signature()) {
            (false, _) => Ok(RedirectTarget {
                location: file.download_url.clone(),
            }),
            (true, true) => Ok(RedirectTarget {
                location: format!("{}{SIGNATURE_SUFFIX}", file.download_url),
            }),
            (true, false) => Err(ResolveError::NotFound(NotFoundReason::MissingSignature)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{IndexError, ProjectReleases};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Answer {
        Releases(ProjectReleases),
        Status(StatusCode),
        Fail,
    }

    struct FakeIndex {
        answer: Answer,
        calls: AtomicUsize,
    }

    impl FakeIndex {
        fn new(answer: Answer) -> Arc<Self> {
            Arc::new(FakeIndex {
                answer,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IndexGateway for FakeIndex {
        async fn fetch_releases(&self, _project_name: &str) -> Result<IndexResponse, IndexError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.answer {
                Answer::Releases(releases) => Ok(IndexResponse::Releases(releases.clone())),
                Answer::Status(status) => Ok(IndexResponse::Status(*status)),
                Answer::Fail => Err(IndexError::InvalidUrl("unreachable".into())),
            }
        }
    }

    fn flask_common() -> ProjectReleases {
        let mut releases = ProjectReleases::default();
        releases.releases.insert(
            "0.2.0".into(),
            vec![
                ReleaseFile::new(
                    "Flask-Common-0.2.0.tar.gz",
                    "source",
                    "https://files.example/fc/Flask-Common-0.2.0.tar.gz",
                    true,
                ),
                ReleaseFile::new(
                    "Flask_Common-0.2.0-py3-none-any.whl",
                    "py3",
                    "https://files.example/fc/Flask_Common-0.2.0-py3-none-any.whl",
                    false,
                ),
            ],
        );
        releases
    }

    fn resolver(index: &Arc<FakeIndex>) -> ArtifactResolver {
        ArtifactResolver::new(index.clone())
    }

    #[test]
    fn test_artifact_key() {
        let key = ArtifactKey::new("source", "f", "Flask-Common", "Flask-Common-0.2.0.tar.gz.asc");
        assert!(key.wants_signature);
        assert_eq!(key.filename, "Flask-Common-0.2.0.tar.gz");

        let key = ArtifactKey::new("source", "f", "Flask-Common", "Flask-Common-0.2.0.tar.gz");
        assert!(!key.wants_signature);
    }

    #[test]
    fn test_bucket_letter() {
        assert!(ArtifactKey::new("py3", "f", "Flask", "x").in_expected_bucket());
        assert!(ArtifactKey::new("py3", "F", "Flask", "x").in_expected_bucket());
        assert!(ArtifactKey::new("py3", "f", "flask", "x").in_expected_bucket());
        assert!(!ArtifactKey::new("py3", "F", "flask", "x").in_expected_bucket());
        assert!(!ArtifactKey::new("py3", "g", "Flask", "x").in_expected_bucket());
        assert!(!ArtifactKey::new("py3", "fl", "Flask", "x").in_expected_bucket());
    }

    #[tokio::test]
    async fn test_wrong_bucket_skips_index() {
        let index = FakeIndex::new(Answer::Releases(flask_common()));
        let key = ArtifactKey::new("source", "x", "Flask-Common", "Flask-Common-0.2.0.tar.gz");

        let err = resolver(&index).resolve(&key).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound(NotFoundReason::IncorrectBucket));
        assert_eq!(index.calls(), 0);
    }

    #[tokio::test]
    async fn test_resolve_normalized() {
        let index = FakeIndex::new(Answer::Releases(flask_common()));
        let resolver = resolver(&index);

        let key = ArtifactKey::new("source", "f", "Flask-Common", "flask-common-0.2.tar.gz");
        let target = resolver.resolve(&key).await.unwrap();
        assert_eq!(
            target.location,
            "https://files.example/fc/Flask-Common-0.2.0.tar.gz"
        );

        let key = ArtifactKey::new("py3", "f", "Flask-Common", "flask_common-0.2-py3-none-any.whl");
        let target = resolver.resolve(&key).await.unwrap();
        assert_eq!(
            target.location,
            "https://files.example/fc/Flask_Common-0.2.0-py3-none-any.whl"
        );
        assert_eq!(index.calls(), 2);
    }

    #[tokio::test]
    async fn test_resolve_exact_filename() {
        // Unparseable names still resolve when the raw filename matches.
        let mut releases = ProjectReleases::default();
        releases.releases.insert(
            "1.0".into(),
            vec![ReleaseFile::new(
                "weird_name.exe",
                "any",
                "https://files.example/weird_name.exe",
                false,
            )],
        );
        let index = FakeIndex::new(Answer::Releases(releases));

        let key = ArtifactKey::new("any", "w", "weird", "weird_name.exe");
        let target = resolver(&index).resolve(&key).await.unwrap();
        assert_eq!(target.location, "https://files.example/weird_name.exe");
    }

    #[tokio::test]
    async fn test_python_version_must_match() {
        let index = FakeIndex::new(Answer::Releases(flask_common()));
        let key = ArtifactKey::new("py2", "f", "Flask-Common", "Flask-Common-0.2.0.tar.gz");

        let err = resolver(&index).resolve(&key).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound(NotFoundReason::NoFile));
    }

    #[tokio::test]
    async fn test_signatures() {
        let index = FakeIndex::new(Answer::Releases(flask_common()));
        let resolver = resolver(&index);

        let key = ArtifactKey::new("source", "f", "Flask-Common", "Flask-Common-0.2.0.tar.gz.asc");
        let target = resolver.resolve(&key).await.unwrap();
        assert_eq!(
            target.location,
            "https://files.example/fc/Flask-Common-0.2.0.tar.gz.asc"
        );

        let key = ArtifactKey::new(
            "py3",
            "f",
            "Flask-Common",
            "Flask_Common-0.2.0-py3-none-any.whl.asc",
        );
        let err = resolver.resolve(&key).await.unwrap_err();
        assert_eq!(err, ResolveError::NotFound(NotFoundReason::MissingSignature));
        assert_eq!(err.to_string(), "not found: missing signature file");
    }

    #[tokio::test]
    async fn test_upstream_statuses() {
        let key = ArtifactKey::new("source", "f", "Flask-Common", "Flask-Common-0.2.0.tar.gz");

        for (answer, expected) in [
            (
                Answer::Status(StatusCode::NOT_FOUND),
                ResolveError::ClientRejected(StatusCode::NOT_FOUND),
            ),
            (
                Answer::Status(StatusCode::GONE),
                ResolveError::ClientRejected(StatusCode::GONE),
            ),
            (
                Answer::Status(StatusCode::BAD_GATEWAY),
                ResolveError::UpstreamUnavailable,
            ),
            (
                Answer::Status(StatusCode::INTERNAL_SERVER_ERROR),
                ResolveError::UpstreamUnavailable,
            ),
            // a redirect from the index is not expected and fails closed
            (
                Answer::Status(StatusCode::MOVED_PERMANENTLY),
                ResolveError::UpstreamUnavailable,
            ),
            (Answer::Fail, ResolveError::UpstreamUnavailable),
        ] {
            let index = FakeIndex::new(answer);
            let err = resolver(&index).resolve(&key).await.unwrap_err();
            assert_eq!(err, expected);
        }
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let mut releases = ProjectReleases::default();
        releases.releases.insert(
            "1.0".into(),
            vec![ReleaseFile::new(
                "spam-1.0.tar.gz",
                "source",
                "https://files.example/first",
                false,
            )],
        );
        releases.releases.insert(
            "1.0.0".into(),
            vec![ReleaseFile::new(
                "spam-1.0.0.tar.gz",
                "source",
                "https://files.example/second",
                false,
            )],
        );
        let index = FakeIndex::new(Answer::Releases(releases));

        let key = ArtifactKey::new("source", "s", "spam", "spam-1.tar.gz");
        let target = resolver(&index).resolve(&key).await.unwrap();
        assert_eq!(target.location, "https://files.example/first");
    }
}
