//! Resolution of artifact requests to their canonical download URLs.
//!
//! A request names a Python version tag, a bucket letter, a project and a
//! filename. [`resolver::ArtifactResolver`] looks the project up through an
//! [`index::IndexGateway`] and compares filenames using the keys produced by
//! [`filename::normalize_filename`].
pub mod filename;
pub mod index;
pub mod metrics_defs;
pub mod resolver;
