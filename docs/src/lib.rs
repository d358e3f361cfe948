//! Documentation hosting: serves project docs out of the bucket, or
//! redirects projects listed in the bucket's redirect table to their
//! external host.
pub mod content;
pub mod metrics_defs;
pub mod redirect_table;
pub mod refresher;
pub mod server;
pub mod stream;
