//! Edge service in front of a package index and a documentation bucket.
//!
//! Artifact requests are answered with redirects to the index's canonical
//! download URLs. Documentation is streamed from the bucket, or redirected to
//! an external host when the project is listed in the bucket's redirect table.
pub mod config;
mod service;
pub mod telemetry;

use config::Config;
use docs::redirect_table::RedirectTable;
use docs::refresher::{RefreshSettings, Refresher};
use docs::server::DocumentationServer;
use packages::index::HttpIndex;
use packages::resolver::ArtifactResolver;
use service::ConveyorService;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const USER_AGENT: &str = "conveyor";

#[derive(thiserror::Error, Debug)]
pub enum ConveyorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),
}

/// Serves both listeners until `shutdown` resolves, then stops the redirect
/// table refresher.
pub async fn run<F>(config: Config, shutdown: F) -> Result<(), ConveyorError>
where
    F: Future<Output = ()>,
{
    let index_client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(config.timeouts.connect())
        .timeout(config.timeouts.index())
        .build()?;
    // No overall timeout here, bodies are streamed. The gateway bounds each read.
    let storage_client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(config.timeouts.connect())
        .build()?;

    let storage =
        storage::get_gateway(&config.storage, storage_client, config.timeouts.storage())?;
    let table = Arc::new(RedirectTable::new());
    let refresher = Refresher::start(
        storage.clone(),
        table.clone(),
        RefreshSettings {
            bucket: config.docs_bucket.clone(),
            key: config.redirects.key.clone(),
            interval: Duration::from_secs(config.redirects.refresh_interval_secs),
            retry_interval: Duration::from_secs(config.redirects.retry_interval_secs),
        },
    );

    let index = HttpIndex::new(index_client, config.endpoint.clone());
    let service = ConveyorService::new(
        ArtifactResolver::new(Arc::new(index)),
        DocumentationServer::new(storage, config.docs_bucket.clone(), table),
    );
    let admin = AdminService::<_, ConveyorError>::new(refresher.ready_probe());

    let (stop_tx, stop_rx) = watch::channel(());
    let stopped = |mut rx: watch::Receiver<()>| async move {
        let _ = rx.changed().await;
    };

    let main_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        service,
        stopped(stop_rx.clone()),
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
        stopped(stop_rx),
    );
    let signal_task = async {
        shutdown.await;
        tracing::info!("Shutting down");
        let _ = stop_tx.send(());
        Ok::<(), ConveyorError>(())
    };

    let result = tokio::try_join!(main_task, admin_task, signal_task);
    refresher.shutdown().await;
    result.map(|_| ())
}
