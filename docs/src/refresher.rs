use crate::metrics_defs::{REDIRECT_TABLE_REFRESHES, REDIRECT_TABLE_SIZE};
use crate::redirect_table::{RedirectTable, RefreshOutcome, refresh_once};
use shared::{counter, gauge};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use storage::StorageGateway;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Clone, Debug)]
pub struct RefreshSettings {
    pub bucket: String,
    pub key: String,
    /// Wait after a completed cycle.
    pub interval: Duration,
    /// Shorter wait used after the table object could not be fetched.
    pub retry_interval: Duration,
}

/// Result of one refresh cycle, as handed back to callers of
/// [`Refresher::refresh`].
#[derive(Clone, Debug, PartialEq)]
pub enum RefreshReport {
    Unchanged,
    Updated { entries: usize },
    Failed(String),
}

#[derive(Debug)]
enum Command {
    // Run a cycle now. Requests arriving while a cycle is running share its report.
    Refresh(oneshot::Sender<RefreshReport>),
    Shutdown,
}

/// Owns the background task that keeps a [`RedirectTable`] in sync with the
/// table object in the bucket.
pub struct Refresher {
    tx: mpsc::Sender<Command>,
    handle: JoinHandle<()>,
    ready: Arc<AtomicBool>,
}

impl Refresher {
    /// Spawns the refresh loop. The first cycle starts immediately.
    pub fn start(
        storage: Arc<dyn StorageGateway>,
        table: Arc<RedirectTable>,
        settings: RefreshSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(64);
        let ready = Arc::new(AtomicBool::new(false));

        let worker = RefreshWorker {
            storage,
            table,
            settings,
            ready: ready.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        Refresher { tx, handle, ready }
    }

    /// True once the first cycle has finished, whatever its outcome. An
    /// empty table is a valid state to serve from.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// A readiness probe that outlives borrows of the refresher.
    pub fn ready_probe(&self) -> impl Fn() -> bool + Send + Sync + 'static {
        let ready = self.ready.clone();
        move || ready.load(Ordering::Relaxed)
    }

    /// Runs a cycle outside the normal schedule and waits for its report.
    /// Returns `None` if the loop has already stopped.
    pub async fn refresh(&self) -> Option<RefreshReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(Command::Refresh(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Stops the loop, abandoning any fetch in progress.
    pub async fn shutdown(self) {
        let _ = self.tx.send(Command::Shutdown).await;
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Redirect table refresher panicked");
        }
    }
}

struct RefreshWorker {
    storage: Arc<dyn StorageGateway>,
    table: Arc<RedirectTable>,
    settings: RefreshSettings,
    ready: Arc<AtomicBool>,
}

impl RefreshWorker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        let mut waiting: Vec<oneshot::Sender<RefreshReport>> = Vec::new();

        loop {
            let cycle = self.cycle();
            tokio::pin!(cycle);

            let (report, wait) = loop {
                tokio::select! {
                    done = &mut cycle => break done,
                    cmd = rx.recv() => match cmd {
                        Some(Command::Refresh(reply)) => waiting.push(reply),
                        Some(Command::Shutdown) | None => {
                            tracing::info!("Redirect table refresher stopped");
                            return;
                        }
                    },
                }
            };

            self.ready.store(true, Ordering::Relaxed);
            for reply in waiting.drain(..) {
                let _ = reply.send(report.clone());
            }

            let sleep = tokio::time::sleep(wait);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    cmd = rx.recv() => match cmd {
                        Some(Command::Refresh(reply)) => {
                            waiting.push(reply);
                            break;
                        }
                        Some(Command::Shutdown) | None => {
                            tracing::info!("Redirect table refresher stopped");
                            return;
                        }
                    },
                }
            }
        }
    }

    /// One fetch-compare-publish pass. Every failure is reported and the
    /// last published table stays in place.
    async fn cycle(&self) -> (RefreshReport, Duration) {
        let settings = &self.settings;
        let current = self.table.snapshot();

        match refresh_once(
            self.storage.as_ref(),
            &settings.bucket,
            &settings.key,
            &current,
        )
        .await
        {
            Ok(RefreshOutcome::Unchanged) => {
                tracing::debug!(key = %settings.key, "Redirect table unchanged");
                counter!(REDIRECT_TABLE_REFRESHES, "outcome" => "unchanged").increment(1);
                (RefreshReport::Unchanged, settings.interval)
            }
            Ok(RefreshOutcome::Updated(snapshot)) => {
                let entries = snapshot.len();
                tracing::info!(
                    key = %settings.key,
                    entries,
                    etag = snapshot.etag().unwrap_or_default(),
                    "Redirect table updated"
                );
                self.table.publish(Arc::new(snapshot));
                counter!(REDIRECT_TABLE_REFRESHES, "outcome" => "updated").increment(1);
                gauge!(REDIRECT_TABLE_SIZE).set(entries as f64);
                (RefreshReport::Updated { entries }, settings.interval)
            }
            Err(e) => {
                let wait = if e.is_fetch_failure() {
                    settings.retry_interval
                } else {
                    settings.interval
                };
                tracing::warn!(
                    key = %settings.key,
                    error = %e,
                    retry_in = ?wait,
                    "Redirect table refresh failed"
                );
                counter!(REDIRECT_TABLE_REFRESHES, "outcome" => "failed").increment(1);
                (RefreshReport::Failed(e.to_string()), wait)
            }
        }
    }
}
