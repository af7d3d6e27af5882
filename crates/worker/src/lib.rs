pub mod converters;
pub mod cycle;
pub mod discovery;
pub mod notify;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub use crate::converters::{default_converters, BrokerConverter};
pub use crate::cycle::{CycleReport, FileOutcome, Worker};
pub use crate::notify::{LogNotifier, MailMessage, Notifier, OutboxNotifier};

/// Production reads and writes the tracking table; test converts everything
/// it finds and leaves the table alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RunMode {
    Production,
    #[default]
    Test,
}

/// Runs cycles until Ctrl-C, sleeping `interval` between them. With `once`
/// a single cycle runs and its error, if any, is returned.
pub async fn run(worker: Arc<Worker>, interval: Duration, once: bool) -> Result<()> {
    let (tx, shutdown) = watch::channel(false);
    // Listening starts before the first cycle so a Ctrl-C during a cycle is kept.
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                let _ = tx.send(true);
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for Ctrl-C"),
        }
    });
    run_until(worker, interval, once, shutdown).await
}

/// Same loop as [`run`], stopping once `shutdown` turns `true`. A cycle in
/// progress always finishes first.
pub async fn run_until(
    worker: Arc<Worker>,
    interval: Duration,
    once: bool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let w = Arc::clone(&worker);
        let joined = tokio::task::spawn_blocking(move || w.run_cycle()).await;

        match joined {
            Ok(Ok(report)) => tracing::info!(
                succeeded = report.succeeded(),
                failed = report.failed(),
                "cycle finished"
            ),
            Ok(Err(e)) if once => return Err(e),
            Ok(Err(e)) => tracing::error!(error = %format!("{:#}", e), "cycle failed"),
            Err(e) if once => return Err(anyhow::Error::new(e).context("Conversion cycle panicked")),
            Err(e) => tracing::error!(error = %e, "conversion cycle panicked"),
        }

        if once || *shutdown.borrow() {
            return Ok(());
        }

        tokio::select! {
            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
