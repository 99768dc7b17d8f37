//! Stream supervision and process shutdown

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::config::StreamConfig;
use crate::extract::Extractor;
use crate::load::Loader;
use crate::window::Clock;
use crate::worker::StreamWorker;

/// Why the scheduler returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// SIGINT / Ctrl+C
    Interrupted,
    /// SIGTERM
    Terminated,
    /// Every worker ended on its own; `failed` of them with an error
    Completed { failed: usize },
}

impl Shutdown {
    /// Process exit status for this shutdown
    pub fn exit_code(&self) -> i32 {
        match self {
            Shutdown::Interrupted => 130,
            Shutdown::Terminated => 143,
            Shutdown::Completed { failed: 0 } => 0,
            Shutdown::Completed { .. } => 1,
        }
    }
}

/// Runs one worker task per active stream
pub struct Scheduler {
    workers: Vec<StreamWorker>,
}

impl Scheduler {
    pub fn new(workers: Vec<StreamWorker>) -> Self {
        Self { workers }
    }

    /// Build one worker per stream around the shared store and collaborators
    pub fn from_streams(
        streams: Vec<StreamConfig>,
        store: Arc<CheckpointStore>,
        extractor: Arc<dyn Extractor>,
        loader: Arc<dyn Loader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let workers = streams
            .into_iter()
            .map(|stream| {
                StreamWorker::new(
                    stream,
                    store.clone(),
                    extractor.clone(),
                    loader.clone(),
                    clock.clone(),
                )
            })
            .collect();
        Self::new(workers)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run until SIGINT or SIGTERM, or until every worker has stopped
    pub async fn run(self) -> Shutdown {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` resolves, or until every worker has stopped.
    ///
    /// In-flight cycles are not cancelled; their tasks are dropped with the
    /// runtime once the caller exits.
    pub async fn run_until<F>(self, signal: F) -> Shutdown
    where
        F: Future<Output = Shutdown>,
    {
        let handles: Vec<_> = self
            .workers
            .into_iter()
            .map(|worker| {
                let name = worker.stream().name.clone();
                info!(stream = %name, "Starting stream worker");
                (name, tokio::spawn(worker.run()))
            })
            .collect();

        let (names, tasks): (Vec<String>, Vec<_>) = handles.into_iter().unzip();

        tokio::select! {
            shutdown = signal => {
                info!(?shutdown, "Shutdown signal received, stopping");
                shutdown
            }
            results = join_all(tasks) => {
                let mut failed = 0;
                for (name, result) in names.iter().zip(results) {
                    match result {
                        Ok(Ok(())) => info!(stream = %name, "Stream worker finished"),
                        Ok(Err(e)) => {
                            failed += 1;
                            error!(stream = %name, error = %e, "Stream worker failed");
                        }
                        Err(e) => {
                            failed += 1;
                            error!(stream = %name, error = %e, "Stream worker task aborted");
                        }
                    }
                }
                info!(failed, "All stream workers stopped");
                Shutdown::Completed { failed }
            }
        }
    }
}

/// Resolve on SIGINT or SIGTERM
pub async fn shutdown_signal() -> Shutdown {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => Shutdown::Interrupted,
        _ = terminate => Shutdown::Terminated,
    }
}
