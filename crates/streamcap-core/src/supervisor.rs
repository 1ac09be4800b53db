use crate::config::CaptureConfig;
use crate::error::StreamcapError;
use crate::process::ProcessLauncher;
use crate::registry::{Registry, WorkerId, WorkerRecord};
use crate::worker::Worker;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Control-side entry point: creates workers, queries the registry, and
/// stops, kills and reaps workers by id.
pub struct Supervisor<L: ProcessLauncher> {
    config: Arc<CaptureConfig>,
    launcher: Arc<L>,
    registry: Arc<Registry<Worker<L>>>,
    /// Every started worker that has not been joined yet
    workers: Mutex<Vec<Arc<Worker<L>>>>,
}

impl<L: ProcessLauncher> Supervisor<L> {
    pub fn new(config: CaptureConfig, launcher: L) -> Self {
        info!(
            program = %config.program,
            output_dir = %config.output_dir.display(),
            restart = ?config.restart.policy,
            "Created supervisor"
        );

        Self {
            config: Arc::new(config),
            launcher: Arc::new(launcher),
            registry: Arc::new(Registry::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn registry(&self) -> &Arc<Registry<Worker<L>>> {
        &self.registry
    }

    fn workers(&self) -> MutexGuard<'_, Vec<Arc<Worker<L>>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Workers started by this supervisor that have not been reaped yet,
    /// including ones not registered yet or waiting to restart
    pub fn pending_workers(&self) -> usize {
        self.workers().len()
    }

    /// Start capturing `channel`; the worker registers itself once its task runs
    pub fn download(&self, channel: &str, title: &str) -> Result<Arc<Worker<L>>, StreamcapError> {
        let channel = channel.trim();
        if channel.is_empty() {
            return Err(StreamcapError::InvalidChannel);
        }

        let worker = Worker::new(
            channel,
            title,
            Arc::clone(&self.config),
            Arc::clone(&self.launcher),
        );

        // tracked before its task runs so shutdown never misses it
        let mut workers = self.workers();
        worker.start(Arc::clone(&self.registry));
        workers.push(Arc::clone(&worker));
        drop(workers);

        info!(channel, title = worker.title(), "Download started");
        Ok(worker)
    }

    /// Active workers right now; any of them may finish immediately afterwards
    pub fn list(&self) -> BTreeMap<WorkerId, Arc<Worker<L>>> {
        self.registry.snapshot_active()
    }

    pub fn history(&self) -> BTreeMap<WorkerId, WorkerRecord> {
        self.registry.snapshot_history()
    }

    pub fn stop(&self, id: WorkerId) -> Result<(), StreamcapError> {
        self.registry.get(id)?.stop();
        Ok(())
    }

    pub fn kill(&self, id: WorkerId) -> Result<(), StreamcapError> {
        self.registry.get(id)?.kill();
        Ok(())
    }

    /// Drain the zombie queue and join every worker that has finished for good.
    ///
    /// Returns the number of reclaimed workers.
    pub async fn reap_zombies(&self) -> usize {
        let mut reclaimed = 0;

        for worker in self.registry.drain_zombies() {
            if worker.join().await {
                reclaimed += 1;
            }
        }

        // a worker stopped during its restart back-off ends without queueing
        // itself again
        let finished: Vec<_> = self
            .workers()
            .iter()
            .filter(|worker| worker.state().is_final())
            .cloned()
            .collect();
        for worker in finished {
            if worker.join().await {
                reclaimed += 1;
            }
        }

        self.workers().retain(|worker| !worker.is_joined());

        if reclaimed > 0 {
            debug!(reclaimed, "Reaped finished workers");
        }
        reclaimed
    }

    /// Stop every worker, wait for all of them to end and reap everything.
    ///
    /// Workers still running after the configured grace period are killed.
    pub async fn shutdown(&self) {
        info!(
            active = self.registry.active_len(),
            workers = self.pending_workers(),
            "Shutting down, stopping all captures"
        );

        let deadline = Instant::now() + self.config.shutdown_grace();
        let mut escalated = false;

        loop {
            self.reap_zombies().await;
            let pending: Vec<_> = self.workers().clone();
            if pending.is_empty() {
                break;
            }

            if !escalated && Instant::now() >= deadline {
                warn!(
                    remaining = pending.len(),
                    "Grace period elapsed, killing remaining captures"
                );
                escalated = true;
            }

            // repeated so workers that re-register between polls are caught too
            for worker in pending.iter().filter(|worker| !worker.state().is_final()) {
                if escalated {
                    worker.kill();
                } else {
                    worker.stop();
                }
            }

            tokio::time::sleep(self.config.shutdown_poll()).await;
        }

        info!("Shutdown complete");
    }
}
