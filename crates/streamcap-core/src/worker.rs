//! One capture worker per channel.
//!
//! The worker's task is the only code that touches its capture process. The
//! control side reaches the process through `stop()`/`kill()`, which publish a
//! termination request on a watch channel and clear the keep-running flag; the
//! task delivers the signal the next time it observes the request. This keeps
//! signal delivery safe against a process that already exited (or was never
//! spawned) and means the control side never mutates the registry on the
//! worker's behalf.

use crate::config::CaptureConfig;
use crate::process::{
    CaptureInvocation, ManagedProcess, ProcessHandle, ProcessLauncher, TerminationRequest,
    TerminationResult, display_title,
};
use crate::registry::{Registry, WorkerId};
use backon::ExponentialBackoff;
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a worker.
///
/// `StopRequested` and `KillRequested` are set by the control side and only
/// take effect when the task observes them. `Restarting` covers the back-off
/// between a deregistration and the next attempt. Every path ends in
/// `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Registering,
    Running,
    StopRequested,
    KillRequested,
    /// Deregistered after a natural exit, waiting out the back-off
    Restarting,
    Deregistering,
    Terminated,
}

impl WorkerState {
    pub fn status(self) -> WorkerStatus {
        match self {
            WorkerState::Restarting | WorkerState::Deregistering | WorkerState::Terminated => {
                WorkerStatus::Ended
            }
            _ => WorkerStatus::Running,
        }
    }

    /// The worker has committed to its last deregistration
    pub fn is_final(self) -> bool {
        matches!(self, WorkerState::Deregistering | WorkerState::Terminated)
    }

    fn is_requested(self) -> bool {
        matches!(self, WorkerState::StopRequested | WorkerState::KillRequested)
    }
}

/// Whether a worker still believes it supervises a live capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Ended,
}

struct Lifecycle {
    state: WorkerState,
    id: Option<WorkerId>,
    started_at: Option<DateTime<Local>>,
}

enum AttemptOutcome {
    Exited {
        ended_at: DateTime<Local>,
    },
    WaitFailed {
        ended_at: DateTime<Local>,
    },
    SpawnFailed,
    /// A termination request was pending before anything was spawned
    Cancelled,
}

impl AttemptOutcome {
    fn ended_at(&self) -> Option<DateTime<Local>> {
        match self {
            AttemptOutcome::Exited { ended_at } | AttemptOutcome::WaitFailed { ended_at } => {
                Some(*ended_at)
            }
            AttemptOutcome::SpawnFailed | AttemptOutcome::Cancelled => None,
        }
    }

    fn ended_naturally(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::Exited { .. } | AttemptOutcome::WaitFailed { .. }
        )
    }
}

pub struct Worker<L: ProcessLauncher> {
    channel: String,
    title: String,
    config: Arc<CaptureConfig>,
    launcher: Arc<L>,
    lifecycle: Mutex<Lifecycle>,
    keep_running: CancellationToken,
    requests: watch::Sender<Option<TerminationRequest>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<L: ProcessLauncher> fmt::Debug for Worker<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.lifecycle();
        f.debug_struct("Worker")
            .field("channel", &self.channel)
            .field("title", &self.title)
            .field("state", &lifecycle.state)
            .field("id", &lifecycle.id)
            .finish()
    }
}

impl<L: ProcessLauncher> Worker<L> {
    /// Create a worker in the `Created` state; nothing runs until `start`
    pub fn new(
        channel: impl Into<String>,
        title: &str,
        config: Arc<CaptureConfig>,
        launcher: Arc<L>,
    ) -> Arc<Self> {
        let (requests, _) = watch::channel(None);
        Arc::new(Self {
            channel: channel.into(),
            title: display_title(&config, title),
            config,
            launcher,
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Created,
                id: None,
                started_at: None,
            }),
            keep_running: CancellationToken::new(),
            requests,
            task: Mutex::new(None),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Id of the current (or last) registration
    pub fn id(&self) -> Option<WorkerId> {
        self.lifecycle().id
    }

    /// Start time of the current (or last) capture attempt
    pub fn started_at(&self) -> Option<DateTime<Local>> {
        self.lifecycle().started_at
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle().state
    }

    pub fn status(&self) -> WorkerStatus {
        self.state().status()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker task and return immediately.
    ///
    /// The worker has no id until the task has registered it.
    pub fn start(self: &Arc<Self>, registry: Arc<Registry<Self>>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() || self.state().is_final() {
            warn!(channel = %self.channel, "Worker already started, ignoring");
            return;
        }

        *task = Some(tokio::spawn(supervise(Arc::clone(self), registry)));
    }

    /// Ask the capture process to end gracefully and do not restart it.
    ///
    /// A no-op once the worker has finished.
    pub fn stop(&self) {
        self.request_termination(TerminationRequest::Graceful);
    }

    /// Kill the capture process unconditionally and do not restart it.
    ///
    /// A no-op once the worker has finished.
    pub fn kill(&self) {
        self.request_termination(TerminationRequest::Forced);
    }

    fn request_termination(&self, request: TerminationRequest) {
        let mut lifecycle = self.lifecycle();
        self.keep_running.cancel();

        if lifecycle.state.is_final() {
            debug!(
                channel = %self.channel,
                id = ?lifecycle.id,
                ?request,
                "Worker already finished, nothing to terminate"
            );
            return;
        }

        let next = match (lifecycle.state, request) {
            // no process to signal; the cancelled back-off ends the worker
            (WorkerState::Restarting, _) => WorkerState::Restarting,
            (WorkerState::KillRequested, _) | (_, TerminationRequest::Forced) => {
                WorkerState::KillRequested
            }
            _ => WorkerState::StopRequested,
        };

        let escalated = self.requests.send_if_modified(|pending| {
            if pending.is_none_or(|current| current < request) {
                *pending = Some(request);
                true
            } else {
                false
            }
        });

        if escalated {
            info!(
                channel = %self.channel,
                id = ?lifecycle.id,
                signal = request.signal_name(),
                "Termination requested"
            );
        }
        lifecycle.state = next;
    }

    /// Reclaim the worker task once it has committed to its final deregistration.
    ///
    /// Returns false when there is nothing to reclaim yet (the worker is still
    /// capturing or waiting to restart) or it was already joined.
    pub async fn join(&self) -> bool {
        if !self.state().is_final() {
            return false;
        }

        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return false;
        };

        if let Err(e) = handle.await {
            error!(channel = %self.channel, error = %e, "Worker task failed");
        }
        true
    }

    /// The task has finished and been reclaimed by `join`
    pub fn is_joined(&self) -> bool {
        self.state() == WorkerState::Terminated
            && self
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_none()
    }

    /// Move forward unless the control side already requested termination
    fn advance(&self, next: WorkerState) {
        let mut lifecycle = self.lifecycle();
        if !lifecycle.state.is_requested() {
            lifecycle.state = next;
        }
    }

    fn enter_running(&self, id: WorkerId, started_at: DateTime<Local>) {
        let mut lifecycle = self.lifecycle();
        lifecycle.id = Some(id);
        lifecycle.started_at = Some(started_at);
        if !lifecycle.state.is_requested() {
            lifecycle.state = WorkerState::Running;
        }
    }

    /// Decide, under the lifecycle lock, whether this was the last attempt.
    ///
    /// `stop()`/`kill()` clear the keep-running flag under the same lock, so a
    /// request either lands before this decision (and makes it final) or after
    /// it (and cuts the back-off short or is seen by the next attempt).
    fn conclude_attempt(&self, restart_scheduled: bool) -> bool {
        let mut lifecycle = self.lifecycle();
        let last = !restart_scheduled || self.keep_running.is_cancelled();
        lifecycle.state = if last {
            WorkerState::Deregistering
        } else {
            WorkerState::Restarting
        };
        last
    }

    fn restart_delay(
        &self,
        outcome: &AttemptOutcome,
        backoff: &mut ExponentialBackoff,
    ) -> Option<Duration> {
        if !self.config.restart.restarts_enabled()
            || !outcome.ended_naturally()
            || self.keep_running.is_cancelled()
        {
            return None;
        }

        let delay = backoff.next();
        if delay.is_none() {
            info!(channel = %self.channel, "Restart limit reached");
        }
        delay
    }

    /// One register → spawn → wait → deregister cycle.
    ///
    /// Returns the back-off to wait before the next attempt, if there is one.
    async fn capture_once(
        self: &Arc<Self>,
        registry: &Registry<Self>,
        backoff: &mut ExponentialBackoff,
    ) -> Option<Duration> {
        self.advance(WorkerState::Registering);
        let start_time = Local::now();
        let invocation = CaptureInvocation::new(&self.config, &self.channel, &self.title, start_time);

        let id = registry.add(
            Arc::clone(self),
            &self.channel,
            &self.title,
            &invocation.output_path,
            start_time,
        );
        self.enter_running(id, start_time);
        info!(
            id,
            channel = %self.channel,
            output = %invocation.output_path.display(),
            "Starting capture"
        );

        let outcome = self.run_process(id, &invocation, start_time).await;
        let end_time = outcome.ended_at().unwrap_or(start_time);

        let delay = self.restart_delay(&outcome, backoff);
        let last = self.conclude_attempt(delay.is_some());

        if let Err(e) = registry.remove(id, end_time) {
            // Only this task ever deregisters its ids
            panic!("worker registration {id} vanished before deregistration: {e}");
        }
        info!(id, channel = %self.channel, "Capture deregistered");

        if last { None } else { delay }
    }

    /// Sleep out the restart back-off; false when stop or kill arrived meanwhile
    async fn wait_for_restart(&self, delay: Duration) -> bool {
        info!(
            channel = %self.channel,
            delay_ms = delay.as_millis() as u64,
            "Capture ended, restarting after delay"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.keep_running.cancelled() => {
                debug!(channel = %self.channel, "Restart cancelled");
                false
            }
        }
    }

    async fn run_process(
        &self,
        id: WorkerId,
        invocation: &CaptureInvocation,
        start_time: DateTime<Local>,
    ) -> AttemptOutcome {
        let mut requests = self.requests.subscribe();
        let pending = *requests.borrow_and_update();
        if let Some(request) = pending {
            info!(id, ?request, "Termination already requested, not spawning");
            return AttemptOutcome::Cancelled;
        }

        let process = match self.launcher.launch(invocation) {
            Ok(process) => process,
            Err(e) => {
                error!(id, channel = %self.channel, error = %e, "Failed to start capture");
                return AttemptOutcome::SpawnFailed;
            }
        };

        let mut handle = ProcessHandle::new(process, start_time);
        info!(id, pid = ?handle.pid(), "Capture process running");

        let status = loop {
            tokio::select! {
                status = handle.wait() => break status,
                changed = requests.changed() => {
                    if changed.is_err() {
                        break handle.wait().await;
                    }
                    let request = *requests.borrow_and_update();
                    if let Some(request) = request {
                        deliver(&mut handle, id, request);
                    }
                }
            }
        };

        let ended_at = handle.ended_at().unwrap_or_else(Local::now);
        let duration_secs = handle.duration().map(|d| d.num_seconds());
        match status {
            Ok(status) => {
                info!(id, ?status, ?duration_secs, "Capture process exited");
                AttemptOutcome::Exited { ended_at }
            }
            Err(e) => {
                warn!(id, error = %e, "Waiting for capture process failed, treating it as ended");
                AttemptOutcome::WaitFailed { ended_at }
            }
        }
    }
}

fn deliver<P: ManagedProcess>(
    handle: &mut ProcessHandle<P>,
    id: WorkerId,
    request: TerminationRequest,
) {
    match handle.signal(request) {
        TerminationResult::Success => {
            info!(id, signal = request.signal_name(), "Signal delivered");
        }
        TerminationResult::ProcessNotFound => {
            debug!(id, "Capture process already gone");
        }
        other => {
            warn!(id, signal = request.signal_name(), result = ?other, "Failed to signal capture process");
        }
    }
}

/// Body of a worker task: capture attempts until told not to go again
async fn supervise<L: ProcessLauncher>(worker: Arc<Worker<L>>, registry: Arc<Registry<Worker<L>>>) {
    let mut backoff = worker.config.restart.backoff();

    while let Some(delay) = worker.capture_once(&registry, &mut backoff).await {
        if !worker.wait_for_restart(delay).await {
            break;
        }
    }

    worker.lifecycle().state = WorkerState::Terminated;
    info!(channel = %worker.channel, id = ?worker.id(), "Worker terminated");
}
