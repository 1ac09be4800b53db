//! In-memory processes for lifecycle tests.

use crate::error::ProcessError;
use crate::process::{
    CaptureInvocation, ManagedProcess, ProcessId, ProcessLauncher, ProcessStatus,
    TerminationRequest, TerminationResult,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Test-side remote control for one fake process
pub struct FakeControl {
    exit: watch::Sender<Option<ProcessStatus>>,
    ignore_graceful: bool,
    signals: Mutex<Vec<TerminationRequest>>,
    invocation: CaptureInvocation,
}

impl FakeControl {
    pub fn finish(&self, status: ProcessStatus) {
        self.exit.send_replace(Some(status));
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    pub fn signals(&self) -> Vec<TerminationRequest> {
        self.signals.lock().unwrap().clone()
    }

    pub fn invocation(&self) -> &CaptureInvocation {
        &self.invocation
    }
}

pub struct FakeProcess {
    control: Arc<FakeControl>,
    exit: watch::Receiver<Option<ProcessStatus>>,
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn pid(&self) -> Option<ProcessId> {
        Some(4242)
    }

    fn terminate_gracefully(&mut self) -> TerminationResult {
        self.control
            .signals
            .lock()
            .unwrap()
            .push(TerminationRequest::Graceful);
        if self.control.has_exited() {
            return TerminationResult::ProcessNotFound;
        }
        if !self.control.ignore_graceful {
            self.control.finish(ProcessStatus::Terminated);
        }
        TerminationResult::Success
    }

    fn force_kill(&mut self) -> TerminationResult {
        self.control
            .signals
            .lock()
            .unwrap()
            .push(TerminationRequest::Forced);
        if self.control.has_exited() {
            return TerminationResult::ProcessNotFound;
        }
        self.control.finish(ProcessStatus::Terminated);
        TerminationResult::Success
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let exited = self.exit.wait_for(Option::is_some).await;
        let status = match exited {
            Ok(status) => *status,
            Err(_) => None,
        };
        status.ok_or_else(|| ProcessError::WaitFailed(std::io::Error::other("fake process dropped")))
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    launches: Mutex<Vec<Arc<FakeControl>>>,
    fail: bool,
    ignore_graceful: bool,
    exit_immediately: bool,
}

impl FakeLauncher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn ignoring_graceful() -> Self {
        Self {
            ignore_graceful: true,
            ..Self::default()
        }
    }

    pub fn exiting_immediately() -> Self {
        Self {
            exit_immediately: true,
            ..Self::default()
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn process(&self, index: usize) -> Arc<FakeControl> {
        self.launches.lock().unwrap()[index].clone()
    }

    pub fn processes(&self) -> Vec<Arc<FakeControl>> {
        self.launches.lock().unwrap().clone()
    }
}

impl ProcessLauncher for FakeLauncher {
    type Process = FakeProcess;

    fn launch(&self, invocation: &CaptureInvocation) -> Result<FakeProcess, ProcessError> {
        if self.fail {
            return Err(ProcessError::SpawnFailed {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        let initial = self.exit_immediately.then_some(ProcessStatus::Success);
        let (exit, receiver) = watch::channel(initial);
        let control = Arc::new(FakeControl {
            exit,
            ignore_graceful: self.ignore_graceful,
            signals: Mutex::new(Vec::new()),
            invocation: invocation.clone(),
        });
        self.launches.lock().unwrap().push(control.clone());

        Ok(FakeProcess {
            control,
            exit: receiver,
        })
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within two seconds");
}
