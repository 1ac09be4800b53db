use crate::config::CaptureConfig;
use crate::error::ProcessError;
use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta};
use std::path::PathBuf;

/// Operating system process identifier
pub type ProcessId = u32;

/// Extension given to every recording
pub const OUTPUT_EXTENSION: &str = "ts";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// How a capture process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process exited with code 0
    Success,
    /// Process exited with a non-zero code
    Exited(i32),
    /// Process was ended by a signal
    Terminated,
}

impl From<std::process::ExitStatus> for ProcessStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        match status.code() {
            Some(0) => ProcessStatus::Success,
            Some(code) => ProcessStatus::Exited(code),
            None => ProcessStatus::Terminated,
        }
    }
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationResult {
    /// Signal was delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    PermissionDenied,
    /// Other error occurred
    Failed(String),
}

/// Termination requested by the control side
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TerminationRequest {
    /// Polite termination (SIGTERM on Unix)
    Graceful,
    /// Unconditional termination (SIGKILL on Unix)
    Forced,
}

impl TerminationRequest {
    pub fn signal_name(&self) -> &'static str {
        match self {
            TerminationRequest::Graceful => "SIGTERM",
            TerminationRequest::Forced => "SIGKILL",
        }
    }
}

/// A running external capture process, owned by exactly one worker task
#[async_trait]
pub trait ManagedProcess: Send + 'static {
    /// Process ID (None once the process has been reaped)
    fn pid(&self) -> Option<ProcessId>;

    /// Ask the process to end (SIGTERM on Unix)
    fn terminate_gracefully(&mut self) -> TerminationResult;

    /// End the process unconditionally (SIGKILL on Unix)
    fn force_kill(&mut self) -> TerminationResult;

    /// Wait for the process to exit.
    ///
    /// Must be cancel safe: the worker drops this future whenever a termination
    /// request arrives and calls it again afterwards.
    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError>;
}

/// Platform-specific way of starting the capture tool
pub trait ProcessLauncher: Send + Sync + 'static {
    type Process: ManagedProcess;

    fn launch(&self, invocation: &CaptureInvocation) -> Result<Self::Process, ProcessError>;
}

/// Factory trait for creating platform-specific launchers
pub trait LauncherFactory {
    /// The type of launcher this factory creates
    type Launcher: ProcessLauncher;

    /// Create a launcher for the current platform
    fn create_launcher(config: &CaptureConfig) -> Self::Launcher;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}

/// State holder for one spawned capture process and its timestamps
pub struct ProcessHandle<P> {
    process: P,
    started_at: DateTime<Local>,
    ended_at: Option<DateTime<Local>>,
}

impl<P: ManagedProcess> ProcessHandle<P> {
    pub fn new(process: P, started_at: DateTime<Local>) -> Self {
        Self {
            process,
            started_at,
            ended_at: None,
        }
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.process.pid()
    }

    pub fn ended_at(&self) -> Option<DateTime<Local>> {
        self.ended_at
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        self.ended_at.map(|end| end - self.started_at)
    }

    /// Deliver a termination request; a process that already ended is left alone
    pub fn signal(&mut self, request: TerminationRequest) -> TerminationResult {
        if self.ended_at.is_some() {
            return TerminationResult::ProcessNotFound;
        }

        match request {
            TerminationRequest::Graceful => self.process.terminate_gracefully(),
            TerminationRequest::Forced => self.process.force_kill(),
        }
    }

    /// Wait for the process to exit and record the end time.
    ///
    /// Cancel safe; `ended_at` is only recorded when the wait completes.
    pub async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let status = self.process.wait().await;
        self.ended_at = Some(Local::now());
        status
    }
}

/// Everything needed to launch the capture tool for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInvocation {
    pub program: String,
    pub output_path: PathBuf,
    pub source_url: String,
    pub quality: String,
    pub inherit_output: bool,
}

impl CaptureInvocation {
    pub fn new(
        config: &CaptureConfig,
        channel: &str,
        title: &str,
        start_time: DateTime<Local>,
    ) -> Self {
        let title = display_title(config, title);
        let title = if config.sanitize_titles {
            sanitize_filename(&title)
        } else {
            title
        };

        let file_name = format!(
            "{} - {} - {}.{}",
            sanitize_filename(channel),
            format_file_timestamp(start_time),
            title,
            OUTPUT_EXTENSION
        );

        Self {
            program: config.program.clone(),
            output_path: config.output_dir.join(file_name),
            source_url: format!("{}{}", config.base_url, channel),
            quality: config.quality.clone(),
            inherit_output: config.inherit_output,
        }
    }

    /// Arguments passed to the capture tool
    pub fn args(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            self.output_path.to_string_lossy().into_owned(),
            self.source_url.clone(),
            self.quality.clone(),
        ]
    }
}

/// Title as shown to the operator; blank titles fall back to the configured name
pub fn display_title(config: &CaptureConfig, title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        config.untitled_name.clone()
    } else {
        title.to_string()
    }
}

/// Replace every character that is unsafe in a file name with an underscore
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') || c.is_whitespace() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Start time as shown in listings
pub fn format_timestamp(time: DateTime<Local>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}

fn format_file_timestamp(time: DateTime<Local>) -> String {
    format_timestamp(time).replace(':', "-")
}
