use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use streamcap_core::{
    CaptureConfig, CaptureInvocation, ManagedProcess, ProcessError, ProcessId, ProcessLauncher,
    ProcessStatus, TerminationResult,
};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid as NixPid;

/// Capture tool process running in its own process group
pub struct UnixCaptureProcess {
    child: Child,
    program: String,
}

impl UnixCaptureProcess {
    /// Spawn `command` detached from our stdin, with stdout/stderr inherited or
    /// discarded as the invocation asks.
    pub fn spawn(mut command: Command, invocation: &CaptureInvocation) -> Result<Self, ProcessError> {
        let program = command
            .as_std()
            .get_program()
            .to_string_lossy()
            .into_owned();

        let (stdout, stderr) = if invocation.inherit_output {
            (Stdio::inherit(), Stdio::inherit())
        } else {
            (Stdio::null(), Stdio::null())
        };

        command
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);

        // New process group so signals reach the tool's own children too
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| ProcessError::SpawnFailed {
            program: program.clone(),
            source,
        })?;

        if let Some(pid) = child.id() {
            info!(%program, pid, "Spawned capture process");
        }

        Ok(Self { child, program })
    }

    #[cfg(unix)]
    fn signal_group(&mut self, signal: Signal) -> TerminationResult {
        let Some(pid) = self.child.id() else {
            return TerminationResult::ProcessNotFound;
        };
        let pgid = NixPid::from_raw(pid as i32);

        match signal::killpg(pgid, signal) {
            Ok(()) => {
                info!(program = %self.program, ?signal, pgid = pid, "Signalled process group");
                TerminationResult::Success
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pgid = pid, "Process group already gone");
                TerminationResult::ProcessNotFound
            }
            Err(nix::errno::Errno::EPERM) => {
                warn!(?signal, pgid = pid, "Permission denied signalling process group");
                TerminationResult::PermissionDenied
            }
            Err(e) => {
                warn!(?signal, pgid = pid, error = %e, "Failed to signal process group");
                TerminationResult::Failed(format!("{signal:?} failed: {e}"))
            }
        }
    }

    fn kill_child(&mut self) -> TerminationResult {
        if self.child.id().is_none() {
            return TerminationResult::ProcessNotFound;
        }

        match self.child.start_kill() {
            Ok(()) => TerminationResult::Success,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {
                TerminationResult::ProcessNotFound
            }
            Err(e) => TerminationResult::Failed(format!("kill failed: {e}")),
        }
    }
}

#[async_trait]
impl ManagedProcess for UnixCaptureProcess {
    fn pid(&self) -> Option<ProcessId> {
        self.child.id()
    }

    #[cfg(unix)]
    fn terminate_gracefully(&mut self) -> TerminationResult {
        self.signal_group(Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(&mut self) -> TerminationResult {
        // No polite termination outside Unix
        self.kill_child()
    }

    #[cfg(unix)]
    fn force_kill(&mut self) -> TerminationResult {
        match self.signal_group(Signal::SIGKILL) {
            TerminationResult::Success | TerminationResult::ProcessNotFound => {
                TerminationResult::Success
            }
            failed => {
                warn!(result = ?failed, "Group kill failed, killing the process directly");
                self.kill_child()
            }
        }
    }

    #[cfg(not(unix))]
    fn force_kill(&mut self) -> TerminationResult {
        self.kill_child()
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::WaitFailed)?;
        Ok(ProcessStatus::from(status))
    }
}

/// Launches the configured capture tool with `-o <output> <url> <quality>`
pub struct UnixLauncher {
    output_dir: PathBuf,
}

impl UnixLauncher {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
        }
    }

    fn ensure_output_dir(&self, program: &str) -> Result<(), ProcessError> {
        if self.output_dir.as_os_str().is_empty() || self.output_dir.is_dir() {
            return Ok(());
        }

        info!(output_dir = %self.output_dir.display(), "Creating output directory");
        std::fs::create_dir_all(&self.output_dir).map_err(|source| ProcessError::SpawnFailed {
            program: program.to_string(),
            source,
        })
    }
}

impl ProcessLauncher for UnixLauncher {
    type Process = UnixCaptureProcess;

    fn launch(&self, invocation: &CaptureInvocation) -> Result<UnixCaptureProcess, ProcessError> {
        self.ensure_output_dir(&invocation.program)?;

        let mut command = Command::new(&invocation.program);
        command.args(invocation.args());
        debug!(
            program = %invocation.program,
            args = ?invocation.args(),
            "Launching capture tool"
        );

        UnixCaptureProcess::spawn(command, invocation)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Local;
    use std::time::Duration;

    fn invocation(program: &str) -> CaptureInvocation {
        let config = CaptureConfig {
            program: program.to_string(),
            inherit_output: false,
            ..CaptureConfig::default()
        };
        CaptureInvocation::new(&config, "alice", "test", Local::now())
    }

    fn shell(script: &str) -> UnixCaptureProcess {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        UnixCaptureProcess::spawn(command, &invocation("sh")).unwrap()
    }

    #[tokio::test]
    async fn test_natural_exit_status() {
        let mut process = shell("exit 0");
        assert!(process.pid().is_some());
        assert_eq!(process.wait().await.unwrap(), ProcessStatus::Success);

        let mut process = shell("exit 3");
        assert_eq!(process.wait().await.unwrap(), ProcessStatus::Exited(3));
    }

    #[tokio::test]
    async fn test_signal_after_exit_is_not_found() {
        let mut process = shell("exit 0");
        process.wait().await.unwrap();

        assert_eq!(process.pid(), None);
        assert_eq!(
            process.terminate_gracefully(),
            TerminationResult::ProcessNotFound
        );
    }

    #[tokio::test]
    async fn test_graceful_termination() {
        let mut process = shell("sleep 30");
        assert_eq!(process.terminate_gracefully(), TerminationResult::Success);

        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("process should exit after SIGTERM")
            .unwrap();
        assert_eq!(status, ProcessStatus::Terminated);
    }

    #[tokio::test]
    async fn test_force_kill_when_term_is_ignored() {
        let mut process = shell("trap '' TERM; sleep 30");
        // give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(process.terminate_gracefully(), TerminationResult::Success);
        let waited = tokio::time::timeout(Duration::from_millis(300), process.wait()).await;
        assert!(waited.is_err(), "process should ignore SIGTERM");

        assert_eq!(process.force_kill(), TerminationResult::Success);
        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("process should exit after SIGKILL")
            .unwrap();
        assert_eq!(status, ProcessStatus::Terminated);
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let launcher = UnixLauncher::new(&CaptureConfig::default());
        let result = launcher.launch(&invocation("streamcap-no-such-program"));
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_launcher_passes_capture_arguments() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("streamcap-argv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let argv_file = dir.join("argv");
        let stdin_file = dir.join("stdin");

        // stands in for the capture tool: records its argv and whatever stdin holds
        let script = dir.join("capture-tool");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{}'\ncat > '{}'\n",
                argv_file.display(),
                stdin_file.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let config = CaptureConfig {
            program: script.to_string_lossy().into_owned(),
            output_dir: dir.join("recordings"),
            quality: "720p".to_string(),
            inherit_output: false,
            ..CaptureConfig::default()
        };
        let invocation = CaptureInvocation::new(&config, "alice", "Late Show", Local::now());

        let launcher = UnixLauncher::new(&config);
        let mut process = loop {
            match launcher.launch(&invocation) {
                // ETXTBSY while a concurrent test forks with the script still open
                Err(ProcessError::SpawnFailed { source, .. }) if source.raw_os_error() == Some(26) => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                result => break result.unwrap(),
            }
        };
        let status = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .expect("stdin should be closed, not inherited")
            .unwrap();
        assert_eq!(status, ProcessStatus::Success);
        assert!(config.output_dir.is_dir());

        let argv = std::fs::read_to_string(&argv_file).unwrap();
        let argv: Vec<&str> = argv.lines().collect();
        let output = invocation.output_path.to_string_lossy();
        assert_eq!(
            argv,
            vec!["-o", output.as_ref(), "https://www.twitch.tv/alice", "720p"]
        );
        assert_eq!(std::fs::read_to_string(&stdin_file).unwrap(), "");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
