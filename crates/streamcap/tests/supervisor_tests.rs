#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use streamcap::{
    CaptureConfig, CaptureInvocation, Console, ProcessError, ProcessLauncher, RecordStatus,
    RestartConfig, StreamcapError, Supervisor, WorkerStatus, platform_supervisor,
};
use streamcap_unix::UnixCaptureProcess;
use tokio::process::Command;

/// Runs a shell script in place of the capture tool
struct ShellLauncher {
    script: String,
}

impl ShellLauncher {
    fn new(script: &str) -> Self {
        Self {
            script: script.to_string(),
        }
    }
}

impl ProcessLauncher for ShellLauncher {
    type Process = UnixCaptureProcess;

    fn launch(&self, invocation: &CaptureInvocation) -> Result<UnixCaptureProcess, ProcessError> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(&self.script);
        UnixCaptureProcess::spawn(command, invocation)
    }
}

fn test_config() -> CaptureConfig {
    CaptureConfig {
        inherit_output: false,
        shutdown_poll_ms: 20,
        shutdown_grace_ms: 2_000,
        ..CaptureConfig::default()
    }
}

fn shell_supervisor(script: &str) -> Supervisor<ShellLauncher> {
    Supervisor::new(test_config(), ShellLauncher::new(script))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 5s");
}

#[tokio::test]
async fn test_stop_ends_capture_and_is_reaped() {
    let supervisor = shell_supervisor("sleep 30");
    let worker = supervisor.download("alice", "Morning Show").unwrap();

    eventually(|| supervisor.list().len() == 1).await;
    let id = worker.id().unwrap();
    assert_eq!(supervisor.history()[&id].status, RecordStatus::Running);

    supervisor.stop(id).unwrap();
    eventually(|| supervisor.list().is_empty()).await;

    let record = &supervisor.history()[&id];
    assert_eq!(record.status, RecordStatus::Ended);
    assert!(record.end_time.unwrap() >= record.start_time);

    eventually(|| worker.status() == WorkerStatus::Ended).await;
    assert_eq!(supervisor.reap_zombies().await, 1);
    assert_eq!(supervisor.reap_zombies().await, 0);
}

#[tokio::test]
async fn test_kill_ends_capture_that_ignores_stop() {
    let supervisor = shell_supervisor("trap '' TERM; while true; do sleep 1; done");
    let worker = supervisor.download("bob", "").unwrap();

    eventually(|| worker.id().is_some()).await;
    let id = worker.id().unwrap();
    // let the shell install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    supervisor.stop(id).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.list().len(), 1);

    supervisor.kill(id).unwrap();
    eventually(|| supervisor.list().is_empty()).await;
    assert_eq!(supervisor.history()[&id].status, RecordStatus::Ended);
    assert_eq!(worker.title(), "untitled");
}

#[tokio::test]
async fn test_natural_exit_deregisters() {
    let supervisor = shell_supervisor("exit 0");
    let worker = supervisor.download("carol", "short").unwrap();

    eventually(|| worker.status() == WorkerStatus::Ended).await;
    eventually(|| supervisor.list().is_empty()).await;

    let history = supervisor.history();
    assert_eq!(history.len(), 1);
    assert!(history.values().all(|record| !record.is_running()));
    assert!(matches!(
        supervisor.stop(worker.id().unwrap()),
        Err(e) if e.is_not_found()
    ));
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let supervisor = shell_supervisor("sleep 30");
    let workers: Vec<_> = (0..5)
        .map(|i| supervisor.download(&format!("channel{i}"), "").unwrap())
        .collect();
    eventually(|| supervisor.list().len() == 5).await;

    tokio::time::timeout(Duration::from_secs(10), supervisor.shutdown())
        .await
        .expect("shutdown should finish");

    assert!(supervisor.list().is_empty());
    assert_eq!(supervisor.history().len(), 5);
    assert!(workers.iter().all(|w| w.status() == WorkerStatus::Ended));
    assert_eq!(supervisor.reap_zombies().await, 0);
}

#[tokio::test]
async fn test_restarting_capture_until_stopped() {
    let config = CaptureConfig {
        restart: RestartConfig {
            min_delay_ms: 10,
            max_delay_ms: 20,
            ..RestartConfig::until_stopped()
        },
        ..test_config()
    };
    let supervisor = Supervisor::new(config, ShellLauncher::new("sleep 0.05"));
    let worker = supervisor.download("dave", "marathon").unwrap();

    eventually(|| supervisor.history().len() >= 3).await;
    assert!(
        supervisor
            .history()
            .values()
            .all(|record| record.channel == "dave")
    );

    worker.stop();
    eventually(|| worker.status() == WorkerStatus::Ended).await;
    eventually(|| supervisor.list().is_empty()).await;

    let count = supervisor.history().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(supervisor.history().len(), count);

    supervisor.shutdown().await;
    assert!(supervisor.history().values().all(|r| !r.is_running()));
}

#[tokio::test]
async fn test_console_session() {
    let supervisor = Arc::new(shell_supervisor("sleep 30"));
    let console = Console::new(Arc::clone(&supervisor));

    let reply = console.handle_line("dl alice Late Show").await;
    assert_eq!(reply.lines, vec!["Starting capture: alice - Late Show"]);

    eventually(|| supervisor.list().len() == 1).await;
    let reply = console.handle_line("list").await;
    assert_eq!(reply.lines.len(), 2);
    assert!(reply.lines[1].starts_with("Stream 0: alice - Late Show (started at "));

    let reply = console.handle_line("stop 42").await;
    assert_eq!(reply.lines, vec!["No stream with ID 42 exists"]);

    let reply = console.handle_line("kill 0").await;
    assert_eq!(reply.lines, vec!["Killing stream 0"]);
    eventually(|| supervisor.list().is_empty()).await;

    let reply = console.handle_line("history").await;
    assert!(reply.lines[1].starts_with("[ended      ] Stream 0: alice - Late Show"));
    assert!(reply.lines[1].contains("(ended at "));

    let reply = console.handle_line("frobnicate").await;
    assert!(reply.lines[0].starts_with("Unknown command: frobnicate"));

    let reply = console.handle_line("quit").await;
    assert!(reply.quit);
    supervisor.shutdown().await;
}

#[tokio::test]
async fn test_console_download_dialog() {
    use streamcap::console::{CHANNEL_PROMPT, TITLE_PROMPT, UNTITLED_PROMPT};

    let supervisor = Arc::new(shell_supervisor("sleep 30"));
    let console = Console::new(Arc::clone(&supervisor));

    assert_eq!(console.handle_line("dl").await.prompt, Some(CHANNEL_PROMPT));
    assert_eq!(console.handle_line("alice").await.prompt, Some(TITLE_PROMPT));
    assert_eq!(console.handle_line("  ").await.prompt, Some(UNTITLED_PROMPT));
    // "n" asks for a title again
    assert_eq!(console.handle_line("N").await.prompt, Some(TITLE_PROMPT));
    assert_eq!(console.handle_line("").await.prompt, Some(UNTITLED_PROMPT));

    let reply = console.handle_line("whatever").await;
    assert_eq!(reply.prompt, None);
    assert_eq!(reply.lines, vec!["Starting capture: alice - untitled"]);

    console.handle_line("gimme").await;
    console.handle_line("bob").await;
    let reply = console.handle_line("Night Show").await;
    assert_eq!(reply.lines, vec!["Starting capture: bob - Night Show"]);

    console.handle_line("dl").await;
    let reply = console.handle_line("").await;
    assert_eq!(reply.lines, vec!["No channel given, nothing downloaded"]);

    // back at the command prompt
    let reply = console.handle_line("list").await;
    assert_eq!(reply.prompt, None);
    eventually(|| supervisor.list().len() == 2).await;

    supervisor.shutdown().await;
    assert_eq!(supervisor.history().len(), 2);
}

#[tokio::test]
async fn test_platform_launcher_creates_output_dir() {
    let output_dir = std::env::temp_dir().join(format!("streamcap-test-{}", std::process::id()));
    let config = CaptureConfig {
        program: "echo".to_string(),
        output_dir: output_dir.clone(),
        ..test_config()
    };
    let supervisor = platform_supervisor(config).unwrap();
    let worker = supervisor.download("erin", "").unwrap();

    eventually(|| worker.status() == WorkerStatus::Ended).await;
    assert!(output_dir.is_dir());
    let record = supervisor.history().into_values().next().unwrap();
    assert!(record.output_path.starts_with(&output_dir));
    assert_eq!(
        record.output_path.extension().and_then(|e| e.to_str()),
        Some("ts")
    );

    supervisor.shutdown().await;
    let _ = std::fs::remove_dir_all(&output_dir);
}

#[tokio::test]
async fn test_platform_supervisor_rejects_invalid_config() {
    let config = CaptureConfig {
        program: "  ".to_string(),
        ..CaptureConfig::default()
    };
    assert!(matches!(
        platform_supervisor(config),
        Err(StreamcapError::Configuration(message)) if message.contains("program")
    ));
}
