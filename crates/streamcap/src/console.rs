use crate::command::{Command, HELP};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use streamcap_core::{
    ProcessLauncher, StreamcapError, Supervisor, WorkerId, WorkerRecord, format_timestamp,
};
use tracing::debug;

pub const CHANNEL_PROMPT: &str = "Channel: ";
pub const TITLE_PROMPT: &str = "Title: ";
pub const UNTITLED_PROMPT: &str =
    "No title specified, do you want to download it untitled? (Y/N): ";

/// Output of one console command
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    pub lines: Vec<String>,
    pub quit: bool,
    /// Question to show instead of the command prompt
    pub prompt: Option<&'static str>,
}

impl Reply {
    fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            ..Self::default()
        }
    }

    fn ask(prompt: &'static str) -> Self {
        Self {
            prompt: Some(prompt),
            ..Self::default()
        }
    }
}

/// Progress of an interactive `dl` without arguments
#[derive(Debug, Default)]
enum Dialog {
    #[default]
    Idle,
    Channel,
    Title { channel: String },
    ConfirmUntitled { channel: String },
}

/// Runs console commands against a supervisor and renders their output as text
pub struct Console<L: ProcessLauncher> {
    supervisor: Arc<Supervisor<L>>,
    dialog: Mutex<Dialog>,
}

impl<L: ProcessLauncher> Console<L> {
    pub fn new(supervisor: Arc<Supervisor<L>>) -> Self {
        Self {
            supervisor,
            dialog: Mutex::new(Dialog::Idle),
        }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor<L>> {
        &self.supervisor
    }

    /// Parse and run one input line; parse errors become a single output line.
    ///
    /// While a `dl` dialog is open the line answers its current question.
    pub async fn handle_line(&self, line: &str) -> Reply {
        let dialog = std::mem::take(&mut *self.dialog());
        if !matches!(dialog, Dialog::Idle) {
            let reply = self.answer(dialog, line.trim());
            self.supervisor.reap_zombies().await;
            return reply;
        }

        match line.parse::<Command>() {
            Ok(command) => self.execute(command).await,
            Err(e) => Reply::line(e.to_string()),
        }
    }

    pub async fn execute(&self, command: Command) -> Reply {
        debug!(?command, "Executing console command");

        let reply = match command {
            Command::Download { channel, title } => self.download(&channel, &title),
            Command::DownloadPrompt => {
                *self.dialog() = Dialog::Channel;
                Reply::ask(CHANNEL_PROMPT)
            }
            Command::List => self.list(),
            Command::History => self.history(),
            Command::Stop(id) => self.signal(id, self.supervisor.stop(id), "Stopping"),
            Command::Kill(id) => self.signal(id, self.supervisor.kill(id), "Killing"),
            Command::Help => Reply {
                lines: HELP.iter().map(|line| line.to_string()).collect(),
                ..Reply::default()
            },
            Command::Quit => Reply {
                lines: vec!["Stopping all captures...".to_string()],
                quit: true,
                prompt: None,
            },
            Command::Nothing => Reply::default(),
        };

        self.supervisor.reap_zombies().await;
        reply
    }

    fn dialog(&self) -> MutexGuard<'_, Dialog> {
        self.dialog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(&self, dialog: Dialog, answer: &str) -> Reply {
        let (next, reply) = match dialog {
            Dialog::Idle => (Dialog::Idle, Reply::default()),
            Dialog::Channel if answer.is_empty() => {
                (Dialog::Idle, Reply::line("No channel given, nothing downloaded"))
            }
            Dialog::Channel => (
                Dialog::Title {
                    channel: answer.to_string(),
                },
                Reply::ask(TITLE_PROMPT),
            ),
            Dialog::Title { channel } if answer.is_empty() => {
                (Dialog::ConfirmUntitled { channel }, Reply::ask(UNTITLED_PROMPT))
            }
            Dialog::Title { channel } => (Dialog::Idle, self.download(&channel, answer)),
            // only an explicit "n" goes back to asking for a title
            Dialog::ConfirmUntitled { channel } if answer.eq_ignore_ascii_case("n") => {
                (Dialog::Title { channel }, Reply::ask(TITLE_PROMPT))
            }
            Dialog::ConfirmUntitled { channel } => (Dialog::Idle, self.download(&channel, "")),
        };

        *self.dialog() = next;
        reply
    }

    fn download(&self, channel: &str, title: &str) -> Reply {
        match self.supervisor.download(channel, title) {
            Ok(worker) => Reply::line(format!(
                "Starting capture: {} - {}",
                worker.channel(),
                worker.title()
            )),
            Err(e) => Reply::line(e.to_string()),
        }
    }

    fn list(&self) -> Reply {
        let active = self.supervisor.list();
        if active.is_empty() {
            return Reply::line("No streams are currently downloading");
        }

        // start time comes from the history record so restarts show their own start
        let history = self.supervisor.history();
        let mut lines = vec!["Currently downloading:".to_string()];
        for (id, worker) in active {
            let started = history
                .get(&id)
                .map(|record| record.start_time)
                .or_else(|| worker.started_at())
                .map(format_timestamp)
                .unwrap_or_default();
            lines.push(format!(
                "Stream {}: {} - {} (started at {})",
                id,
                worker.channel(),
                worker.title(),
                started
            ));
        }

        Reply {
            lines,
            ..Reply::default()
        }
    }

    fn history(&self) -> Reply {
        let history = self.supervisor.history();
        if history.is_empty() {
            return Reply::line("No streams have been downloaded yet");
        }

        let mut lines = vec!["Download history:".to_string()];
        lines.extend(history.values().map(history_row));
        Reply {
            lines,
            ..Reply::default()
        }
    }

    fn signal(&self, id: WorkerId, result: Result<(), StreamcapError>, verb: &str) -> Reply {
        match result {
            Ok(()) => Reply::line(format!("{verb} stream {id}")),
            Err(e) if e.is_not_found() => Reply::line(format!("No stream with ID {id} exists")),
            Err(e) => Reply::line(e.to_string()),
        }
    }
}

fn history_row(record: &WorkerRecord) -> String {
    let status = if record.is_running() {
        "[downloading]"
    } else {
        "[ended      ]"
    };
    let ended = record
        .end_time
        .map(|end| format!(" (ended at {})", format_timestamp(end)))
        .unwrap_or_default();

    format!(
        "{} Stream {}: {} - {} (started at {}){}",
        status,
        record.id,
        record.channel,
        record.title,
        format_timestamp(record.start_time),
        ended
    )
}
