use std::str::FromStr;
use streamcap_core::WorkerId;
use thiserror::Error;

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Download { channel: String, title: String },
    /// `dl` without a channel: ask for channel and title interactively
    DownloadPrompt,
    List,
    History,
    Stop(WorkerId),
    Kill(WorkerId),
    Help,
    Quit,
    /// Blank input
    Nothing,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Usage: {0} <id>")]
    MissingId(String),

    #[error("Invalid stream ID: {0}")]
    InvalidId(String),

    #[error("Unknown command: {0} (type 'help' for a list of commands)")]
    Unknown(String),
}

pub const HELP: &[&str] = &[
    "Commands:",
    "  dl [channel] [title]   start capturing a channel, asks when no channel is given",
    "                         (aliases: download, start, get, gimme)",
    "  list                   list running captures (aliases: downloads, downloading)",
    "  history                list every capture started this session (alias: listraw)",
    "  stop <id>              stop a capture gracefully (alias: end)",
    "  kill <id>              kill a capture immediately (alias: diaf)",
    "  help                   show this help",
    "  quit                   stop all captures and exit (aliases: q, exit)",
];

fn parse_id(verb: &str, arg: Option<&str>) -> Result<WorkerId, CommandError> {
    let arg = arg.ok_or_else(|| CommandError::MissingId(verb.to_string()))?;
    arg.parse()
        .map_err(|_| CommandError::InvalidId(arg.to_string()))
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(Command::Nothing);
        };

        match verb.to_lowercase().as_str() {
            "dl" | "download" | "start" | "get" | "gimme" => {
                let Some(channel) = words.next() else {
                    return Ok(Command::DownloadPrompt);
                };
                let title = words.collect::<Vec<_>>().join(" ");
                Ok(Command::Download {
                    channel: channel.to_string(),
                    title,
                })
            }
            "list" | "downloads" | "downloading" => Ok(Command::List),
            "history" | "listraw" => Ok(Command::History),
            "stop" | "end" => parse_id(verb, words.next()).map(Command::Stop),
            "kill" | "diaf" => parse_id(verb, words.next()).map(Command::Kill),
            "help" => Ok(Command::Help),
            "q" | "quit" | "exit" => Ok(Command::Quit),
            _ => Err(CommandError::Unknown(verb.to_string())),
        }
    }
}
