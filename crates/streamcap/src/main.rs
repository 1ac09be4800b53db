//! Streamcap - interactive supervisor for live-stream capture processes.
//!
//! # Usage
//!
//! ```bash
//! # Capture into ./captures with the default tool
//! streamcap --output-dir ./captures
//!
//! # Restart captures that end on their own, with a config file
//! streamcap --config streamcap.json --restart
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use streamcap::{CaptureConfig, Console, RestartConfig, platform_supervisor};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const PROMPT: &str = ">: ";
const REAP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "streamcap")]
#[command(about = "Capture live streams with an external tool and supervise the captures", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory recordings are written to
    #[arg(short, long, env = "STREAMCAP_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Capture tool to run
    #[arg(long, env = "STREAMCAP_PROGRAM")]
    program: Option<String>,

    /// Stream quality passed to the capture tool
    #[arg(short, long, env = "STREAMCAP_QUALITY")]
    quality: Option<String>,

    /// URL prefix the channel name is appended to
    #[arg(long, env = "STREAMCAP_BASE_URL")]
    base_url: Option<String>,

    /// Restart captures that end without being stopped
    #[arg(long)]
    restart: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn capture_config(&self) -> Result<CaptureConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                CaptureConfig::from_json(&json)
                    .with_context(|| format!("Invalid config file {}", path.display()))?
            }
            None => CaptureConfig::default(),
        };

        if let Some(output_dir) = &self.output_dir {
            config.output_dir = output_dir.clone();
        }
        if let Some(program) = &self.program {
            config.program = program.clone();
        }
        if let Some(quality) = &self.quality {
            config.quality = quality.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if self.restart {
            config.restart = RestartConfig::until_stopped();
        }

        Ok(config)
    }
}

/// Log to stderr so records do not interleave with the prompt on stdout
fn init_logging(log_level: &str) -> Result<()> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

async fn prompt(stdout: &mut tokio::io::Stdout, prompt: &str) -> Result<()> {
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Read lines on a plain thread so a pending read never holds up exit
fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<std::io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in reader.lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = cli.capture_config()?;
    let supervisor = Arc::new(platform_supervisor(config)?);
    let console = Console::new(Arc::clone(&supervisor));

    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()));
    let mut stdout = tokio::io::stdout();
    let mut reap_tick = tokio::time::interval(REAP_INTERVAL);

    prompt(&mut stdout, PROMPT).await?;
    loop {
        tokio::select! {
            line = lines.recv() => {
                let line = match line {
                    Some(Ok(line)) => line,
                    None => {
                        info!("End of input");
                        break;
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                };

                let reply = console.handle_line(&line).await;
                for line in &reply.lines {
                    stdout.write_all(format!("{line}\n").as_bytes()).await?;
                }
                if reply.quit {
                    break;
                }
                prompt(&mut stdout, reply.prompt.unwrap_or(PROMPT)).await?;
            }
            _ = reap_tick.tick() => {
                let reaped = supervisor.reap_zombies().await;
                if reaped > 0 {
                    debug!(reaped, "Reaped finished captures while idle");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    stdout.flush().await?;
    supervisor.shutdown().await;
    info!("All captures ended");
    Ok(())
}
