use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Whether a worker starts a fresh capture after its capture tool exits on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RestartPolicy {
    /// Run the capture tool exactly once
    #[default]
    Never,
    /// Keep restarting after natural exits until the worker is stopped or killed
    UntilStopped,
}

/// Configuration for the auto-restart loop of a worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    #[serde(default)]
    pub policy: RestartPolicy,

    /// Delay before the first restart (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Upper bound for the exponentially growing restart delay (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of restarts per worker (0 means unlimited)
    #[serde(default)]
    pub max_restarts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::default(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_restarts: 0,
        }
    }
}

impl RestartConfig {
    /// Restart after every natural exit until stopped
    pub fn until_stopped() -> Self {
        Self {
            policy: RestartPolicy::UntilStopped,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "minDelayMs cannot be greater than maxDelayMs"
            ));
        }

        if self.max_delay_ms > 3_600_000 {
            return Err(anyhow::anyhow!("maxDelayMs should not exceed one hour"));
        }

        Ok(())
    }

    pub fn restarts_enabled(&self) -> bool {
        self.policy == RestartPolicy::UntilStopped
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Fresh sequence of restart delays for one worker.
    ///
    /// The iterator is exhausted once `max_restarts` delays were handed out.
    pub fn backoff(&self) -> ExponentialBackoff {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay())
            .with_max_delay(self.max_delay());

        let max_times = match self.max_restarts {
            0 => usize::MAX,
            n => n as usize,
        };

        builder.with_max_times(max_times).build()
    }
}

/// Main capture configuration shared by every worker of a supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(setter(into))]
pub struct CaptureConfig {
    /// Capture tool executable
    #[serde(default = "default_program")]
    #[builder(default = "default_program()")]
    pub program: String,

    /// Prefix the channel name is appended to when building the source url
    #[serde(default = "default_base_url")]
    #[builder(default = "default_base_url()")]
    pub base_url: String,

    #[serde(default = "default_quality")]
    #[builder(default = "default_quality()")]
    pub quality: String,

    /// Directory recordings are written to (empty means the working directory)
    #[serde(default)]
    #[builder(default)]
    pub output_dir: PathBuf,

    /// Title used for downloads started without one
    #[serde(default = "default_untitled_name")]
    #[builder(default = "default_untitled_name()")]
    pub untitled_name: String,

    #[serde(default = "default_sanitize_titles")]
    #[builder(default = "default_sanitize_titles()")]
    pub sanitize_titles: bool,

    /// Let the capture tool write to our stdout/stderr instead of discarding its output
    #[serde(default = "default_inherit_output")]
    #[builder(default = "default_inherit_output()")]
    pub inherit_output: bool,

    #[serde(default)]
    #[builder(default)]
    pub restart: RestartConfig,

    /// Interval between active-set polls while shutting down (in milliseconds)
    #[serde(default = "default_shutdown_poll_ms")]
    #[builder(default = "default_shutdown_poll_ms()")]
    pub shutdown_poll_ms: u64,

    /// How long a graceful shutdown may take before remaining captures are killed (in milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    #[builder(default = "default_shutdown_grace_ms()")]
    pub shutdown_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            base_url: default_base_url(),
            quality: default_quality(),
            output_dir: PathBuf::new(),
            untitled_name: default_untitled_name(),
            sanitize_titles: default_sanitize_titles(),
            inherit_output: default_inherit_output(),
            restart: RestartConfig::default(),
            shutdown_poll_ms: default_shutdown_poll_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl CaptureConfig {
    pub fn builder() -> CaptureConfigBuilder {
        CaptureConfigBuilder::default()
    }

    /// Parse a JSON document, filling every missing field with its default
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.program.trim().is_empty() {
            return Err(anyhow::anyhow!("program must not be empty"));
        }

        if self.quality.trim().is_empty() {
            return Err(anyhow::anyhow!("quality must not be empty"));
        }

        if self.untitled_name.trim().is_empty() {
            return Err(anyhow::anyhow!("untitledName must not be empty"));
        }

        if self.shutdown_poll_ms == 0 {
            return Err(anyhow::anyhow!("shutdownPollMs must be greater than zero"));
        }

        self.restart.validate()
    }

    pub fn shutdown_poll(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

// Default value functions for serde
fn default_program() -> String {
    "livestreamer".to_string()
}
fn default_base_url() -> String {
    "https://www.twitch.tv/".to_string()
}
fn default_quality() -> String {
    "best".to_string()
}
fn default_untitled_name() -> String {
    "untitled".to_string()
}
fn default_sanitize_titles() -> bool {
    true
}
fn default_inherit_output() -> bool {
    cfg!(debug_assertions)
}
fn default_shutdown_poll_ms() -> u64 {
    250
}
fn default_shutdown_grace_ms() -> u64 {
    10_000
}
fn default_min_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
