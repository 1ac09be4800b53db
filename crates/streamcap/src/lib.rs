//! Streamcap - supervise stream capture processes from an interactive console
//!
//! The core crate holds the registry, workers and supervisor; this crate picks
//! the platform launcher and adds the command language spoken by the binary.

pub mod command;
pub mod console;
pub mod factory;

pub use command::{Command, CommandError};
pub use console::{Console, Reply};
pub use factory::{PlatformLauncher, PlatformLauncherFactory};

use tracing::info;

/// Supervisor driving the platform's capture launcher
pub type PlatformSupervisor = Supervisor<PlatformLauncher>;

/// Validate `config` and build a supervisor around the platform launcher
pub fn platform_supervisor(config: CaptureConfig) -> Result<PlatformSupervisor, StreamcapError> {
    config
        .validate()
        .map_err(|e| StreamcapError::Configuration(e.to_string()))?;
    info!(
        platform = PlatformLauncherFactory::platform_name(),
        "Selected capture launcher"
    );
    let launcher = PlatformLauncherFactory::create_launcher(&config);
    Ok(Supervisor::new(config, launcher))
}

// Re-export core functionality
pub use streamcap_core::*;
