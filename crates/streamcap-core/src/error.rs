use crate::registry::WorkerId;
use thiserror::Error;

/// Lookup failures at the registry boundary
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no active worker with id {0}")]
    NotFound(WorkerId),
}

/// Failures talking to an external capture process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for process: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// Top-level error type for supervisor operations
#[derive(Error, Debug)]
pub enum StreamcapError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("A channel name is required")]
    InvalidChannel,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StreamcapError {
    /// Whether the error came from an id that is not (or no longer) active
    pub fn is_not_found(&self) -> bool {
        matches!(self, StreamcapError::Registry(RegistryError::NotFound(_)))
    }
}
