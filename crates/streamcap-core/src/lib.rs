//! Streamcap Core - supervision of long-running stream capture processes
//!
//! This crate provides the worker registry, the per-channel worker state
//! machine, the supervisor used by the control side, and the platform-independent
//! process traits implemented by the platform crates.

pub mod config;
pub mod error;
pub mod process;
pub mod registry;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::*;
pub use error::*;
pub use process::*;
pub use registry::*;
pub use supervisor::*;
pub use worker::*;
