//! Core types for the SGX-LKL device plugin.
//!
//! This crate holds everything that does not speak gRPC:
//! - [`device`]: capability probe and the fixed device inventory
//! - [`signal`]: the one-shot stop signal shared by watch streams
//! - [`config`]: Figment-based configuration
//! - [`error`]: the plugin error type
//! - [`limits`]: fixed names, paths and timeouts

pub mod config;
pub mod device;
pub mod error;
pub mod limits;
pub mod signal;

pub use config::PluginConfig;
pub use device::{probe, Device, Health, Inventory};
pub use error::{ErrorKind, PluginError, PluginResult};
pub use signal::StopSignal;
