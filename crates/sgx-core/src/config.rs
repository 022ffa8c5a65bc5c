//! Plugin configuration using Figment
//!
//! Configuration is layered:
//! 1. Built-in defaults (the constants in [`crate::limits`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SGXLKL_`
//!
//! # Example
//! ```no_run
//! use sgx_core::config::PluginConfig;
//!
//! let config = PluginConfig::load(None)?;
//! println!("endpoint: {}", config.endpoint_path().display());
//! # Ok::<(), sgx_core::error::PluginError>(())
//! ```
//!
//! Durations are written in humantime form, e.g. `registration_timeout = "5s"`.

use crate::error::{PluginError, PluginResult};
use crate::limits;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides, e.g. `SGXLKL_DEVICE_COUNT=10`.
pub const ENV_PREFIX: &str = "SGXLKL_";

/// Largest pool addressable with zero-padded ids of the configured width.
const MAX_DEVICE_COUNT: usize = 10usize.pow(limits::DEVICE_ID_WIDTH as u32);

/// Runtime configuration of the device plugin.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// Path probed for the capability and granted to containers.
    pub capability_path: PathBuf,
    /// Number of device ids to advertise.
    pub device_count: usize,
    /// Resource name registered with the kubelet.
    pub resource_name: String,
    /// Directory holding the kubelet and plugin sockets.
    pub plugin_dir: PathBuf,
    /// File name of the plugin socket inside `plugin_dir`.
    pub endpoint_name: String,
    /// Kubelet registration socket.
    pub kubelet_socket: PathBuf,
    #[serde(with = "humantime_serde")]
    pub registration_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub handler_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            capability_path: PathBuf::from(limits::CAPABILITY_PATH),
            device_count: limits::DEVICE_COUNT,
            resource_name: limits::RESOURCE_NAME.to_string(),
            plugin_dir: PathBuf::from(limits::DEVICE_PLUGIN_PATH),
            endpoint_name: limits::PLUGIN_ENDPOINT.to_string(),
            kubelet_socket: PathBuf::from(limits::KUBELET_SOCKET),
            registration_timeout: limits::REGISTRATION_TIMEOUT,
            handler_timeout: limits::HANDLER_TIMEOUT,
            shutdown_timeout: limits::SHUTDOWN_TIMEOUT,
        }
    }
}

impl PluginConfig {
    /// Load configuration from defaults, an optional TOML file and the
    /// environment, then validate it.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> PluginResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(PluginConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(PluginError::config(format!(
                    "config file not found at {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: PluginConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> PluginResult<()> {
        if self.device_count == 0 {
            return Err(PluginError::config("device_count must be at least 1"));
        }
        if self.device_count > MAX_DEVICE_COUNT {
            return Err(PluginError::config(format!(
                "device_count {} exceeds {} ({}-digit device ids)",
                self.device_count,
                MAX_DEVICE_COUNT,
                limits::DEVICE_ID_WIDTH
            )));
        }
        if self.resource_name.trim().is_empty() {
            return Err(PluginError::config("resource_name must not be empty"));
        }
        if self.endpoint_name.is_empty() || self.endpoint_name.contains('/') {
            return Err(PluginError::config(format!(
                "endpoint_name '{}' must be a bare file name",
                self.endpoint_name
            )));
        }
        Ok(())
    }

    /// Full path of the plugin socket.
    pub fn endpoint_path(&self) -> PathBuf {
        self.plugin_dir.join(&self.endpoint_name)
    }
}
