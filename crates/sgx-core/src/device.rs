//! Capability probe and device inventory.
//!
//! The capability is detected by a single `stat` of a fixed path. When it is
//! present the plugin advertises a fixed pool of device ids; the pool size is
//! configuration, not a measurement of enclave capacity.

use crate::error::{PluginError, PluginResult};
use crate::limits::DEVICE_ID_WIDTH;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Check that the capability path exists and can be stat'ed.
///
/// Any failure (missing path, permission denied, ...) is reported as
/// [`PluginError::CapabilityUnavailable`].
pub fn probe(path: &Path) -> PluginResult<()> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|source| PluginError::CapabilityUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

/// Device health as reported to the kubelet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Healthy,
    Unhealthy,
}

impl Health {
    /// Kubelet wire string for this health value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::Unhealthy => "Unhealthy",
        }
    }
}

impl std::fmt::Display for Health {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advertised device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: String,
    pub health: Health,
}

/// Immutable snapshot of the advertised devices, keyed by id.
///
/// Cloning is cheap and shares the underlying map. A new inventory is built
/// for every controller generation; an existing one is never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    devices: Arc<BTreeMap<String, Device>>,
}

impl Inventory {
    /// Build `count` healthy devices with ids `000`, `001`, ...
    pub fn build(count: usize) -> Self {
        let devices = (0..count)
            .map(|i| {
                let id = format!("{:0width$}", i, width = DEVICE_ID_WIDTH);
                let device = Device {
                    id: id.clone(),
                    health: Health::Healthy,
                };
                (id, device)
            })
            .collect();
        Self {
            devices: Arc::new(devices),
        }
    }

    /// Probe the capability and, if present, build the inventory.
    pub fn discover(capability_path: &Path, count: usize) -> PluginResult<Self> {
        probe(capability_path)?;
        let inventory = Self::build(count);
        tracing::debug!(
            path = %capability_path.display(),
            devices = inventory.len(),
            "SGX-LKL capability present"
        );
        Ok(inventory)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Devices in id order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Device ids in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }
}
