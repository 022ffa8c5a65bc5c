//! gRPC surface of the device plugin.

pub mod device_plugin_service;
pub mod server;

/// Generated device-plugin protocol types.
pub mod proto {
    pub use sgx_proto::v1beta1::*;
}

pub use device_plugin_service::{list_response, DevicePluginService};
pub use server::{remove_endpoint, PluginServer};
