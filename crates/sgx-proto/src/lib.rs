//! Protocol buffer definitions for the kubelet device-plugin API.
//!
//! This crate contains:
//! - Generated protobuf types and gRPC stubs from `proto/api.proto`
//! - The API version string announced on registration
//!
//! Both client and server stubs are generated for both services: the plugin
//! serves `DevicePlugin` and calls `Registration`, while tests play the
//! kubelet side.

#![allow(missing_docs)] // Generated code doesn't have docs

/// Generated device-plugin v1beta1 types.
pub mod v1beta1 {
    tonic::include_proto!("v1beta1");

    /// API version the plugin announces when registering.
    pub const VERSION: &str = "v1beta1";
}

// Re-export commonly used types at crate root
pub use v1beta1::*;
