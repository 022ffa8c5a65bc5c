//! Device-plugin server for the SGX-LKL capability.
//!
//! - [`grpc`]: the kubelet `DevicePlugin` service and the unix-socket server
//! - [`registration`]: the one-shot `Register` call to the kubelet
//! - [`controller`]: probe, serve and register one plugin generation
//! - [`supervisor`]: the reset loop driven by OS signals

pub mod controller;
pub mod grpc;
pub mod registration;
pub mod supervisor;

pub use controller::{Controller, ControllerState, Lifecycle};
pub use grpc::{DevicePluginService, PluginServer};
pub use supervisor::{controller_supervisor, ControlSignal, ExitReason, Supervisor};
