//! Registration with the kubelet.
//!
//! One unary `Register` call over the kubelet's unix socket. The channel is
//! dropped as soon as the call returns; the kubelet then dials the plugin
//! endpoint on its own.

use crate::grpc::proto::{registration_client::RegistrationClient, RegisterRequest, VERSION};
use sgx_core::{PluginConfig, PluginError, PluginResult};
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;
use tonic::transport::{Endpoint, Uri};
use tower::service_fn;
use tracing::{info, instrument};

/// Placeholder URI; the connector below ignores it and dials the socket.
const UNIX_SOCKET_URI: &str = "http://[::]:50051";

/// Register `endpoint_name` as the provider of `resource_name`.
///
/// Both the dial and the call are bounded by `timeout`.
#[instrument(skip(timeout), fields(socket = %kubelet_socket.display()))]
pub async fn register(
    kubelet_socket: &Path,
    endpoint_name: &str,
    resource_name: &str,
    timeout: Duration,
) -> PluginResult<()> {
    info!("SGX-LKL device plugin: Register");

    let failure = |reason: String| PluginError::Registration {
        socket: kubelet_socket.to_path_buf(),
        reason,
    };

    let socket = kubelet_socket.to_path_buf();
    let endpoint = Endpoint::from_static(UNIX_SOCKET_URI)
        .connect_timeout(timeout)
        .timeout(timeout);
    let dial = endpoint.connect_with_connector(service_fn(move |_: Uri| {
        UnixStream::connect(socket.clone())
    }));

    let channel = match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(channel)) => channel,
        Ok(Err(e)) => return Err(failure(format!("dial failed: {}", e))),
        Err(_) => return Err(failure(format!("dial timed out after {:?}", timeout))),
    };

    let request = RegisterRequest {
        version: VERSION.to_string(),
        endpoint: endpoint_name.to_string(),
        resource_name: resource_name.to_string(),
        options: None,
    };

    RegistrationClient::new(channel)
        .register(request)
        .await
        .map_err(|status| {
            failure(format!(
                "Register rejected ({:?}): {}",
                status.code(),
                status.message()
            ))
        })?;

    Ok(())
}

/// Register using the socket, endpoint and resource name from `config`.
pub async fn register_with(config: &PluginConfig) -> PluginResult<()> {
    register(
        &config.kubelet_socket,
        &config.endpoint_name,
        &config.resource_name,
        config.registration_timeout,
    )
    .await
}
