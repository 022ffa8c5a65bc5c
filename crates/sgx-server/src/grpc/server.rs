//! Plugin server: owns the unix socket and the background serve task.

use crate::grpc::device_plugin_service::DevicePluginService;
use crate::grpc::proto::device_plugin_server::DevicePluginServer;
use sgx_core::{PluginError, PluginResult};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;
use tracing::{debug, error, warn};

/// Remove a plugin socket. A socket that is already gone is not an error.
pub fn remove_endpoint(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// A bound plugin endpoint with its serve loop running in the background.
///
/// Dropping a `PluginServer` without calling [`PluginServer::shutdown`]
/// aborts the serve task but leaves the socket file behind.
#[derive(Debug)]
pub struct PluginServer {
    endpoint: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PluginServer {
    /// Remove any stale socket, bind `endpoint` and spawn the serve loop.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// socket is bound; a serve loop that later fails reports
    /// [`PluginError::ServeLoop`] on `faults`.
    pub fn bind(
        endpoint: &Path,
        service: DevicePluginService,
        handler_timeout: Duration,
        faults: mpsc::UnboundedSender<PluginError>,
    ) -> PluginResult<Self> {
        let bind_error = |source| PluginError::EndpointBind {
            path: endpoint.to_path_buf(),
            source,
        };

        remove_endpoint(endpoint).map_err(bind_error)?;
        let listener = UnixListener::bind(endpoint).map_err(bind_error)?;
        let incoming = UnixListenerStream::new(listener);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let router = Server::builder()
            .timeout(handler_timeout)
            .add_service(DevicePluginServer::new(service));

        let path = endpoint.to_path_buf();
        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            match router.serve_with_incoming_shutdown(incoming, shutdown).await {
                Ok(()) => debug!(path = %path.display(), "plugin serve loop finished"),
                Err(e) => {
                    error!(path = %path.display(), error = %e, "plugin serve loop failed");
                    let _ = faults.send(PluginError::ServeLoop(e.to_string()));
                }
            }
        });

        Ok(Self {
            endpoint: endpoint.to_path_buf(),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Stop accepting calls and wait up to `timeout` for the serve loop to
    /// drain. A loop that does not finish in time is aborted. When this
    /// returns the listener is closed either way.
    ///
    /// Does not remove the socket file; see [`remove_endpoint`].
    pub async fn shutdown(&mut self, timeout: Duration) -> PluginResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => Err(PluginError::ServeLoop(join_error.to_string())),
            Err(_) => {
                warn!(
                    path = %self.endpoint.display(),
                    ?timeout,
                    "plugin serve loop did not drain in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
                Ok(())
            }
        }
    }
}

impl Drop for PluginServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
