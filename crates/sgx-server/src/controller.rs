//! Lifecycle controller for one plugin generation.
//!
//! A `Controller` is created per reset cycle. Construction probes the
//! capability and builds the inventory; `run` binds the endpoint, starts
//! serving and registers with the kubelet; `stop` tears all of it down.
//!
//! ```text
//! Unstarted --start--> Starting --bind--> Serving --register--> Registered
//!     ^                                                             |
//!     +--------------------------- Stopping <-------- stop ---------+
//! ```
//!
//! A registration failure stops the controller before the error is
//! returned, so a failed `run` never leaves a socket behind.

use crate::grpc::{remove_endpoint, DevicePluginService, PluginServer};
use crate::registration;
use async_trait::async_trait;
use sgx_core::{Inventory, PluginConfig, PluginError, PluginResult, StopSignal};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unstarted,
    Starting,
    Serving,
    Registered,
    Stopping,
}

/// Operations the reset loop drives. Implemented by [`Controller`]; tests
/// substitute a scripted implementation.
#[async_trait]
pub trait Lifecycle: Send {
    /// Start serving and register with the kubelet.
    async fn run(&mut self) -> PluginResult<()>;

    /// Tear down the endpoint. Calling it on a stopped instance is a no-op.
    async fn stop(&mut self) -> PluginResult<()>;

    /// Wait until the running instance reports a failure that requires a
    /// reset. Never resolves for a healthy instance.
    async fn next_fault(&mut self) -> PluginError;
}

/// Owns the inventory, stop signal and plugin server of one generation.
#[derive(Debug)]
pub struct Controller {
    config: PluginConfig,
    inventory: Inventory,
    stop: StopSignal,
    server: Option<PluginServer>,
    state: ControllerState,
    fault_tx: mpsc::UnboundedSender<PluginError>,
    fault_rx: mpsc::UnboundedReceiver<PluginError>,
}

impl Controller {
    /// Probe the capability and build the inventory.
    ///
    /// Fails with [`PluginError::CapabilityUnavailable`] when the capability
    /// path cannot be stat'ed.
    pub fn new(config: PluginConfig) -> PluginResult<Self> {
        let inventory = Inventory::discover(&config.capability_path, config.device_count)?;
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            inventory,
            stop: StopSignal::new(),
            server: None,
            state: ControllerState::Unstarted,
            fault_tx,
            fault_rx,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn endpoint_path(&self) -> PathBuf {
        self.config.endpoint_path()
    }

    /// Remove the stale socket, bind a new one and spawn the serve loop.
    ///
    /// Starting an already serving controller does nothing.
    pub fn start(&mut self) -> PluginResult<()> {
        info!("SGX-LKL device plugin: Start");
        if self.server.is_some() {
            return Ok(());
        }
        self.state = ControllerState::Starting;

        // A controller restarted after Stop needs a signal its new streams
        // can wait on.
        if self.stop.is_triggered() {
            self.stop = StopSignal::new();
        }

        let endpoint = self.endpoint_path();
        let service = DevicePluginService::new(
            self.inventory.clone(),
            self.stop.clone(),
            &self.config.capability_path,
            self.fault_tx.clone(),
        );

        match PluginServer::bind(
            &endpoint,
            service,
            self.config.handler_timeout,
            self.fault_tx.clone(),
        ) {
            Ok(server) => {
                self.server = Some(server);
                self.state = ControllerState::Serving;
                info!(path = %endpoint.display(), "SGX-LKL device plugin socket path");
                Ok(())
            }
            Err(e) => {
                self.state = ControllerState::Unstarted;
                Err(e)
            }
        }
    }

    /// Register the bound endpoint with the kubelet.
    ///
    /// Fails without dialing the kubelet unless the endpoint is being served.
    pub async fn register(&mut self) -> PluginResult<()> {
        if self.server.is_none() {
            return Err(PluginError::Registration {
                socket: self.config.kubelet_socket.clone(),
                reason: format!("{} is not being served", self.endpoint_path().display()),
            });
        }
        registration::register_with(&self.config).await?;
        self.state = ControllerState::Registered;
        Ok(())
    }

    /// Start, then register. Stops again if registration fails.
    pub async fn run(&mut self) -> PluginResult<()> {
        if let Err(e) = self.start() {
            error!(error = %e, "Could not start device plugin");
            return Err(e);
        }

        if let Err(e) = self.register().await {
            error!(error = %e, "Could not register SGX-LKL device plugin");
            if let Err(stop_err) = self.stop().await {
                warn!(error = %stop_err, "cleanup after failed registration incomplete");
            }
            return Err(e);
        }

        info!(
            resource = %self.config.resource_name,
            devices = self.inventory.len(),
            "SGX-LKL device plugin is running"
        );
        Ok(())
    }

    /// Release watch streams, stop the serve loop and remove the socket.
    ///
    /// Every step runs even if an earlier one fails. Serve-loop errors are
    /// logged; a socket removal error is logged and returned.
    pub async fn stop(&mut self) -> PluginResult<()> {
        info!("SGX-LKL device plugin: Stop");
        let Some(mut server) = self.server.take() else {
            return Ok(());
        };
        self.state = ControllerState::Stopping;

        // Streams must end first or the graceful shutdown would wait on them.
        self.stop.trigger();

        if let Err(e) = server.shutdown(self.config.shutdown_timeout).await {
            warn!(error = %e, "plugin serve loop ended with an error");
        }
        drop(server);

        let endpoint = self.endpoint_path();
        let cleanup = remove_endpoint(&endpoint).map_err(|source| PluginError::EndpointCleanup {
            path: endpoint.clone(),
            source,
        });
        self.state = ControllerState::Unstarted;

        if let Err(e) = &cleanup {
            warn!(error = %e, "plugin endpoint cleanup failed");
        }
        cleanup
    }

    /// Wait for a failure reported by the serve loop or a watch stream.
    pub async fn next_fault(&mut self) -> PluginError {
        match self.fault_rx.recv().await {
            Some(fault) => fault,
            // Unreachable while `self` holds a sender.
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Lifecycle for Controller {
    async fn run(&mut self) -> PluginResult<()> {
        Controller::run(self).await
    }

    async fn stop(&mut self) -> PluginResult<()> {
        Controller::stop(self).await
    }

    async fn next_fault(&mut self) -> PluginError {
        Controller::next_fault(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> PluginConfig {
        PluginConfig {
            capability_path: dir.to_path_buf(),
            device_count: 10,
            plugin_dir: dir.to_path_buf(),
            kubelet_socket: dir.join("kubelet.sock"),
            registration_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(500),
            ..PluginConfig::default()
        }
    }

    #[test]
    fn test_new_fails_without_capability() {
        let dir = tempfile::tempdir().unwrap();
        let config = PluginConfig {
            capability_path: dir.path().join("absent"),
            ..test_config(dir.path())
        };

        let err = Controller::new(config).unwrap_err();
        assert_eq!(err.kind(), sgx_core::ErrorKind::CapabilityUnavailable);
    }

    #[tokio::test]
    async fn test_start_then_stop_removes_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(test_config(dir.path())).unwrap();
        assert_eq!(controller.state(), ControllerState::Unstarted);
        assert_eq!(controller.inventory().len(), 10);

        controller.start().unwrap();
        assert_eq!(controller.state(), ControllerState::Serving);
        assert!(controller.endpoint_path().exists());

        controller.stop().await.unwrap();
        assert_eq!(controller.state(), ControllerState::Unstarted);
        assert!(!controller.endpoint_path().exists());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(test_config(dir.path())).unwrap();

        // never started
        controller.stop().await.unwrap();

        controller.start().unwrap();
        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
        assert!(controller.stop.is_triggered());
    }

    #[tokio::test]
    async fn test_restart_after_stop_gets_fresh_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(test_config(dir.path())).unwrap();

        controller.start().unwrap();
        controller.stop().await.unwrap();
        controller.start().unwrap();
        assert!(!controller.stop.is_triggered());
        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_register_requires_started_server() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(test_config(dir.path())).unwrap();

        let err = controller.register().await.unwrap_err();
        assert_eq!(err.kind(), sgx_core::ErrorKind::Registration);
        assert!(err.to_string().contains("not being served"));
        assert_eq!(controller.state(), ControllerState::Unstarted);
    }

    #[tokio::test]
    async fn test_run_rolls_back_on_registration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = Controller::new(test_config(dir.path())).unwrap();

        let err = controller.run().await.unwrap_err();
        assert_eq!(err.kind(), sgx_core::ErrorKind::Registration);
        assert_eq!(controller.state(), ControllerState::Unstarted);
        assert!(!controller.endpoint_path().exists());
    }
}
