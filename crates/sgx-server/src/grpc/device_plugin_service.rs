//! DevicePlugin service implementation.
//!
//! Serves the kubelet's device-plugin calls from an immutable inventory
//! snapshot. Allocation is not tracked: every container request receives the
//! same grant of the capability path, whichever ids were requested.

use crate::grpc::proto::{
    device_plugin_server::DevicePlugin, AllocateRequest, AllocateResponse,
    ContainerAllocateResponse, Device as ProtoDevice, DevicePluginOptions, DeviceSpec, Empty,
    ListAndWatchResponse, PreStartContainerRequest, PreStartContainerResponse,
};
use sgx_core::limits::{DEVICE_PERMISSIONS, LIST_AND_WATCH_BUFFER};
use sgx_core::{Inventory, PluginError, StopSignal};
use std::path::Path;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{info, instrument, warn};

/// gRPC implementation of the kubelet `DevicePlugin` service.
#[derive(Debug, Clone)]
pub struct DevicePluginService {
    inventory: Inventory,
    stop: StopSignal,
    /// Host path granted to containers; also used as the container path.
    grant_path: String,
    /// Stream failures are reported here so the supervisor can reset.
    faults: mpsc::UnboundedSender<PluginError>,
}

impl DevicePluginService {
    pub fn new(
        inventory: Inventory,
        stop: StopSignal,
        grant_path: &Path,
        faults: mpsc::UnboundedSender<PluginError>,
    ) -> Self {
        Self {
            inventory,
            stop,
            grant_path: grant_path.to_string_lossy().into_owned(),
            faults,
        }
    }

    fn grant(&self) -> ContainerAllocateResponse {
        ContainerAllocateResponse {
            devices: vec![DeviceSpec {
                container_path: self.grant_path.clone(),
                host_path: self.grant_path.clone(),
                permissions: DEVICE_PERMISSIONS.to_string(),
            }],
            ..Default::default()
        }
    }

    fn report(&self, err: PluginError) {
        warn!(error = %err, "ListAndWatch stream aborted");
        // The controller may already be gone; nobody is left to reset then.
        let _ = self.faults.send(err);
    }
}

/// Convert an inventory snapshot into the kubelet's device list.
pub fn list_response(inventory: &Inventory) -> ListAndWatchResponse {
    ListAndWatchResponse {
        devices: inventory
            .devices()
            .map(|device| ProtoDevice {
                id: device.id.clone(),
                health: device.health.as_str().to_string(),
                topology: None,
            })
            .collect(),
    }
}

#[tonic::async_trait]
impl DevicePlugin for DevicePluginService {
    type ListAndWatchStream = ReceiverStream<Result<ListAndWatchResponse, Status>>;

    async fn get_device_plugin_options(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<DevicePluginOptions>, Status> {
        Ok(Response::new(DevicePluginOptions::default()))
    }

    #[instrument(skip(self, _request), fields(method = "list_and_watch"))]
    async fn list_and_watch(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListAndWatchStream>, Status> {
        info!("SGX-LKL device plugin: ListAndWatch");

        let first = list_response(&self.inventory);
        let service = self.clone();
        let (tx, rx) = mpsc::channel(LIST_AND_WATCH_BUFFER);

        tokio::spawn(async move {
            // Sent before looking at the stop signal, so the kubelet never
            // sees an empty first list even when Stop has already happened.
            if tx.send(Ok(first)).await.is_err() {
                service.report(PluginError::StreamTransport(
                    "kubelet dropped the stream before the device list was sent".into(),
                ));
                return;
            }

            tokio::select! {
                biased;
                _ = service.stop.stopped() => {
                    info!("SGX-LKL device plugin: ListAndWatch exit");
                }
                _ = tx.closed() => {
                    service.report(PluginError::StreamTransport(
                        "kubelet closed the ListAndWatch stream".into(),
                    ));
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    #[instrument(skip(self, request), fields(method = "allocate"))]
    async fn allocate(
        &self,
        request: Request<AllocateRequest>,
    ) -> Result<Response<AllocateResponse>, Status> {
        info!("SGX-LKL device plugin: Allocate");
        let req = request.into_inner();

        let container_responses = req
            .container_requests
            .iter()
            .map(|creq| {
                info!(devices = ?creq.devices_ids, "Request devices");
                self.grant()
            })
            .collect();

        Ok(Response::new(AllocateResponse {
            container_responses,
        }))
    }

    async fn pre_start_container(
        &self,
        _request: Request<PreStartContainerRequest>,
    ) -> Result<Response<PreStartContainerResponse>, Status> {
        Ok(Response::new(PreStartContainerResponse {}))
    }
}
