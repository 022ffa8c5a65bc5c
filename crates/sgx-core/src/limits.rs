//! Fixed names, paths and timeouts of the plugin.
//!
//! These are the defaults of [`crate::config::PluginConfig`]; running
//! without a configuration file uses exactly these values.

use std::time::Duration;

// =============================================================================
// Identity
// =============================================================================

/// Resource name advertised to the kubelet and requested by pods.
pub const RESOURCE_NAME: &str = "microsoft.io/cc_enabled";

/// File name of the plugin socket inside the device-plugin directory.
pub const PLUGIN_ENDPOINT: &str = "sgxlkl.sock";

/// Path whose presence signals the SGX-LKL capability. Also the path granted
/// to containers on allocation.
pub const CAPABILITY_PATH: &str = "/opt/sgxlkl";

/// Number of device ids advertised. A fixed pool, not a hardware count.
pub const DEVICE_COUNT: usize = 100;

/// Device ids are zero-padded to this many decimal digits.
pub const DEVICE_ID_WIDTH: usize = 3;

/// Cgroup permissions of every allocation grant.
pub const DEVICE_PERMISSIONS: &str = "rw";

// =============================================================================
// Kubelet
// =============================================================================

/// Directory in which the kubelet expects device-plugin sockets.
pub const DEVICE_PLUGIN_PATH: &str = "/var/lib/kubelet/device-plugins/";

/// Kubelet registration socket.
pub const KUBELET_SOCKET: &str = "/var/lib/kubelet/device-plugins/kubelet.sock";

// =============================================================================
// Timeouts
// =============================================================================

/// Bound on dialing the kubelet and on the `Register` call.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on unary device-plugin handlers.
pub const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long Stop waits for the serve loop to quiesce before aborting it.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Buffers
// =============================================================================

/// Capacity of the per-stream `ListAndWatch` channel. The first snapshot must
/// always fit without waiting on the client.
pub const LIST_AND_WATCH_BUFFER: usize = 4;
