//! Error types for the device plugin.
//!
//! `PluginError` is the single error type shared by the probe, the plugin
//! server, the registration client and the lifecycle controller. Every
//! variant corresponds to one way a plugin cycle can fail:
//!
//! - **`CapabilityUnavailable`**: the capability path could not be stat'ed.
//!   Fatal for the cycle; the controller is never constructed.
//! - **`EndpointBind`**: the stale socket could not be removed or the new one
//!   could not be bound. Fatal for the cycle.
//! - **`Registration`**: dialing the kubelet or the `Register` call failed.
//!   The controller rolls the started server back.
//! - **`StreamTransport`**: sending on an open `ListAndWatch` stream failed.
//!   The stream aborts and the supervisor resets the cycle.
//! - **`EndpointCleanup`**: removing the socket during Stop failed. Logged,
//!   never blocks shutdown.
//! - **`ServeLoop`**: the background serve task ended with an error.
//! - **`Config`**: configuration could not be loaded or is invalid.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the plugin error type.
pub type PluginResult<T> = std::result::Result<T, PluginError>;

/// Discriminant of [`PluginError`], cheap to copy into logs and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CapabilityUnavailable,
    EndpointBind,
    Registration,
    StreamTransport,
    EndpointCleanup,
    ServeLoop,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::CapabilityUnavailable => "capability_unavailable",
            ErrorKind::EndpointBind => "endpoint_bind",
            ErrorKind::Registration => "registration",
            ErrorKind::StreamTransport => "stream_transport",
            ErrorKind::EndpointCleanup => "endpoint_cleanup",
            ErrorKind::ServeLoop => "serve_loop",
            ErrorKind::Config => "config",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the device plugin.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The capability path is missing or cannot be stat'ed.
    ///
    /// Permission errors and missing files are deliberately not told apart:
    /// either way the capability is unavailable on this host.
    #[error("capability unavailable at {}: {source}", path.display())]
    CapabilityUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Removing a stale socket or binding the plugin socket failed.
    #[error("cannot bind plugin endpoint {}: {source}", path.display())]
    EndpointBind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Dialing the kubelet registration socket or the `Register` RPC failed.
    #[error("registration with kubelet at {} failed: {reason}", socket.display())]
    Registration { socket: PathBuf, reason: String },

    /// A send on an open `ListAndWatch` stream failed.
    #[error("ListAndWatch stream transport failure: {0}")]
    StreamTransport(String),

    /// Removing the plugin socket during Stop failed.
    #[error("cannot remove plugin endpoint {}: {source}", path.display())]
    EndpointCleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The background gRPC serve task returned an error or panicked.
    #[error("plugin serve loop failed: {0}")]
    ServeLoop(String),

    /// Configuration loading or validation failed.
    #[error("configuration error: {0}")]
    Config(#[source] Box<figment::Error>),
}

impl PluginError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PluginError::CapabilityUnavailable { .. } => ErrorKind::CapabilityUnavailable,
            PluginError::EndpointBind { .. } => ErrorKind::EndpointBind,
            PluginError::Registration { .. } => ErrorKind::Registration,
            PluginError::StreamTransport(_) => ErrorKind::StreamTransport,
            PluginError::EndpointCleanup { .. } => ErrorKind::EndpointCleanup,
            PluginError::ServeLoop(_) => ErrorKind::ServeLoop,
            PluginError::Config(_) => ErrorKind::Config,
        }
    }

    /// Configuration error carrying a plain message, for checks made after
    /// Figment has extracted the values.
    pub fn config(message: impl Into<String>) -> Self {
        PluginError::Config(Box::new(figment::Error::from(message.into())))
    }
}

impl From<figment::Error> for PluginError {
    fn from(err: figment::Error) -> Self {
        PluginError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_message_names_path() {
        let err = PluginError::CapabilityUnavailable {
            path: PathBuf::from("/opt/sgxlkl"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(err.kind(), ErrorKind::CapabilityUnavailable);
        assert!(err.to_string().contains("/opt/sgxlkl"));
    }

    #[test]
    fn test_figment_error_is_kept_as_source() {
        use std::error::Error as _;

        let err = PluginError::from(figment::Error::from("invalid type for device_count"));
        assert_eq!(err.kind(), ErrorKind::Config);
        let source = err.source().expect("figment error should be the source");
        assert!(source.to_string().contains("device_count"));
        assert!(source.downcast_ref::<figment::Error>().is_some());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::Registration.to_string(), "registration");
        assert_eq!(
            PluginError::StreamTransport("closed".into()).kind(),
            ErrorKind::StreamTransport
        );
    }
}
