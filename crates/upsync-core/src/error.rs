//! Error types for upsync core
//!
//! Only transport-level failures leave a refresh cycle. Missing instances,
//! slot contention and a nonzero reload exit are handled where they occur
//! and never show up here.

use std::path::PathBuf;
use std::time::Duration;

/// Main error type returned by registry mutations and refresh cycles
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Address or weight rejected before touching the registry
    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    /// Configuration could not be uploaded; reload was not attempted
    #[error("failed to upload configuration to {path}: {source}")]
    Upload {
        /// Remote path that was being written
        path: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// Reload command could not be run to completion
    #[error("failed to run reload command `{command}`: {source}")]
    Reload {
        /// Command that was executed
        command: String,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// Reload command did not finish within the configured limit
    #[error("reload command `{command}` did not finish within {timeout:?}")]
    ReloadTimedOut {
        /// Command that was executed
        command: String,
        /// Configured limit
        timeout: Duration,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// Whether the remote file may have been replaced without the proxy
    /// picking it up
    #[inline]
    #[must_use]
    pub fn upload_applied(&self) -> bool {
        matches!(self, Self::Reload { .. } | Self::ReloadTimedOut { .. })
    }
}

/// Failures raised by a [`RemoteTransport`](crate::transport::RemoteTransport)
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// TCP connection or protocol handshake failed
    #[error("connection to {host}:{port} failed: {message}")]
    Connect {
        /// Remote host
        host: String,
        /// Remote port
        port: u16,
        /// Description from the transport
        message: String,
    },

    /// Credentials were rejected
    #[error("authentication failed for user {username}")]
    Authentication {
        /// User name presented to the server
        username: String,
    },

    /// Server key did not match the trusted set
    #[error("host key verification failed: {0}")]
    HostKey(String),

    /// Session channel (file transfer or exec) failed
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O on an established channel failed
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML did not match the expected layout
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds an unusable value
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}
