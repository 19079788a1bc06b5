//! Remote channel seam
//!
//! Implement these traits to define how the rendered document reaches the
//! proxy host and how the reload command is run there. Every call opens its
//! own session and closes it before returning or once the process ends;
//! sessions are never pooled.

use crate::error::TransportError;

/// File transfer and command execution against the proxy host
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Write `contents` to `remote_path`, replacing any existing file
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError>;

    /// Start `command` and return a handle for polling its completion
    async fn execute(&self, command: &str) -> Result<Box<dyn RemoteProcess>, TransportError>;
}

/// A command running on the proxy host
#[cfg_attr(test, mockall::automock)]
pub trait RemoteProcess: Send {
    /// Check for completion without waiting
    ///
    /// `Ok(None)` while the command is still running, `Ok(Some(status))`
    /// once it has exited.
    fn try_exit_status(&mut self) -> Result<Option<i32>, TransportError>;
}
