//! SSH transport for upsync
//!
//! Uploads over SFTP and runs the reload command over an exec channel, each
//! on its own password-authenticated session. libssh2 is blocking, so
//! sessions live on tokio's blocking pool; command completion is handed
//! back through a oneshot channel that [`RemoteProcess::try_exit_status`]
//! checks without waiting.

mod session;
mod settings;

pub use settings::SshSettings;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot::{self, error::TryRecvError};
use upsync_core::{RemoteConfig, RemoteProcess, RemoteTransport, TransportError};

/// [`RemoteTransport`] over SSH
#[derive(Debug, Clone)]
pub struct SshTransport {
    settings: Arc<SshSettings>,
}

impl SshTransport {
    /// Create a transport
    #[must_use]
    pub fn new(settings: SshSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Create a transport from the `[remote]` configuration table
    #[must_use]
    pub fn from_remote(remote: &RemoteConfig) -> Self {
        Self::new(SshSettings::from_remote(remote))
    }
}

fn worker_failed(err: &tokio::task::JoinError) -> TransportError {
    TransportError::Channel(format!("ssh worker failed: {err}"))
}

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        let settings = Arc::clone(&self.settings);
        let remote_path = remote_path.to_string();
        let contents = contents.to_vec();

        tokio::task::spawn_blocking(move || session::upload(&settings, &remote_path, &contents))
            .await
            .map_err(|e| worker_failed(&e))?
    }

    async fn execute(&self, command: &str) -> Result<Box<dyn RemoteProcess>, TransportError> {
        let settings = Arc::clone(&self.settings);
        let command = command.to_string();
        let (started_tx, started_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::task::spawn_blocking(move || {
            session::run_command(&settings, &command, started_tx, exit_tx);
        });

        started_rx.await.map_err(|_| {
            TransportError::Channel("ssh worker stopped before the command started".to_string())
        })??;

        Ok(Box::new(SshProcess { exit: exit_rx }))
    }
}

/// Reload command running on the proxy host
struct SshProcess {
    exit: oneshot::Receiver<Result<i32, TransportError>>,
}

impl RemoteProcess for SshProcess {
    fn try_exit_status(&mut self) -> Result<Option<i32>, TransportError> {
        match self.exit.try_recv() {
            Ok(result) => result.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Closed) => Err(TransportError::Channel(
                "remote command watcher stopped".to_string(),
            )),
        }
    }
}
