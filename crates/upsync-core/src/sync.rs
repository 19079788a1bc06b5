//! Remote synchronizer: upload, then reload
//!
//! The reload wait checks the remote process on a fixed interval from a
//! tokio timer instead of parking a thread. Without a configured timeout the
//! wait is unbounded.

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::render::RenderedConfig;
use crate::transport::{RemoteProcess, RemoteTransport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Summary of one successful push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    /// Number of `server` lines in the pushed document
    pub instance_count: usize,
    /// Bytes written to the remote file
    pub bytes_uploaded: usize,
    /// Exit status of the reload command; nonzero is not a failure
    pub exit_status: i32,
    /// Wall time for upload plus reload
    pub elapsed: Duration,
}

impl PushReport {
    /// Whether the reload command exited with status 0
    #[inline]
    #[must_use]
    pub fn reload_succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Pushes rendered documents to the proxy host
pub struct RemoteSynchronizer {
    transport: Arc<dyn RemoteTransport>,
    config_path: String,
    reload_command: String,
    poll_interval: Duration,
    reload_timeout: Option<Duration>,
}

impl RemoteSynchronizer {
    /// Create a synchronizer for the given host settings
    #[must_use]
    pub fn new(remote: &RemoteConfig, transport: Arc<dyn RemoteTransport>) -> Self {
        Self {
            transport,
            config_path: remote.config_path.clone(),
            reload_command: remote.reload_command.clone(),
            poll_interval: remote.poll_interval(),
            reload_timeout: remote.reload_timeout(),
        }
    }

    /// Upload `config`, then run the reload command and wait for it
    ///
    /// # Errors
    /// - `SyncError::Upload` if the file could not be written; the reload is
    ///   not attempted
    /// - `SyncError::Reload` if the command could not be started or
    ///   observed
    /// - `SyncError::ReloadTimedOut` if a timeout is configured and exceeded
    pub async fn push(&self, config: &RenderedConfig) -> Result<PushReport, SyncError> {
        let started = Instant::now();

        self.upload(config).await?;
        let exit_status = self.reload().await?;

        Ok(PushReport {
            instance_count: config.instance_count(),
            bytes_uploaded: config.len(),
            exit_status,
            elapsed: started.elapsed(),
        })
    }

    async fn upload(&self, config: &RenderedConfig) -> Result<(), SyncError> {
        tracing::info!(
            path = %self.config_path,
            bytes = config.len(),
            instances = config.instance_count(),
            "uploading configuration"
        );

        self.transport
            .upload(&self.config_path, config.as_bytes())
            .await
            .map_err(|source| {
                tracing::error!(
                    path = %self.config_path,
                    error = %source,
                    "configuration upload failed"
                );
                SyncError::Upload {
                    path: self.config_path.clone(),
                    source,
                }
            })?;

        tracing::info!(path = %self.config_path, "configuration uploaded");
        Ok(())
    }

    async fn reload(&self) -> Result<i32, SyncError> {
        tracing::info!(command = %self.reload_command, "running reload command");

        let mut process = self
            .transport
            .execute(&self.reload_command)
            .await
            .map_err(|source| self.reload_failed(source))?;

        let exit_status = match self.reload_timeout {
            None => self.wait_for_exit(process.as_mut()).await?,
            Some(limit) => tokio::time::timeout(limit, self.wait_for_exit(process.as_mut()))
                .await
                .map_err(|_| {
                    tracing::error!(
                        command = %self.reload_command,
                        timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        "reload command timed out"
                    );
                    SyncError::ReloadTimedOut {
                        command: self.reload_command.clone(),
                        timeout: limit,
                    }
                })??,
        };

        if exit_status == 0 {
            tracing::info!(command = %self.reload_command, "reload completed");
        } else {
            tracing::warn!(
                command = %self.reload_command,
                exit_status,
                "reload command exited with nonzero status"
            );
        }
        Ok(exit_status)
    }

    async fn wait_for_exit(&self, process: &mut dyn RemoteProcess) -> Result<i32, SyncError> {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // First tick completes immediately
            ticker.tick().await;
            if let Some(status) = process
                .try_exit_status()
                .map_err(|source| self.reload_failed(source))?
            {
                return Ok(status);
            }
        }
    }

    fn reload_failed(&self, source: crate::error::TransportError) -> SyncError {
        tracing::error!(command = %self.reload_command, error = %source, "reload failed");
        SyncError::Reload {
            command: self.reload_command.clone(),
            source,
        }
    }
}

impl std::fmt::Debug for RemoteSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSynchronizer")
            .field("config_path", &self.config_path)
            .field("reload_command", &self.reload_command)
            .field("poll_interval", &self.poll_interval)
            .field("reload_timeout", &self.reload_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::instance::GatewayInstance;
    use crate::render::render;
    use crate::transport::{MockRemoteProcess, MockRemoteTransport};

    fn remote() -> RemoteConfig {
        RemoteConfig::new(
            "proxy.internal",
            "deploy",
            "secret",
            "/etc/nginx/nginx.conf",
            "nginx -s reload",
        )
    }

    fn document() -> RenderedConfig {
        render(&[GatewayInstance::new("10.0.0.1:9000", 5).unwrap()])
    }

    /// Process that reports `status` on the `polls`-th check
    fn process_exiting_after(polls: usize, status: i32) -> MockRemoteProcess {
        let mut process = MockRemoteProcess::new();
        let mut seen = 0;
        process.expect_try_exit_status().returning(move || {
            seen += 1;
            Ok((seen >= polls).then_some(status))
        });
        process
    }

    #[tokio::test(start_paused = true)]
    async fn push_uploads_then_reloads() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().times(1).returning(|_, _| Ok(()));
        transport
            .expect_execute()
            .times(1)
            .returning(|_| Ok(Box::new(process_exiting_after(1, 0))));

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let config = document();
        let report = sync.push(&config).await.unwrap();

        assert_eq!(report.exit_status, 0);
        assert!(report.reload_succeeded());
        assert_eq!(report.instance_count, 1);
        assert_eq!(report.bytes_uploaded, config.len());
    }

    #[tokio::test(start_paused = true)]
    async fn upload_failure_skips_reload() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().times(1).returning(|_, _| {
            Err(TransportError::Authentication {
                username: "deploy".to_string(),
            })
        });
        transport.expect_execute().times(0);

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let err = sync.push(&document()).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::Upload { ref path, .. } if path == "/etc/nginx/nginx.conf"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn execute_failure_is_reload_error() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport
            .expect_execute()
            .returning(|_| Err(TransportError::Channel("exec refused".to_string())));

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let err = sync.push(&document()).await.unwrap_err();

        assert!(matches!(err, SyncError::Reload { .. }));
        assert!(err.upload_applied());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_while_waiting_is_reload_error() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport.expect_execute().returning(|_| {
            let mut process = MockRemoteProcess::new();
            let mut seen = 0;
            process.expect_try_exit_status().returning(move || {
                seen += 1;
                if seen < 3 {
                    Ok(None)
                } else {
                    Err(TransportError::Channel("connection reset".to_string()))
                }
            });
            Ok(Box::new(process))
        });

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let err = sync.push(&document()).await.unwrap_err();
        assert!(matches!(err, SyncError::Reload { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn nonzero_exit_is_not_fatal() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport
            .expect_execute()
            .returning(|_| Ok(Box::new(process_exiting_after(1, 1))));

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let report = sync.push(&document()).await.unwrap();

        assert_eq!(report.exit_status, 1);
        assert!(!report.reload_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn polls_every_500ms() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport
            .expect_execute()
            .returning(|_| Ok(Box::new(process_exiting_after(3, 0))));

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let started = Instant::now();
        sync.push(&document()).await.unwrap();

        // Checks at 0, 500 and 1000 ms
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn no_timeout_waits_as_long_as_needed() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport
            .expect_execute()
            .returning(|_| Ok(Box::new(process_exiting_after(1_000, 0))));

        let sync = RemoteSynchronizer::new(&remote(), Arc::new(transport));
        let report = sync.push(&document()).await.unwrap();

        assert_eq!(report.elapsed, Duration::from_millis(999 * 500));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_hung_reload() {
        let mut transport = MockRemoteTransport::new();
        transport.expect_upload().returning(|_, _| Ok(()));
        transport.expect_execute().returning(|_| {
            let mut process = MockRemoteProcess::new();
            process.expect_try_exit_status().returning(|| Ok(None));
            Ok(Box::new(process))
        });

        let remote = remote().with_reload_timeout(Duration::from_secs(3));
        let sync = RemoteSynchronizer::new(&remote, Arc::new(transport));
        let err = sync.push(&document()).await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::ReloadTimedOut { timeout, .. } if timeout == Duration::from_secs(3)
        ));
    }
}
