//! Connection settings for SSH sessions

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use upsync_core::{HostKeyPolicy, RemoteConfig};

/// Credentials and checks shared by every session the transport opens
#[derive(Clone)]
pub struct SshSettings {
    /// Remote host
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Server key check
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file for [`HostKeyPolicy::KnownHosts`]
    pub known_hosts_path: Option<PathBuf>,
    /// Blocking I/O limit while a remote command runs; unbounded when absent
    pub command_timeout: Option<Duration>,
}

impl SshSettings {
    /// Settings taken from the `[remote]` configuration table
    ///
    /// The reload timeout doubles as the command I/O limit so that the
    /// watcher thread ends once the synchronizer has given up.
    #[must_use]
    pub fn from_remote(remote: &RemoteConfig) -> Self {
        Self {
            host: remote.host.clone(),
            port: remote.port,
            username: remote.username.clone(),
            password: remote.password.clone(),
            host_key_policy: remote.host_key_policy,
            known_hosts_path: remote.known_hosts_path.clone(),
            command_timeout: remote.reload_timeout(),
        }
    }

    /// `command_timeout` in the millisecond form libssh2 expects; 0 means none
    pub(crate) fn command_timeout_ms(&self) -> u32 {
        self.command_timeout
            .map_or(0, |t| u32::try_from(t.as_millis()).unwrap_or(u32::MAX).max(1))
    }
}

impl fmt::Debug for SshSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> RemoteConfig {
        RemoteConfig::new("proxy", "deploy", "hunter2", "/etc/nginx/nginx.conf", "nginx -s reload")
    }

    #[test]
    fn from_remote_copies_connection_fields() {
        let settings = SshSettings::from_remote(&remote().with_port(2222));
        assert_eq!(settings.host, "proxy");
        assert_eq!(settings.port, 2222);
        assert_eq!(settings.username, "deploy");
        assert_eq!(settings.host_key_policy, HostKeyPolicy::AcceptAny);
        assert_eq!(settings.command_timeout, None);
        assert_eq!(settings.command_timeout_ms(), 0);
    }

    #[test]
    fn reload_timeout_becomes_command_timeout() {
        let settings =
            SshSettings::from_remote(&remote().with_reload_timeout(Duration::from_secs(30)));
        assert_eq!(settings.command_timeout_ms(), 30_000);
    }

    #[test]
    fn known_hosts_carried_over() {
        let settings =
            SshSettings::from_remote(&remote().with_known_hosts("/home/deploy/.ssh/known_hosts"));
        assert_eq!(settings.host_key_policy, HostKeyPolicy::KnownHosts);
        assert!(settings.known_hosts_path.is_some());
    }

    #[test]
    fn debug_redacts_password() {
        let text = format!("{:?}", SshSettings::from_remote(&remote()));
        assert!(!text.contains("hunter2"));
    }
}
