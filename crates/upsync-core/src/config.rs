//! Configuration for the remote proxy host and refresh behaviour
//!
//! Loaded from TOML:
//!
//! ```toml
//! [remote]
//! host = "10.0.0.10"
//! username = "deploy"
//! password = "secret"
//! config_path = "/etc/nginx/nginx.conf"
//! reload_command = "nginx -s reload"
//!
//! [refresh]
//! policy = "drop"
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default interval between reload completion checks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// How the server key presented by the proxy host is checked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents
    #[default]
    AcceptAny,
    /// Require a matching entry in an OpenSSH known_hosts file
    KnownHosts,
}

/// What happens to a refresh request that finds the slot taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    /// Drop the request with a warning
    #[default]
    Drop,
    /// Ask the running cycle to run once more before it releases the slot
    FollowUp,
}

/// Connection and command settings for the proxy host
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Proxy host name or IP
    pub host: String,
    /// SSH port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login user
    pub username: String,
    /// Login password
    #[serde(default)]
    pub password: String,
    /// Where the rendered configuration is written on the remote host
    pub config_path: String,
    /// Command that makes the proxy pick up the new file
    pub reload_command: String,
    /// Server key check
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file, required by [`HostKeyPolicy::KnownHosts`]
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,
    /// Reload completion poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on the reload wait in milliseconds; unbounded when absent
    #[serde(default)]
    pub reload_timeout_ms: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl RemoteConfig {
    /// Create settings with default port, polling cadence and no timeout
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        config_path: impl Into<String>,
        reload_command: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: password.into(),
            config_path: config_path.into(),
            reload_command: reload_command.into(),
            host_key_policy: HostKeyPolicy::AcceptAny,
            known_hosts_path: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reload_timeout_ms: None,
        }
    }

    /// With SSH port
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Require the server key to be listed in `path`
    #[inline]
    #[must_use]
    pub fn with_known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_key_policy = HostKeyPolicy::KnownHosts;
        self.known_hosts_path = Some(path.into());
        self
    }

    /// With reload poll interval
    #[inline]
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Bound the reload wait, rounded up to whole milliseconds
    #[inline]
    #[must_use]
    pub fn with_reload_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 > 0);
        self.reload_timeout_ms = Some(u64::try_from(millis).unwrap_or(u64::MAX));
        self
    }

    /// Reload poll interval
    #[inline]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Reload timeout, if any
    #[inline]
    #[must_use]
    pub fn reload_timeout(&self) -> Option<Duration> {
        self.reload_timeout_ms.map(Duration::from_millis)
    }

    /// Check field values
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("remote.host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(ConfigError::invalid("remote.port", "must be non-zero"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::invalid("remote.username", "must not be empty"));
        }
        if self.config_path.trim().is_empty() {
            return Err(ConfigError::invalid("remote.config_path", "must not be empty"));
        }
        if self.reload_command.trim().is_empty() {
            return Err(ConfigError::invalid(
                "remote.reload_command",
                "must not be empty",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "remote.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.reload_timeout_ms == Some(0) {
            return Err(ConfigError::invalid(
                "remote.reload_timeout_ms",
                "must be greater than zero when set",
            ));
        }
        if self.host_key_policy == HostKeyPolicy::KnownHosts && self.known_hosts_path.is_none() {
            return Err(ConfigError::invalid(
                "remote.known_hosts_path",
                "required when host_key_policy = \"known_hosts\"",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("config_path", &self.config_path)
            .field("reload_command", &self.reload_command)
            .field("host_key_policy", &self.host_key_policy)
            .field("known_hosts_path", &self.known_hosts_path)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("reload_timeout_ms", &self.reload_timeout_ms)
            .finish()
    }
}

/// Refresh coordination settings
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshConfig {
    /// Contention policy
    #[serde(default)]
    pub policy: RefreshPolicy,
}

/// Top-level configuration file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Proxy host settings
    pub remote: RemoteConfig,
    /// Refresh settings
    #[serde(default)]
    pub refresh: RefreshConfig,
}

impl SyncConfig {
    /// Create configuration with the default refresh policy
    #[inline]
    #[must_use]
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            refresh: RefreshConfig::default(),
        }
    }

    /// With refresh policy
    #[inline]
    #[must_use]
    pub fn with_refresh_policy(mut self, policy: RefreshPolicy) -> Self {
        self.refresh.policy = policy;
        self
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// Parse failures and invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Read, parse and validation failures
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check field values
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first bad field
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.remote.validate()
    }
}
