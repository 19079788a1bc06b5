//! Backend instances registered with the load balancer

use crate::error::SyncError;
use std::fmt;

/// Port used when an address does not carry one
pub const DEFAULT_UPSTREAM_PORT: &str = "80";

/// A backend endpoint and its relative traffic share
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayInstance {
    address: String,
    weight: u32,
}

impl GatewayInstance {
    /// Create an instance
    ///
    /// # Errors
    /// `SyncError::InvalidInstance` for a blank address or a zero weight
    pub fn new(address: impl Into<String>, weight: u32) -> Result<Self, SyncError> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(SyncError::InvalidInstance(
                "address must not be empty".to_string(),
            ));
        }
        check_weight(weight)?;
        Ok(Self { address, weight })
    }

    /// Registry key, `host[:port]`
    #[inline]
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Relative traffic share
    #[inline]
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub(crate) fn set_weight(&mut self, weight: u32) {
        self.weight = weight;
    }

    /// Host part: everything before the first `:`
    #[must_use]
    pub fn host(&self) -> &str {
        self.address.split(':').next().unwrap_or_default()
    }

    /// Port part: the second `:`-separated segment, or `80`
    ///
    /// Segments after the second are ignored; this is not a general
    /// address parser (IPv6 literals are not supported).
    #[must_use]
    pub fn port(&self) -> &str {
        match self.address.split(':').nth(1) {
            Some(port) if !port.is_empty() => port,
            _ => DEFAULT_UPSTREAM_PORT,
        }
    }

    /// `server <host>:<port> weight=<weight>;`
    #[must_use]
    pub fn server_line(&self) -> String {
        format!("server {}:{} weight={};", self.host(), self.port(), self.weight)
    }
}

impl fmt::Display for GatewayInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (weight {})", self.address, self.weight)
    }
}

pub(crate) fn check_weight(weight: u32) -> Result<(), SyncError> {
    if weight == 0 {
        return Err(SyncError::InvalidInstance(
            "weight must be a positive integer".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_with_port() {
        let instance = GatewayInstance::new("10.0.0.1:9000", 5).unwrap();
        assert_eq!(instance.host(), "10.0.0.1");
        assert_eq!(instance.port(), "9000");
        assert_eq!(instance.server_line(), "server 10.0.0.1:9000 weight=5;");
    }

    #[test]
    fn address_without_port_defaults_to_80() {
        let instance = GatewayInstance::new("10.0.0.1", 3).unwrap();
        assert_eq!(instance.port(), "80");
        assert_eq!(instance.server_line(), "server 10.0.0.1:80 weight=3;");
    }

    #[test]
    fn trailing_colon_defaults_to_80() {
        let instance = GatewayInstance::new("backend.local:", 1).unwrap();
        assert_eq!(instance.host(), "backend.local");
        assert_eq!(instance.port(), "80");
    }

    #[test]
    fn extra_segments_ignored() {
        let instance = GatewayInstance::new("10.0.0.1:9000:extra", 2).unwrap();
        assert_eq!(instance.server_line(), "server 10.0.0.1:9000 weight=2;");
    }

    #[test]
    fn rejects_blank_address() {
        assert!(matches!(
            GatewayInstance::new("  ", 1),
            Err(SyncError::InvalidInstance(_))
        ));
    }

    #[test]
    fn rejects_zero_weight() {
        assert!(matches!(
            GatewayInstance::new("10.0.0.1", 0),
            Err(SyncError::InvalidInstance(_))
        ));
    }
}
