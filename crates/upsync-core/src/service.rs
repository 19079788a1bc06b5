//! Registrar-facing service
//!
//! [`UpstreamSync`] owns the registry and the refresh coordinator and is
//! handed to whatever layer receives service-discovery events. Each mutation
//! that changes the registry runs a refresh on the calling task.

use crate::config::SyncConfig;
use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshStats};
use crate::error::SyncError;
use crate::instance::GatewayInstance;
use crate::registry::{InstanceRegistry, WeightChange};
use crate::render::{render, RenderedConfig};
use crate::sync::RemoteSynchronizer;
use crate::transport::RemoteTransport;
use std::sync::Arc;

/// Instance registry wired to a remote proxy host
#[derive(Debug)]
pub struct UpstreamSync {
    registry: Arc<InstanceRegistry>,
    coordinator: RefreshCoordinator,
}

impl UpstreamSync {
    /// Create a service with an empty registry
    #[must_use]
    pub fn new(config: &SyncConfig, transport: Arc<dyn RemoteTransport>) -> Self {
        Self::with_registry(Arc::new(InstanceRegistry::new()), config, transport)
    }

    /// Create a service over an existing registry
    #[must_use]
    pub fn with_registry(
        registry: Arc<InstanceRegistry>,
        config: &SyncConfig,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        tracing::info!(
            host = %config.remote.host,
            port = config.remote.port,
            path = %config.remote.config_path,
            policy = ?config.refresh.policy,
            "upstream sync initialized"
        );
        let synchronizer = RemoteSynchronizer::new(&config.remote, transport);
        let coordinator =
            RefreshCoordinator::new(Arc::clone(&registry), synchronizer, config.refresh.policy);
        Self {
            registry,
            coordinator,
        }
    }

    /// Register or overwrite an instance, then refresh
    ///
    /// Refreshes even when the stored value is identical.
    ///
    /// # Errors
    /// Invalid input, or a transport failure in the cycle run by this call
    pub async fn add_instance(
        &self,
        address: &str,
        weight: u32,
    ) -> Result<RefreshOutcome, SyncError> {
        tracing::info!(address, weight, "adding gateway instance");
        let instance = GatewayInstance::new(address, weight)?;
        self.registry.upsert(instance);
        self.coordinator.refresh().await
    }

    /// Drop an instance, then refresh if it was registered
    ///
    /// # Errors
    /// A transport failure in the cycle run by this call
    pub async fn remove_instance(&self, address: &str) -> Result<RefreshOutcome, SyncError> {
        tracing::info!(address, "removing gateway instance");
        if self.registry.remove(address).is_none() {
            tracing::warn!(address, "gateway instance to remove does not exist");
            return Ok(RefreshOutcome::Unchanged);
        }
        self.coordinator.refresh().await
    }

    /// Change an instance's weight, then refresh if it actually changed
    ///
    /// # Errors
    /// A zero weight, or a transport failure in the cycle run by this call
    pub async fn update_weight(
        &self,
        address: &str,
        weight: u32,
    ) -> Result<RefreshOutcome, SyncError> {
        tracing::info!(address, weight, "updating gateway instance weight");
        match self.registry.set_weight(address, weight)? {
            WeightChange::Updated { previous } => {
                tracing::debug!(address, previous, weight, "weight changed");
                self.coordinator.refresh().await
            }
            WeightChange::Unchanged => {
                tracing::warn!(address, weight, "gateway instance weight unchanged");
                Ok(RefreshOutcome::Unchanged)
            }
            WeightChange::NotFound => {
                tracing::warn!(address, "gateway instance to reweight does not exist");
                Ok(RefreshOutcome::Unchanged)
            }
        }
    }

    /// Push the current registry without mutating it
    ///
    /// # Errors
    /// A transport failure in the cycle run by this call
    pub async fn refresh(&self) -> Result<RefreshOutcome, SyncError> {
        self.coordinator.refresh().await
    }

    /// Document that the next cycle would push
    #[must_use]
    pub fn render(&self) -> RenderedConfig {
        render(&self.registry.snapshot())
    }

    /// Registered instances, ordered by address
    #[must_use]
    pub fn instances(&self) -> Vec<GatewayInstance> {
        self.registry.snapshot()
    }

    /// Shared registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Refresh counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> RefreshStats {
        self.coordinator.stats()
    }

    /// Whether a cycle currently holds the slot
    #[inline]
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.coordinator.is_refreshing()
    }
}
