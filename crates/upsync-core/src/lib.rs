//! upsync core - dynamic upstream configuration sync
//!
//! Keeps an in-memory registry of backend instances, renders an nginx
//! configuration from it and pushes that configuration to a remote proxy
//! host:
//! 1. **Registry**: concurrent address → instance map
//! 2. **Render**: registry snapshot → configuration text
//! 3. **Sync**: upload the text, run the reload command, wait for it
//! 4. **Coordinator**: one cycle at a time, contending requests never wait
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use upsync_core::prelude::*;
//!
//! let config = SyncConfig::load("upsync.toml")?;
//! let sync = UpstreamSync::new(&config, Arc::new(transport));
//!
//! sync.add_instance("10.0.0.1:9000", 5).await?;
//! sync.update_weight("10.0.0.1:9000", 10).await?;
//! sync.remove_instance("10.0.0.1:9000").await?;
//! ```

// Core modules
pub mod config;
pub mod coordinator;
pub mod error;
pub mod instance;
pub mod registry;
pub mod render;
pub mod service;
pub mod sync;
pub mod transport;

// Re-exports
pub use config::{HostKeyPolicy, RefreshConfig, RefreshPolicy, RemoteConfig, SyncConfig};
pub use coordinator::{RefreshCoordinator, RefreshOutcome, RefreshStats};
pub use error::{ConfigError, SyncError, TransportError};
pub use instance::GatewayInstance;
pub use registry::{InstanceRegistry, WeightChange};
pub use render::{render, RenderedConfig};
pub use service::UpstreamSync;
pub use sync::{PushReport, RemoteSynchronizer};
pub use transport::{RemoteProcess, RemoteTransport};

/// Common imports
pub mod prelude {
    pub use crate::{
        GatewayInstance, RefreshOutcome, RefreshPolicy, RemoteConfig, RemoteTransport,
        SyncConfig, SyncError, UpstreamSync,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
