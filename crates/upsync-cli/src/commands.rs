//! Subcommand bodies, kept out of `main` so they can be driven from tests

use crate::events::InstanceSpec;
use std::fmt::Write as _;
use upsync_core::{
    render, GatewayInstance, HostKeyPolicy, InstanceRegistry, RefreshOutcome, RenderedConfig,
    SyncConfig, SyncError, UpstreamSync,
};

fn instances(specs: &[InstanceSpec]) -> Result<Vec<GatewayInstance>, SyncError> {
    specs
        .iter()
        .map(|spec| GatewayInstance::new(spec.address.as_str(), spec.weight))
        .collect()
}

/// Render the document for `specs` without touching any remote host
///
/// A repeated address keeps its last weight.
///
/// # Errors
/// Invalid instances
pub fn render_instances(specs: &[InstanceSpec]) -> Result<RenderedConfig, SyncError> {
    let registry = InstanceRegistry::new();
    for instance in instances(specs)? {
        registry.upsert(instance);
    }
    Ok(render(&registry.snapshot()))
}

/// Register `specs` and run a single cycle
///
/// # Errors
/// Invalid instances, or the cycle's transport failure
pub async fn push(
    sync: &UpstreamSync,
    specs: &[InstanceSpec],
) -> Result<RefreshOutcome, SyncError> {
    for instance in instances(specs)? {
        sync.registry().upsert(instance);
    }
    sync.refresh().await
}

/// Human-readable summary of a validated configuration, password omitted
#[must_use]
pub fn describe_config(config: &SyncConfig) -> String {
    let remote = &config.remote;
    let mut out = String::new();
    let _ = writeln!(out, "host:            {}:{}", remote.host, remote.port);
    let _ = writeln!(out, "username:        {}", remote.username);
    let _ = writeln!(out, "config path:     {}", remote.config_path);
    let _ = writeln!(out, "reload command:  {}", remote.reload_command);
    let host_keys = match remote.host_key_policy {
        HostKeyPolicy::AcceptAny => "accept any (not verified)".to_string(),
        HostKeyPolicy::KnownHosts => format!(
            "known_hosts ({})",
            remote
                .known_hosts_path
                .as_ref()
                .map_or_else(String::new, |p| p.display().to_string())
        ),
    };
    let _ = writeln!(out, "host keys:       {host_keys}");
    let _ = writeln!(out, "poll interval:   {:?}", remote.poll_interval());
    let _ = writeln!(
        out,
        "reload timeout:  {}",
        remote
            .reload_timeout()
            .map_or_else(|| "none".to_string(), |t| format!("{t:?}"))
    );
    let _ = writeln!(out, "refresh policy:  {:?}", config.refresh.policy);
    out
}
