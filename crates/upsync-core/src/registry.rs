//! Thread-safe instance registry using DashMap.
//!
//! Mutations are atomic per address. Nothing here triggers a refresh; that
//! is the job of [`UpstreamSync`](crate::service::UpstreamSync).

use crate::error::SyncError;
use crate::instance::{check_weight, GatewayInstance};
use dashmap::DashMap;

/// Result of a weight update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightChange {
    /// Weight was replaced
    Updated {
        /// Weight before the update
        previous: u32,
    },
    /// Requested weight equals the current one
    Unchanged,
    /// No instance under that address
    NotFound,
}

impl WeightChange {
    /// Whether the registry changed
    #[inline]
    #[must_use]
    pub fn is_updated(self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// Authoritative set of backend instances, keyed by address
///
/// Readers iterate shard by shard, so a snapshot taken while another
/// thread mutates the map may include or miss that one entry.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: DashMap<String, GatewayInstance>,
}

impl InstanceRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for the instance's address
    ///
    /// Returns the previous entry, if any.
    pub fn upsert(&self, instance: GatewayInstance) -> Option<GatewayInstance> {
        self.instances.insert(instance.address().to_string(), instance)
    }

    /// Remove the entry for `address`
    pub fn remove(&self, address: &str) -> Option<GatewayInstance> {
        self.instances.remove(address).map(|(_, instance)| instance)
    }

    /// Replace the weight of an existing entry
    ///
    /// The entry stays locked for the compare and the write, so concurrent
    /// updates to the same address never interleave.
    ///
    /// # Errors
    /// `SyncError::InvalidInstance` for a zero weight
    pub fn set_weight(&self, address: &str, weight: u32) -> Result<WeightChange, SyncError> {
        check_weight(weight)?;
        let Some(mut entry) = self.instances.get_mut(address) else {
            return Ok(WeightChange::NotFound);
        };
        let previous = entry.weight();
        if previous == weight {
            return Ok(WeightChange::Unchanged);
        }
        entry.set_weight(weight);
        Ok(WeightChange::Updated { previous })
    }

    /// Current entry for `address`
    #[must_use]
    pub fn get(&self, address: &str) -> Option<GatewayInstance> {
        self.instances.get(address).map(|entry| entry.value().clone())
    }

    /// Whether `address` is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.instances.contains_key(address)
    }

    /// Number of registered instances
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Clone all entries, ordered by address
    #[must_use]
    pub fn snapshot(&self) -> Vec<GatewayInstance> {
        let mut instances: Vec<GatewayInstance> = self
            .instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        instances.sort_by(|a, b| a.address().cmp(b.address()));
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn instance(address: &str, weight: u32) -> GatewayInstance {
        GatewayInstance::new(address, weight).unwrap()
    }

    #[test]
    fn new_registry_empty() {
        let registry = InstanceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn upsert_overwrites_same_address() {
        let registry = InstanceRegistry::new();
        assert!(registry.upsert(instance("10.0.0.1:9000", 5)).is_none());

        let previous = registry.upsert(instance("10.0.0.1:9000", 7));
        assert_eq!(previous.map(|p| p.weight()), Some(5));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("10.0.0.1:9000").unwrap().weight(), 7);
    }

    #[test]
    fn upsert_twice_is_idempotent() {
        let registry = InstanceRegistry::new();
        registry.upsert(instance("10.0.0.1:9000", 5));
        let once = registry.snapshot();
        registry.upsert(instance("10.0.0.1:9000", 5));
        assert_eq!(registry.snapshot(), once);
    }

    #[test]
    fn remove_missing_is_none() {
        let registry = InstanceRegistry::new();
        registry.upsert(instance("10.0.0.1:9000", 5));

        assert!(registry.remove("10.0.0.2:9000").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn set_weight_outcomes() {
        let registry = InstanceRegistry::new();
        registry.upsert(instance("a:1", 5));

        assert_eq!(
            registry.set_weight("a:1", 5).unwrap(),
            WeightChange::Unchanged
        );
        assert_eq!(
            registry.set_weight("a:1", 8).unwrap(),
            WeightChange::Updated { previous: 5 }
        );
        assert_eq!(
            registry.set_weight("b:1", 8).unwrap(),
            WeightChange::NotFound
        );
        assert_eq!(registry.get("a:1").unwrap().weight(), 8);
    }

    #[test]
    fn set_weight_rejects_zero() {
        let registry = InstanceRegistry::new();
        registry.upsert(instance("a:1", 5));
        assert!(registry.set_weight("a:1", 0).is_err());
        assert_eq!(registry.get("a:1").unwrap().weight(), 5);
    }

    #[test]
    fn snapshot_sorted_by_address() {
        let registry = InstanceRegistry::new();
        registry.upsert(instance("10.0.0.3", 1));
        registry.upsert(instance("10.0.0.1", 1));
        registry.upsert(instance("10.0.0.2", 1));

        let addresses: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|i| i.address().to_string())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(InstanceRegistry::new());
        let mut handles = vec![];

        for i in 0..10u32 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let address = format!("10.0.0.{i}:9000");
                registry.upsert(instance(&address, i + 1));
                for w in 1..50 {
                    registry.set_weight(&address, w).unwrap();
                }
            }));
        }

        for _ in 0..10 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                let _ = registry.snapshot();
                let _ = registry.len();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 10);
        assert!(registry.snapshot().iter().all(|i| i.weight() == 49));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u32),
        Remove(u8),
        Reweight(u8, u32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, 1u32..20).prop_map(|(a, w)| Op::Add(a, w)),
            (0u8..6).prop_map(Op::Remove),
            (0u8..6, 1u32..20).prop_map(|(a, w)| Op::Reweight(a, w)),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_matches_model(ops in proptest::collection::vec(op(), 0..40)) {
            let registry = InstanceRegistry::new();
            let mut model: BTreeMap<String, u32> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Add(a, w) => {
                        let address = format!("10.0.0.{a}:80");
                        registry.upsert(instance(&address, w));
                        model.insert(address, w);
                    }
                    Op::Remove(a) => {
                        let address = format!("10.0.0.{a}:80");
                        let removed = registry.remove(&address);
                        prop_assert_eq!(removed.is_some(), model.remove(&address).is_some());
                    }
                    Op::Reweight(a, w) => {
                        let address = format!("10.0.0.{a}:80");
                        let change = registry.set_weight(&address, w).unwrap();
                        match model.get_mut(&address) {
                            None => prop_assert_eq!(change, WeightChange::NotFound),
                            Some(current) if *current == w => {
                                prop_assert_eq!(change, WeightChange::Unchanged);
                            }
                            Some(current) => {
                                prop_assert_eq!(
                                    change,
                                    WeightChange::Updated { previous: *current }
                                );
                                *current = w;
                            }
                        }
                    }
                }
            }

            let snapshot: Vec<(String, u32)> = registry
                .snapshot()
                .into_iter()
                .map(|i| (i.address().to_string(), i.weight()))
                .collect();
            let expected: Vec<(String, u32)> = model.into_iter().collect();
            prop_assert_eq!(snapshot, expected);
        }
    }
}
