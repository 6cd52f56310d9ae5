//! Concurrent protocol type → adapter mapping.
//!
//! Lookups vastly outnumber registrations, and both may happen while
//! messages are in flight. Adapters are stored fully constructed behind an
//! `Arc`, so a lookup either sees the old adapter or the new one.

use crate::adapter::{AdapterIdentity, ProtocolAdapter};
use crate::adapters::builtin_adapters;
use crate::catalog::{DeviceCatalog, StaticDeviceCatalog};
use crate::service::BusinessServiceClient;
use dashmap::DashMap;
use devcomm_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct AdapterRegistry {
    adapters: DashMap<String, Arc<dyn ProtocolAdapter>>,
    catalog: Arc<dyn DeviceCatalog>,
}

impl AdapterRegistry {
    pub fn new(catalog: Arc<dyn DeviceCatalog>) -> Self {
        Self {
            adapters: DashMap::new(),
            catalog,
        }
    }

    /// Registry holding the built-in adapters and a catalog of their models.
    pub fn with_builtin(client: Arc<dyn BusinessServiceClient>) -> Self {
        let adapters = builtin_adapters(client);
        let catalog = StaticDeviceCatalog::from_adapters(&adapters);
        let registry = Self::new(Arc::new(catalog));
        for adapter in adapters {
            registry.register(adapter);
        }
        registry
    }

    /// Register an adapter under its protocol type, returning the adapter it
    /// replaced.
    pub fn register(&self, adapter: Arc<dyn ProtocolAdapter>) -> Option<Arc<dyn ProtocolAdapter>> {
        let identity = adapter.identify();
        let previous = self.adapters.insert(identity.protocol_type.clone(), adapter);
        info!(
            protocol_type = %identity.protocol_type,
            manufacturer = %identity.manufacturer,
            version = %identity.version,
            replaced = previous.is_some(),
            "adapter registered"
        );
        previous
    }

    pub fn unregister(&self, protocol_type: &str) -> Option<Arc<dyn ProtocolAdapter>> {
        let removed = self.adapters.remove(protocol_type).map(|(_, adapter)| adapter);
        if removed.is_some() {
            info!(protocol_type, "adapter unregistered");
        }
        removed
    }

    /// Adapter registered for a protocol type.
    ///
    /// # Errors
    /// Returns `Error::AdapterNotFound` if nothing is registered.
    pub fn get(&self, protocol_type: &str) -> Result<Arc<dyn ProtocolAdapter>> {
        self.adapters
            .get(protocol_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::AdapterNotFound(protocol_type.to_string()))
    }

    pub fn contains(&self, protocol_type: &str) -> bool {
        self.adapters.contains_key(protocol_type)
    }

    /// Resolve the adapter for a device model through the catalog.
    ///
    /// # Errors
    /// `Error::UnsupportedDeviceModel` if the catalog has no mapping,
    /// `Error::AdapterNotFound` if the mapped protocol has no adapter.
    pub fn resolve_for_model(&self, device_model: &str) -> Result<Arc<dyn ProtocolAdapter>> {
        let protocol_type = self
            .catalog
            .resolve_protocol_type(device_model)
            .ok_or_else(|| Error::UnsupportedDeviceModel(device_model.to_string()))?;
        debug!(device_model, protocol_type = %protocol_type, "resolved device model");
        self.get(&protocol_type)
    }

    pub fn is_device_model_supported(&self, device_model: &str) -> bool {
        self.catalog.is_device_model_supported(device_model)
    }

    /// Identities of all registered adapters, sorted by protocol type.
    pub fn list_adapters(&self) -> Vec<AdapterIdentity> {
        let mut identities: Vec<AdapterIdentity> = self
            .adapters
            .iter()
            .map(|entry| entry.value().identify())
            .collect();
        identities.sort_by(|a, b| a.protocol_type.cmp(&b.protocol_type));
        identities
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::RecordingClient;
    use crate::adapters::{AccessAdapter, ConsumeAdapter};
    use devcomm_core::constants::*;

    fn client() -> Arc<RecordingClient> {
        Arc::new(RecordingClient::ok())
    }

    #[test]
    fn test_builtin_registry() {
        let registry = AdapterRegistry::with_builtin(client());
        assert_eq!(registry.len(), 3);

        let listed: Vec<String> = registry
            .list_adapters()
            .into_iter()
            .map(|i| i.protocol_type)
            .collect();
        assert_eq!(
            listed,
            vec![PROTOCOL_ACCESS, PROTOCOL_ATTENDANCE, PROTOCOL_CONSUME]
        );
    }

    #[test]
    fn test_get_missing_adapter() {
        let registry = AdapterRegistry::new(Arc::new(StaticDeviceCatalog::new()));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get(PROTOCOL_ACCESS),
            Err(Error::AdapterNotFound(p)) if p == PROTOCOL_ACCESS
        ));
    }

    #[test]
    fn test_register_replaces_and_unregister_removes() {
        let registry = AdapterRegistry::new(Arc::new(StaticDeviceCatalog::new()));
        assert!(registry.register(Arc::new(AccessAdapter::new(client()))).is_none());
        assert!(registry.register(Arc::new(AccessAdapter::new(client()))).is_some());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(PROTOCOL_ACCESS).is_some());
        assert!(registry.unregister(PROTOCOL_ACCESS).is_none());
        assert!(!registry.contains(PROTOCOL_ACCESS));
    }

    #[test]
    fn test_resolve_for_model() {
        let registry = AdapterRegistry::with_builtin(client());

        let adapter = registry.resolve_for_model("f18").unwrap();
        assert_eq!(adapter.identify().protocol_type, PROTOCOL_ACCESS);

        assert!(registry.is_device_model_supported("CM30"));
        assert!(matches!(
            registry.resolve_for_model("X-9000"),
            Err(Error::UnsupportedDeviceModel(_))
        ));
    }

    #[test]
    fn test_catalog_mapping_without_adapter() {
        let catalog = StaticDeviceCatalog::new()
            .with_model("CM20", PROTOCOL_CONSUME)
            .with_model("MA300", PROTOCOL_ACCESS);
        let registry = AdapterRegistry::new(Arc::new(catalog));
        registry.register(Arc::new(ConsumeAdapter::new(client())));

        assert!(registry.resolve_for_model("CM20").is_ok());
        assert!(matches!(
            registry.resolve_for_model("MA300"),
            Err(Error::AdapterNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_lookups_during_registration() {
        let registry = Arc::new(AdapterRegistry::with_builtin(client()));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i % 4 == 0 {
                            registry.register(Arc::new(AccessAdapter::new(client())));
                        }
                        let adapter = registry.get(PROTOCOL_ACCESS).unwrap();
                        assert_eq!(adapter.identify().protocol_type, PROTOCOL_ACCESS);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
