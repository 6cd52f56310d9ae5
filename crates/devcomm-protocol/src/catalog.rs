//! Device model → protocol type lookup.
//!
//! The vendor catalog is an external collaborator; [`DeviceCatalog`] is its
//! boundary. [`StaticDeviceCatalog`] answers from a fixed table, usually
//! built from the model lists of the registered adapters.

use crate::adapter::ProtocolAdapter;
use std::collections::HashMap;
use std::sync::Arc;

pub trait DeviceCatalog: Send + Sync {
    /// Protocol type spoken by a device model, if known.
    fn resolve_protocol_type(&self, device_model: &str) -> Option<String>;

    fn is_device_model_supported(&self, device_model: &str) -> bool {
        self.resolve_protocol_type(device_model).is_some()
    }
}

/// In-memory catalog with case-insensitive model matching.
#[derive(Debug, Clone, Default)]
pub struct StaticDeviceCatalog {
    models: HashMap<String, String>,
}

impl StaticDeviceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a model to a protocol type, replacing any previous mapping.
    pub fn with_model(mut self, device_model: &str, protocol_type: &str) -> Self {
        self.insert(device_model, protocol_type);
        self
    }

    pub fn insert(&mut self, device_model: &str, protocol_type: &str) {
        self.models
            .insert(device_model.trim().to_ascii_uppercase(), protocol_type.to_string());
    }

    /// Catalog listing every model each adapter declares.
    pub fn from_adapters<'a, I>(adapters: I) -> Self
    where
        I: IntoIterator<Item = &'a Arc<dyn ProtocolAdapter>>,
    {
        let mut catalog = Self::new();
        for adapter in adapters {
            let protocol_type = adapter.identify().protocol_type;
            for model in adapter.supported_device_models() {
                catalog.insert(model, &protocol_type);
            }
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl DeviceCatalog for StaticDeviceCatalog {
    fn resolve_protocol_type(&self, device_model: &str) -> Option<String> {
        self.models
            .get(&device_model.trim().to_ascii_uppercase())
            .cloned()
    }
}
