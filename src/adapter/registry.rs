//! Typed registry from service type to adapter.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Client;
use strum::IntoEnumIterator;

use super::arr::ArrAdapter;
use super::traits::{AdapterError, ServiceAdapter};
use crate::storage::ServiceType;

/// One adapter per [`ServiceType`].
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ServiceType, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an [`ArrAdapter`] for every service type, sharing one
    /// HTTP client.
    pub fn with_defaults() -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut registry = Self::new();
        for service_type in ServiceType::iter() {
            registry.register(Arc::new(ArrAdapter::new(service_type, client.clone())));
        }
        Ok(registry)
    }

    /// Install `adapter` for its service type, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters.insert(adapter.service_type(), adapter);
    }

    pub fn get(&self, service_type: ServiceType) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(&service_type).cloned()
    }

    pub fn contains(&self, service_type: ServiceType) -> bool {
        self.adapters.contains_key(&service_type)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("service_types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
