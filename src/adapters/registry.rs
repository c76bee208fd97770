use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::connection::BackendType;
use crate::error::{EngineError, Result};

use super::relational::{RelationalAdapter, SqlDialect};
use super::rest::RestAdapter;
use super::virtual_table::VirtualTableAdapter;
use super::{AdapterSettings, BackendAdapter};

/// Lookup from backend kind to the adapter serving it.
#[derive(Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<BackendType, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    /// Registers the built-in adapter for every backend kind.
    pub fn new(settings: AdapterSettings) -> Result<Self> {
        let mut registry = Self::empty();
        registry.register(Arc::new(RelationalAdapter::new(
            SqlDialect::MySql,
            settings.clone(),
        )));
        registry.register(Arc::new(RelationalAdapter::new(
            SqlDialect::Postgres,
            settings.clone(),
        )));
        registry.register(Arc::new(VirtualTableAdapter::new(settings.clone())?));
        registry.register(Arc::new(RestAdapter::new(settings)?));
        Ok(registry)
    }

    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Adds or replaces the adapter for its own backend kind.
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        let kind = adapter.backend_type();
        debug!("Registering adapter for {}", kind);
        self.adapters.insert(kind, adapter);
    }

    pub fn get(&self, kind: BackendType) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            EngineError::configuration(format!("no adapter registered for {}", kind))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_backend_kind_is_served() {
        let registry = AdapterRegistry::new(AdapterSettings::default()).unwrap();
        for kind in [
            BackendType::Mysql,
            BackendType::Postgresql,
            BackendType::VirtualTable,
            BackendType::RestApi,
        ] {
            assert_eq!(registry.get(kind).unwrap().backend_type(), kind);
        }
    }

    #[test]
    fn test_empty_registry_reports_missing_adapter() {
        let registry = AdapterRegistry::empty();
        assert!(registry.get(BackendType::RestApi).is_err());
    }
}
