//! Plugin-based component registry
//!
//! Container sources and name services register a factory under a type
//! name; the daemon then builds the configured ones without hard-coding
//! any implementation.
//!
//! ## Registration
//!
//! Implementations expose a `register` function:
//!
//! ```rust,ignore
//! // In the mdns-source-docker crate
//! pub fn register(registry: &ComponentRegistry) {
//!     registry.register_source("docker", Box::new(DockerFactory));
//! }
//! ```

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::config::{NameServiceConfig, SourceConfig};
use crate::error::{Error, Result};
use crate::traits::{ContainerSource, ContainerSourceFactory, NameService, NameServiceFactory};

/// Registry of container-source and name-service factories
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes.
#[derive(Default)]
pub struct ComponentRegistry {
    /// Registered container source factories
    sources: RwLock<HashMap<String, Box<dyn ContainerSourceFactory>>>,

    /// Registered name-service factories
    name_services: RwLock<HashMap<String, Box<dyn NameServiceFactory>>>,
}

impl ComponentRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container source factory
    ///
    /// # Parameters
    ///
    /// - `name`: Source type name (e.g., "docker")
    /// - `factory`: Factory object for creating source instances
    pub fn register_source(&self, name: impl Into<String>, factory: Box<dyn ContainerSourceFactory>) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.insert(name.into(), factory);
    }

    /// Register a name-service factory
    ///
    /// # Parameters
    ///
    /// - `name`: Name-service type name (e.g., "avahi")
    /// - `factory`: Factory object for creating name-service instances
    pub fn register_name_service(
        &self,
        name: impl Into<String>,
        factory: Box<dyn NameServiceFactory>,
    ) {
        let mut services = self
            .name_services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        services.insert(name.into(), factory);
    }

    /// Create a container source from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn ContainerSource>)`: Created source instance
    /// - `Err(Error)`: If the source type is not registered or creation fails
    pub fn create_source(&self, config: &SourceConfig) -> Result<Box<dyn ContainerSource>> {
        let source_type = config.type_name();
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);

        let factory = sources
            .get(source_type)
            .ok_or_else(|| Error::config(format!("Unknown container source type: {}", source_type)))?;

        factory.create(config)
    }

    /// Create a name service from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn NameService>)`: Created name-service instance
    /// - `Err(Error)`: If the service type is not registered or creation fails
    pub fn create_name_service(&self, config: &NameServiceConfig) -> Result<Box<dyn NameService>> {
        let service_type = config.type_name();
        let services = self
            .name_services
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let factory = services
            .get(service_type)
            .ok_or_else(|| Error::config(format!("Unknown name service type: {}", service_type)))?;

        factory.create(config)
    }

    /// List all registered container source types
    pub fn list_sources(&self) -> Vec<String> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = sources.keys().cloned().collect();
        names.sort();
        names
    }

    /// List all registered name-service types
    pub fn list_name_services(&self) -> Vec<String> {
        let services = self
            .name_services
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = services.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a container source type is registered
    pub fn has_source(&self, name: &str) -> bool {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Check if a name-service type is registered
    pub fn has_name_service(&self, name: &str) -> bool {
        self.name_services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockSourceFactory;

    impl ContainerSourceFactory for MockSourceFactory {
        fn create(&self, _config: &SourceConfig) -> Result<Box<dyn ContainerSource>> {
            Err(Error::container_source("Mock source not implemented"))
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = ComponentRegistry::new();

        assert!(!registry.has_source("mock"));

        registry.register_source("mock", Box::new(MockSourceFactory));

        assert!(registry.has_source("mock"));
        assert_eq!(registry.list_sources(), vec!["mock".to_string()]);
        assert!(registry.list_name_services().is_empty());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let registry = ComponentRegistry::new();

        let err = registry
            .create_name_service(&NameServiceConfig::Avahi)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("avahi"));
    }

    #[test]
    fn test_factory_errors_are_returned() {
        let registry = ComponentRegistry::new();
        registry.register_source("docker", Box::new(MockSourceFactory));

        let err = registry
            .create_source(&SourceConfig::Docker { host: None })
            .err()
            .unwrap();
        assert!(matches!(err, Error::ContainerSource(_)));
    }
}
