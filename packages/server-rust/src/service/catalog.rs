//! Static table of service factories, keyed by locator.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_core::ServiceDescriptor;

use super::context::Service;
use super::error::BootError;
use super::registry::ServiceInstance;

type Factory = Arc<dyn Fn() -> anyhow::Result<ServiceInstance> + Send + Sync>;

/// Maps descriptor locators to constructors. Built once by the binary and
/// handed to the orchestrator.
#[derive(Clone, Default)]
pub struct ServiceCatalog {
    factories: HashMap<String, Factory>,
}

impl std::fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut locators: Vec<_> = self.factories.keys().collect();
        locators.sort();
        f.debug_struct("ServiceCatalog")
            .field("locators", &locators)
            .finish()
    }
}

impl ServiceCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an infallible constructor. A later registration for the
    /// same locator replaces the earlier one.
    #[must_use]
    pub fn with<T, F>(self, locator: impl Into<String>, factory: F) -> Self
    where
        T: Service,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.with_fallible(locator, move || Ok(factory()))
    }

    /// Registers a constructor that may fail.
    #[must_use]
    pub fn with_fallible<T, F>(mut self, locator: impl Into<String>, factory: F) -> Self
    where
        T: Service,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.factories.insert(
            locator.into(),
            Arc::new(move || factory().map(ServiceInstance::new)),
        );
        self
    }

    #[must_use]
    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }

    /// Builds the service a descriptor points at.
    ///
    /// # Errors
    ///
    /// `UnknownService` when no factory matches the descriptor's locator,
    /// `Instantiate` when the factory fails.
    pub fn instantiate(&self, descriptor: &ServiceDescriptor) -> Result<ServiceInstance, BootError> {
        let locator = descriptor.locator();
        let factory = self
            .factories
            .get(locator)
            .ok_or_else(|| BootError::UnknownService {
                name: descriptor.name.clone(),
                locator: locator.to_string(),
            })?;
        factory().map_err(|source| BootError::Instantiate {
            name: descriptor.name.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Service for Echo {}

    #[test]
    fn placeholder_prefix_is_stripped_from_locator() {
        let catalog = ServiceCatalog::new().with("services/echo", || Echo);
        let descriptor = ServiceDescriptor::enabled("echo").with_path("@/services/echo");
        assert!(catalog.instantiate(&descriptor).is_ok());
    }

    #[test]
    fn name_is_the_locator_when_path_is_empty() {
        let catalog = ServiceCatalog::new().with("echo", || Echo);
        assert!(catalog.instantiate(&ServiceDescriptor::enabled("echo")).is_ok());
        assert!(catalog.contains("echo"));
    }

    #[test]
    fn unknown_locator_is_reported() {
        let catalog = ServiceCatalog::new();
        let err = catalog
            .instantiate(&ServiceDescriptor::enabled("ghost").with_path("@/ghost"))
            .unwrap_err();
        assert!(
            matches!(err, BootError::UnknownService { ref name, ref locator } if name == "ghost" && locator == "ghost")
        );
    }

    #[test]
    fn factory_failure_is_an_instantiate_error() {
        let catalog = ServiceCatalog::new()
            .with_fallible("broken", || -> anyhow::Result<Echo> { anyhow::bail!("missing credentials") });
        let err = catalog
            .instantiate(&ServiceDescriptor::enabled("broken"))
            .unwrap_err();
        assert!(matches!(err, BootError::Instantiate { .. }));
        assert_eq!(err.to_string(), "failed to instantiate service 'broken'");
    }
}
