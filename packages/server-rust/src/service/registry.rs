use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use fleet_core::ServiceState;
use parking_lot::RwLock;

use super::context::Service;
use super::error::BootError;

// ---------------------------------------------------------------------------
// ServiceInstance
// ---------------------------------------------------------------------------

/// A constructed service, kept both as a trait object for lifecycle calls
/// and as `Any` for typed lookup.
#[derive(Clone)]
pub struct ServiceInstance {
    pub(crate) service: Arc<dyn Service>,
    pub(crate) any: Arc<dyn Any + Send + Sync>,
}

impl ServiceInstance {
    pub fn new<T: Service>(service: T) -> Self {
        let arc = Arc::new(service);
        Self {
            service: arc.clone(),
            any: arc,
        }
    }
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

struct Entry {
    instance: Option<ServiceInstance>,
    state: ServiceState,
}

/// Every declared service with its lifecycle state; enabled ones also carry
/// their instance.
///
/// Declaration order is kept so shutdown can run in reverse.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: DashMap<String, Entry>,
    order: RwLock<Vec<String>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.states())
            .finish()
    }
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, entry: Entry) -> Result<(), BootError> {
        use dashmap::mapref::entry::Entry as Slot;
        match self.entries.entry(name.to_string()) {
            Slot::Occupied(_) => return Err(BootError::DuplicateService(name.to_string())),
            Slot::Vacant(slot) => {
                slot.insert(entry);
            }
        }
        self.order.write().push(name.to_string());
        Ok(())
    }

    /// Registers an enabled service in the `Unconfigured` state.
    ///
    /// # Errors
    ///
    /// `BootError::DuplicateService` if `name` is already declared.
    pub fn register(&self, name: &str, instance: ServiceInstance) -> Result<(), BootError> {
        self.insert(
            name,
            Entry {
                instance: Some(instance),
                state: ServiceState::Unconfigured,
            },
        )
    }

    /// Records a disabled service; it goes straight to `Skipped`.
    ///
    /// # Errors
    ///
    /// `BootError::DuplicateService` if `name` is already declared.
    pub fn skip(&self, name: &str) -> Result<(), BootError> {
        self.insert(
            name,
            Entry {
                instance: None,
                state: ServiceState::Skipped,
            },
        )
    }

    pub(crate) fn set_state(&self, name: &str, state: ServiceState) {
        if let Some(mut entry) = self.entries.get_mut(name) {
            entry.state = state;
        }
    }

    #[must_use]
    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.entries.get(name).map(|e| e.state)
    }

    /// Every declared service and its state, in declaration order.
    #[must_use]
    pub fn states(&self) -> Vec<(String, ServiceState)> {
        self.order
            .read()
            .iter()
            .filter_map(|name| self.state(name).map(|s| (name.clone(), s)))
            .collect()
    }

    /// Service instance by name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.entries
            .get(name)
            .and_then(|e| e.instance.as_ref().map(|i| Arc::clone(&i.service)))
    }

    /// Service instance by name, downcast to its concrete type.
    #[must_use]
    pub fn get<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.entries
            .get(name)
            .and_then(|e| e.instance.as_ref().map(|i| Arc::clone(&i.any)))
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Instances whose state is `state`, in declaration order.
    #[must_use]
    pub fn in_state(&self, state: ServiceState) -> Vec<(String, Arc<dyn Service>)> {
        self.order
            .read()
            .iter()
            .filter(|name| self.state(name) == Some(state))
            .filter_map(|name| self.get_by_name(name).map(|s| (name.clone(), s)))
            .collect()
    }

    /// Instances that passed configure, in declaration order.
    #[must_use]
    pub fn started(&self) -> Vec<(String, Arc<dyn Service>)> {
        self.order
            .read()
            .iter()
            .filter(|name| {
                matches!(
                    self.state(name),
                    Some(ServiceState::Configured | ServiceState::Initializing | ServiceState::Initialized)
                )
            })
            .filter_map(|name| self.get_by_name(name).map(|s| (name.clone(), s)))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
