//! Cross-boundary service registry.
//!
//! Services are keyed by the type they are published under, usually a trait
//! object type such as `dyn Greeter`. Lookups return registrations in
//! publication order, so "first match" is deterministic.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::module::ModuleId;

/// Who published a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// The host application, through the service bridge.
    Host,
    /// An installed module.
    Module(ModuleId),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => f.write_str("host"),
            Self::Module(id) => write!(f, "module {id}"),
        }
    }
}

/// Handle to one registration, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceToken(u64);

impl fmt::Display for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "service-{}", self.0)
    }
}

/// Description of a registration, without the service itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    /// Registration handle.
    pub token: ServiceToken,
    /// Name of the type the service was published under.
    pub type_name: &'static str,
    /// Publisher.
    pub owner: Owner,
}

struct Entry {
    token: ServiceToken,
    type_id: TypeId,
    type_name: &'static str,
    owner: Owner,
    /// Holds an `Arc<T>` for the `T` behind `type_id`.
    service: Box<dyn Any + Send + Sync>,
}

/// Registry of published services.
#[derive(Default)]
pub struct ServiceRegistry {
    next_token: AtomicU64,
    entries: RwLock<Vec<Entry>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.len())
            .finish()
    }
}

impl ServiceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `service` under type `T`.
    pub fn register<T>(&self, owner: Owner, service: Arc<T>) -> ServiceToken
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let token = ServiceToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let type_name = std::any::type_name::<T>();
        self.entries.write().push(Entry {
            token,
            type_id: TypeId::of::<T>(),
            type_name,
            owner,
            service: Box::new(service),
        });
        debug!(%token, %owner, service_type = type_name, "registered service");
        token
    }

    /// Remove one registration. Returns `false` if it was already gone.
    pub fn unregister(&self, token: ServiceToken) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.token != token);
        let removed = entries.len() != before;
        if removed {
            debug!(%token, "unregistered service");
        } else {
            trace!(%token, "service already unregistered");
        }
        removed
    }

    /// Remove every registration published by `owner`, returning how many.
    pub fn unregister_owner(&self, owner: Owner) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.owner != owner);
        let removed = before.saturating_sub(entries.len());
        if removed > 0 {
            debug!(%owner, removed, "unregistered services");
        }
        removed
    }

    /// First service published under `T`.
    #[must_use]
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        self.entries
            .read()
            .iter()
            .filter(|e| e.type_id == type_id)
            .find_map(|e| e.service.downcast_ref::<Arc<T>>().cloned())
    }

    /// Every service published under `T`, in publication order.
    #[must_use]
    pub fn get_all<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        self.entries
            .read()
            .iter()
            .filter(|e| e.type_id == type_id)
            .filter_map(|e| e.service.downcast_ref::<Arc<T>>().cloned())
            .collect()
    }

    /// Descriptions of every registration, in publication order.
    #[must_use]
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.entries
            .read()
            .iter()
            .map(|e| ServiceRegistration {
                token: e.token,
                type_name: e.type_name,
                owner: e.owner,
            })
            .collect()
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every registration.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Fixed(&'static str);

    impl Greeter for Fixed {
        fn greet(&self) -> String {
            self.0.to_owned()
        }
    }

    #[test]
    fn test_lookup_by_trait_object_type() {
        let registry = ServiceRegistry::new();
        registry.register::<dyn Greeter>(Owner::Host, Arc::new(Fixed("first")));
        registry.register::<dyn Greeter>(Owner::Host, Arc::new(Fixed("second")));
        registry.register(Owner::Host, Arc::new(42_u32));

        assert_eq!(registry.get::<dyn Greeter>().unwrap().greet(), "first");
        let all: Vec<_> = registry
            .get_all::<dyn Greeter>()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(all, vec!["first", "second"]);
        assert_eq!(*registry.get::<u32>().unwrap(), 42);
        assert!(registry.get::<String>().is_none());
        assert!(registry.get_all::<String>().is_empty());
    }

    #[test]
    fn test_unregister_tolerates_missing_tokens() {
        let registry = ServiceRegistry::new();
        let token = registry.register(Owner::Host, Arc::new(1_u8));
        assert!(registry.unregister(token));
        assert!(!registry.unregister(token));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_owner() {
        let registry = ServiceRegistry::new();
        let module = Owner::Module(ModuleId::new(7));
        registry.register(module, Arc::new(1_u8));
        registry.register(module, Arc::new(2_u16));
        registry.register(Owner::Host, Arc::new(3_u8));

        assert_eq!(registry.unregister_owner(module), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(*registry.get::<u8>().unwrap(), 3);
        assert_eq!(registry.registrations()[0].owner, Owner::Host);
    }
}
