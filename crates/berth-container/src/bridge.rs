//! Host service bridge.
//!
//! The bridge holds the fixed set of host services that plugins may resolve.
//! The container calls [`ServiceBridge::provide`] once per start, after the
//! environment is initialized and before any deployed module starts, and
//! [`ServiceBridge::retract`] once per stop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::registry::{Owner, ServiceRegistry, ServiceToken};

/// The host's request-dispatch context, handed to plugins that route inbound
/// requests to their own handlers.
pub trait DispatchContext: Send + Sync {
    /// Path prefix under which the host serves requests, e.g. `/app`.
    fn context_path(&self) -> &str;

    /// A named host attribute.
    fn attribute(&self, name: &str) -> Option<String>;
}

/// A fixed [`DispatchContext`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDispatchContext {
    context_path: String,
    attributes: BTreeMap<String, String>,
}

impl HostDispatchContext {
    /// Create a context for `context_path`.
    #[must_use]
    pub fn new(context_path: impl Into<String>) -> Self {
        Self {
            context_path: context_path.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Add an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

impl DispatchContext for HostDispatchContext {
    fn context_path(&self) -> &str {
        &self.context_path
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.get(name).cloned()
    }
}

type Publisher = Arc<dyn Fn(&ServiceRegistry) -> ServiceToken + Send + Sync>;

/// Publishes a fixed set of host services into a container's registry.
#[derive(Clone, Default)]
pub struct ServiceBridge {
    publishers: Vec<(&'static str, Publisher)>,
}

impl fmt::Debug for ServiceBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBridge")
            .field(
                "services",
                &self.publishers.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ServiceBridge {
    /// Create a bridge with no services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `service` under type `T` on every container start.
    #[must_use]
    pub fn with_service<T>(mut self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let publish: Publisher = Arc::new(move |registry: &ServiceRegistry| {
            registry.register::<T>(Owner::Host, Arc::clone(&service))
        });
        self.publishers.push((std::any::type_name::<T>(), publish));
        self
    }

    /// Publish the host's dispatch context as `dyn DispatchContext`.
    #[must_use]
    pub fn with_dispatch_context(self, context: Arc<dyn DispatchContext>) -> Self {
        self.with_service::<dyn DispatchContext>(context)
    }

    /// Number of services the bridge publishes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    /// Whether the bridge publishes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }

    /// Publish every host service into `registry`.
    pub fn provide(&self, registry: &ServiceRegistry) -> Vec<ServiceToken> {
        let tokens: Vec<ServiceToken> = self
            .publishers
            .iter()
            .map(|(name, publish)| {
                let token = publish(registry);
                debug!(service_type = name, %token, "published host service");
                token
            })
            .collect();
        info!(count = tokens.len(), "host services published");
        tokens
    }

    /// Unpublish `tokens`. Tokens that are already gone are ignored.
    ///
    /// Returns how many registrations were actually removed.
    pub fn retract(&self, registry: &ServiceRegistry, tokens: &[ServiceToken]) -> usize {
        let removed = tokens
            .iter()
            .filter(|token| registry.unregister(**token))
            .count();
        info!(removed, requested = tokens.len(), "host services retracted");
        removed
    }
}
