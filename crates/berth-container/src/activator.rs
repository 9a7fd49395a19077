//! Module activators and the context they run in.
//!
//! Plugin code is bound to a module by name: the module descriptor names an
//! activator and the host supplies an [`ActivatorCatalog`] mapping names to
//! factories. A module without an activator is a library module; it only
//! contributes its exports.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_config::EffectiveConfig;
use berth_exports::ModuleDescriptor;

use crate::module::ModuleId;
use crate::registry::{Owner, ServiceRegistry, ServiceToken};

/// Entry point of a module's code.
pub trait ModuleActivator: Send + Sync {
    /// Start the module. Services published here stay registered until the
    /// module stops.
    ///
    /// # Errors
    ///
    /// An error leaves the module installed but not active.
    fn start(&self, ctx: &ModuleContext) -> anyhow::Result<()>;

    /// Stop the module. Its services are unregistered afterwards whether or
    /// not this succeeds.
    ///
    /// # Errors
    ///
    /// Errors are logged by the environment.
    fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

type ActivatorFactory = Arc<dyn Fn() -> Box<dyn ModuleActivator> + Send + Sync>;

/// Named activator factories supplied by the host.
#[derive(Clone, Default)]
pub struct ActivatorCatalog {
    factories: HashMap<String, ActivatorFactory>,
}

impl fmt::Debug for ActivatorCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ActivatorCatalog")
            .field("activators", &names)
            .finish()
    }
}

impl ActivatorCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `factory`.
    #[must_use]
    pub fn with_activator<F, A>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: ModuleActivator + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Bind `name` to `factory` in place, replacing any previous binding.
    pub fn register<F, A>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> A + Send + Sync + 'static,
        A: ModuleActivator + 'static,
    {
        let factory: ActivatorFactory =
            Arc::new(move || Box::new(factory()) as Box<dyn ModuleActivator>);
        self.factories.insert(name.into(), factory);
    }

    /// Whether `name` is bound.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the activator bound to `name`.
    #[must_use]
    pub fn create(&self, name: &str) -> Option<Box<dyn ModuleActivator>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// What a running module can see of the container.
///
/// Services published through the context are owned by the module and are
/// removed when it stops.
#[derive(Clone)]
pub struct ModuleContext {
    id: ModuleId,
    descriptor: ModuleDescriptor,
    location: PathBuf,
    data_dir: PathBuf,
    registry: Arc<ServiceRegistry>,
    config: Arc<EffectiveConfig>,
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("id", &self.id)
            .field("module", &self.descriptor.name)
            .field("location", &self.location)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl ModuleContext {
    pub(crate) fn new(
        id: ModuleId,
        descriptor: ModuleDescriptor,
        location: PathBuf,
        data_dir: PathBuf,
        registry: Arc<ServiceRegistry>,
        config: Arc<EffectiveConfig>,
    ) -> Self {
        Self {
            id,
            descriptor,
            location,
            data_dir,
            registry,
            config,
        }
    }

    /// The module's id.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// The module's descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// The archive the module was installed from.
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Directory the archive was extracted into.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// A container configuration property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.config.get(key)
    }

    /// Publish `service` under type `T`, owned by this module.
    pub fn publish<T>(&self, service: Arc<T>) -> ServiceToken
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.register::<T>(Owner::Module(self.id), service)
    }

    /// Withdraw a service before the module stops.
    pub fn unpublish(&self, token: ServiceToken) -> bool {
        self.registry.unregister(token)
    }

    /// First service published under `T`, by the host or any module.
    #[must_use]
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get::<T>()
    }

    /// Every service published under `T`.
    #[must_use]
    pub fn get_services<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.registry.get_all::<T>()
    }
}
