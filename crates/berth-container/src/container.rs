//! The plugin container lifecycle.
//!
//! ```text
//! stopped ──start()──► starting ──► running ──stop()──► stopping ──► stopped
//!                         │
//!                         └── failure ──► stopped
//! ```
//!
//! `start`, `stop`, `install` and listener registration are serialized by one
//! lifecycle lock. Lookups (`get_service`, `get_services`, `get_bundles`,
//! `is_running`) read a single atomically swapped reference and never block
//! behind a transition.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use berth_config::{ConfigLoader, EffectiveConfig};
use berth_exports::{CapabilityExporter, DescriptorSource, DirectorySource};
use parking_lot::{Mutex, RwLock};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::activator::ActivatorCatalog;
use crate::archive::{file_name_of, has_archive_extension};
use crate::bridge::ServiceBridge;
use crate::environment::{Environment, EnvironmentFactory};
use crate::error::{ContainerError, ContainerResult};
use crate::keys;
use crate::layout::PluginLayout;
use crate::listener::{ContainerListener, ListenerSet, PendingNotification};
use crate::local::LocalEnvironmentFactory;
use crate::module::InstalledModule;
use crate::registry::{ServiceRegistry, ServiceToken};

/// Container lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerState {
    /// Not running.
    Stopped,
    /// `start` is in progress.
    Starting,
    /// Running; plugins may be installed.
    Running,
    /// `stop` is in progress.
    Stopping,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// How a [`PluginContainer`] is assembled.
#[derive(Clone)]
pub struct ContainerOptions {
    archive_extensions: Vec<String>,
    host_sources: Vec<Arc<dyn DescriptorSource>>,
    bridge: ServiceBridge,
    environment: Arc<dyn EnvironmentFactory>,
    seeds: BTreeMap<String, String>,
    env_vars: Option<HashMap<String, String>>,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            archive_extensions: vec![keys::DEFAULT_ARCHIVE_EXTENSION.to_owned()],
            host_sources: Vec::new(),
            bridge: ServiceBridge::new(),
            environment: Arc::new(LocalEnvironmentFactory::default()),
            seeds: BTreeMap::new(),
            env_vars: None,
        }
    }
}

impl fmt::Debug for ContainerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerOptions")
            .field("archive_extensions", &self.archive_extensions)
            .field(
                "host_sources",
                &self.host_sources.iter().map(|s| s.label()).collect::<Vec<_>>(),
            )
            .field("bridge", &self.bridge)
            .field("seeds", &self.seeds)
            .finish_non_exhaustive()
    }
}

impl ContainerOptions {
    /// Defaults: `.jar` archives, no host services, in-process environment
    /// with no activators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the accepted archive extensions (without the dot).
    #[must_use]
    pub fn with_archive_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    /// Add a source of host module descriptors for capability export.
    /// `system/` under the plugin home is always scanned last.
    #[must_use]
    pub fn with_host_source(mut self, source: impl DescriptorSource + 'static) -> Self {
        self.host_sources.push(Arc::new(source));
        self
    }

    /// Host services published on every start.
    #[must_use]
    pub fn with_bridge(mut self, bridge: ServiceBridge) -> Self {
        self.bridge = bridge;
        self
    }

    /// Use a custom execution environment.
    #[must_use]
    pub fn with_environment(mut self, factory: Arc<dyn EnvironmentFactory>) -> Self {
        self.environment = factory;
        self
    }

    /// Run plugins in-process with activators from `catalog`.
    #[must_use]
    pub fn with_activators(self, catalog: ActivatorCatalog) -> Self {
        self.with_environment(Arc::new(LocalEnvironmentFactory::new(catalog)))
    }

    /// Seed a property before the property files are read.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.seeds.insert(key.into(), value.into());
        self
    }

    /// Resolve placeholders against `vars` instead of the process environment.
    #[must_use]
    pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.env_vars = Some(vars);
        self
    }

    /// Accepted archive extensions.
    #[must_use]
    pub fn archive_extensions(&self) -> &[String] {
        &self.archive_extensions
    }
}

struct Running {
    env: Arc<dyn Environment>,
    registry: Arc<ServiceRegistry>,
    tokens: Vec<ServiceToken>,
    layout: PluginLayout,
    config: Arc<EffectiveConfig>,
}

/// Runtime home for installed plugins.
pub struct PluginContainer {
    home: PathBuf,
    options: ContainerOptions,
    lifecycle: Mutex<()>,
    state: RwLock<ContainerState>,
    running: ArcSwapOption<Running>,
    listeners: ListenerSet,
}

impl fmt::Debug for PluginContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContainer")
            .field("home", &self.home)
            .field("state", &self.state())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl PluginContainer {
    /// Create a stopped container for `home`. Nothing is validated until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(home: impl Into<PathBuf>, options: ContainerOptions) -> Self {
        Self {
            home: home.into(),
            options,
            lifecycle: Mutex::new(()),
            state: RwLock::new(ContainerState::Stopped),
            running: ArcSwapOption::empty(),
            listeners: ListenerSet::new(),
        }
    }

    /// The configured plugin home.
    #[must_use]
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        *self.state.read()
    }

    /// Whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load().is_some()
    }

    /// Validated directory layout, while running.
    #[must_use]
    pub fn layout(&self) -> Option<PluginLayout> {
        self.running.load_full().map(|r| r.layout.clone())
    }

    /// Effective configuration, while running.
    #[must_use]
    pub fn config(&self) -> Option<Arc<EffectiveConfig>> {
        self.running.load_full().map(|r| Arc::clone(&r.config))
    }

    fn set_state(&self, state: ContainerState) {
        *self.state.write() = state;
        debug!(%state, "container state changed");
    }

    /// Start the container. A no-op if already running.
    ///
    /// On failure nothing is retained and the container stays stopped.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::InvalidHome`], [`ContainerError::MissingDirectory`],
    ///   [`ContainerError::NotADirectory`] for a bad plugin home
    /// - [`ContainerError::Configuration`] for missing or malformed property files
    /// - environment initialization or start failures
    pub fn start(&self) -> ContainerResult<()> {
        self.start_deferred()?.notify();
        Ok(())
    }

    /// Like [`start`](Self::start), but hands the `started` notification
    /// back instead of delivering it. The container is already running when
    /// this returns; listeners run when the caller calls
    /// [`PendingNotification::notify`].
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub fn start_deferred(&self) -> ContainerResult<PendingNotification> {
        let guard = self.lifecycle.lock();
        if self.running.load().is_some() {
            debug!("plugin container already running");
            return Ok(PendingNotification::none());
        }

        self.set_state(ContainerState::Starting);
        info!(home = %self.home.display(), "starting plugin container");
        let running = match self.boot() {
            Ok(running) => running,
            Err(e) => {
                self.set_state(ContainerState::Stopped);
                error!(home = %self.home.display(), error = %e, "plugin container failed to start");
                return Err(e);
            },
        };

        let modules = running.env.modules().len();
        self.running.store(Some(Arc::new(running)));
        self.set_state(ContainerState::Running);
        let listeners = self.listeners.snapshot();
        drop(guard);

        info!(modules, "plugin container started");
        Ok(PendingNotification::started(listeners))
    }

    fn boot(&self) -> ContainerResult<Running> {
        let layout = PluginLayout::prepare(&self.home)?;
        let exports = self.compute_exports(&layout);
        let config = Arc::new(self.load_config(&layout, exports)?);

        let env = self.options.environment.create();
        env.init(&config)?;
        let registry = env.registry();
        let tokens = self.options.bridge.provide(&registry);

        if let Err(e) = env.start() {
            if let Err(stop_err) = env.stop(None) {
                warn!(error = %stop_err, "failed to stop environment after start failure");
            }
            self.options.bridge.retract(&registry, &tokens);
            return Err(e);
        }

        Ok(Running {
            env,
            registry,
            tokens,
            layout,
            config,
        })
    }

    fn compute_exports(&self, layout: &PluginLayout) -> String {
        let mut exporter = CapabilityExporter::new();
        for source in &self.options.host_sources {
            exporter.add_source(Box::new(Arc::clone(source)));
        }
        exporter.add_source(Box::new(DirectorySource::new(&layout.system)));
        exporter.compute_exports()
    }

    fn load_config(&self, layout: &PluginLayout, exports: String) -> ContainerResult<EffectiveConfig> {
        let mut loader = ConfigLoader::new()
            .with_seeds(self.options.seeds.clone())
            .with_seed(keys::PLUGIN_HOME, layout.home.display().to_string())
            .with_seed(keys::CAPABILITIES_EXTRA, exports.clone());
        if let Some(vars) = &self.options.env_vars {
            loader = loader.with_env(vars.clone());
        }
        let mut config = loader.load(&layout.etc)?;

        // The container owns these regardless of what the files say.
        config.insert(keys::CAPABILITIES_EXTRA, exports);
        config.insert(keys::STORAGE_DIR, layout.cache.display().to_string());
        config.insert(keys::DEPLOY_DIR, layout.deploy.display().to_string());
        config.insert(keys::DEPLOY_EXTENSIONS, self.options.archive_extensions.join(","));
        debug!(properties = config.len(), files = config.loaded_files().len(), "loaded container configuration");
        Ok(config)
    }

    /// Stop the container, waiting as long as shutdown takes. A no-op if not
    /// running.
    ///
    /// # Errors
    ///
    /// Environment shutdown failures.
    pub fn stop(&self) -> ContainerResult<()> {
        self.stop_with_timeout(None)
    }

    /// Stop the container, waiting at most `timeout` for plugins to shut
    /// down.
    ///
    /// The container is discarded and listeners are notified even when this
    /// returns an error.
    ///
    /// # Errors
    ///
    /// [`ContainerError::StopTimedOut`] if shutdown took too long, or other
    /// environment failures.
    pub fn stop_with_timeout(&self, timeout: Option<Duration>) -> ContainerResult<()> {
        let (result, pending) = self.stop_deferred(timeout);
        pending.notify();
        result
    }

    /// Like [`stop_with_timeout`](Self::stop_with_timeout), but hands the
    /// `stopped` notification back instead of delivering it. The
    /// notification is returned even when shutdown failed.
    #[must_use = "the stopped notification is only delivered by `notify`"]
    pub fn stop_deferred(
        &self,
        timeout: Option<Duration>,
    ) -> (ContainerResult<()>, PendingNotification) {
        let guard = self.lifecycle.lock();
        let Some(running) = self.running.swap(None) else {
            debug!("plugin container not running");
            return (Ok(()), PendingNotification::none());
        };

        self.set_state(ContainerState::Stopping);
        info!(home = %self.home.display(), ?timeout, "stopping plugin container");
        let result = running.env.stop(timeout);
        let retracted = self.options.bridge.retract(&running.registry, &running.tokens);
        self.set_state(ContainerState::Stopped);
        let listeners = self.listeners.snapshot();
        drop(guard);

        match &result {
            Ok(()) => info!(retracted, "plugin container stopped"),
            Err(e) => error!(error = %e, "plugin container stopped uncleanly"),
        }
        (result, PendingNotification::stopped(listeners))
    }

    /// Stage a plugin archive in the deploy directory.
    ///
    /// The archive is written under a temporary name and renamed into place,
    /// so the deploy scanner only ever sees complete files. The scanner
    /// installs and starts it asynchronously. `stream` is dropped before
    /// returning, whatever the outcome.
    ///
    /// Returns the staged path.
    ///
    /// # Errors
    ///
    /// - [`ContainerError::NotRunning`] if the container is not running
    /// - [`ContainerError::InvalidName`] if `location` does not end in an
    ///   accepted archive extension
    /// - [`ContainerError::Staging`] if the file cannot be written
    pub fn install<R: Read>(&self, location: &str, mut stream: R) -> ContainerResult<PathBuf> {
        let _guard = self.lifecycle.lock();
        let Some(running) = self.running.load_full() else {
            return Err(ContainerError::NotRunning);
        };

        let name = file_name_of(location);
        if name.is_empty() {
            return Err(ContainerError::InvalidName {
                name: location.to_owned(),
                reason: "no file name".into(),
            });
        }
        let extensions = &self.options.archive_extensions;
        if !has_archive_extension(name, extensions) {
            return Err(ContainerError::InvalidName {
                name: location.to_owned(),
                reason: format!("expected a .{} archive", extensions.join(" or .")),
            });
        }

        let deploy = &running.layout.deploy;
        let target = deploy.join(name);
        let staging = |source| ContainerError::Staging {
            path: target.clone(),
            source,
        };
        std::fs::create_dir_all(deploy).map_err(staging)?;
        let mut staged = NamedTempFile::new_in(deploy).map_err(staging)?;
        let bytes = std::io::copy(&mut stream, &mut staged).map_err(staging)?;
        staged.as_file().sync_all().map_err(staging)?;
        staged.persist(&target).map_err(|e| staging(e.error))?;

        info!(location, path = %target.display(), bytes, "staged plugin for deployment");
        Ok(target)
    }

    /// First service published under `T`, or `None` if not running.
    #[must_use]
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.running.load_full()?.registry.get::<T>()
    }

    /// Every service published under `T`; empty if not running.
    #[must_use]
    pub fn get_services<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.running
            .load_full()
            .map(|r| r.registry.get_all::<T>())
            .unwrap_or_default()
    }

    /// Installed modules; empty if not running.
    #[must_use]
    pub fn get_bundles(&self) -> Vec<InstalledModule> {
        self.running
            .load_full()
            .map(|r| r.env.modules())
            .unwrap_or_default()
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) -> bool {
        let _guard = self.lifecycle.lock();
        self.listeners.add(listener)
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        let _guard = self.lifecycle.lock();
        self.listeners.remove(listener)
    }
}
