//! The plugin manager facade.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use berth_container::{
    ContainerError, ContainerListener, ContainerOptions, InstalledModule, ListenerSet,
    PluginContainer,
};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::error::{ManagerError, ManagerResult};
use crate::record::ConfigRecordSource;

/// Owns at most one [`PluginContainer`], created from the persisted plugin
/// configuration record.
///
/// `start`, `stop`, `install` and listener changes are serialized by one
/// lock. Lookups load the current container without locking, so they may
/// briefly report "not running" around a transition.
///
/// Construct one per host application and share it (typically in an
/// `Arc`); [`start`](Self::start) and [`stop`](Self::stop) may be called any
/// number of times.
pub struct PluginManager {
    records: Arc<dyn ConfigRecordSource>,
    options: ContainerOptions,
    lifecycle: Mutex<()>,
    container: ArcSwapOption<PluginContainer>,
    listeners: ListenerSet,
    initialized: AtomicBool,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("records", &self.records)
            .field("container", &self.container.load().as_deref().map(PluginContainer::home))
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl PluginManager {
    /// A manager reading its record from `records` and building containers
    /// with `options`.
    #[must_use]
    pub fn new(records: Arc<dyn ConfigRecordSource>, options: ContainerOptions) -> Self {
        Self {
            records,
            options,
            lifecycle: Mutex::new(()),
            container: ArcSwapOption::empty(),
            listeners: ListenerSet::new(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Start plugins if the configuration record enables them.
    ///
    /// A no-op when already started. With no record, an inactive record or
    /// an empty path this succeeds without starting anything. Listeners
    /// registered with the manager are attached before the container starts
    /// and are notified once the manager reports it as started, after the
    /// manager's lock is released. They may call back into the manager.
    ///
    /// # Errors
    ///
    /// - [`ManagerError::Record`] if the record could not be read
    /// - [`ManagerError::Container`] if the container failed to start; the
    ///   manager stays unstarted
    pub fn start(&self) -> ManagerResult<()> {
        let pending = {
            let _guard = self.lifecycle.lock();
            if self.container.load().is_some() {
                debug!("plugin manager already started");
                return Ok(());
            }

            let record = self
                .records
                .latest()
                .map_err(|e| ManagerError::Record(format!("{e:#}")))?;
            let Some(record) = record else {
                info!("no plugin configuration record, plugins disabled");
                return Ok(());
            };
            let Some(home) = record.home() else {
                info!(active = record.active, path = %record.path, "plugins disabled by configuration");
                return Ok(());
            };

            let container = Arc::new(PluginContainer::new(home, self.options.clone()));
            for listener in self.listeners.snapshot() {
                container.add_listener(listener);
            }
            let pending = container.start_deferred()?;
            self.container.store(Some(container));
            pending
        };
        pending.notify();
        Ok(())
    }

    /// Stop and discard the container. A no-op if not started.
    ///
    /// # Errors
    ///
    /// Container shutdown failures. The container is discarded regardless.
    pub fn stop(&self) -> ManagerResult<()> {
        self.stop_with_timeout(None)
    }

    /// Like [`stop`](Self::stop), waiting at most `timeout` for plugins.
    ///
    /// Listeners are notified after the manager's lock is released.
    ///
    /// # Errors
    ///
    /// [`ContainerError::StopTimedOut`] or other shutdown failures.
    pub fn stop_with_timeout(&self, timeout: Option<Duration>) -> ManagerResult<()> {
        let (result, pending) = {
            let _guard = self.lifecycle.lock();
            let Some(container) = self.container.swap(None) else {
                debug!("plugin manager not started");
                return Ok(());
            };
            container.stop_deferred(timeout)
        };
        pending.notify();
        Ok(result?)
    }

    /// Stage a plugin archive for deployment. See
    /// [`PluginContainer::install`].
    ///
    /// # Errors
    ///
    /// [`ContainerError::NotRunning`] if plugins are not started, otherwise
    /// the container's install errors.
    pub fn install<R: Read>(&self, location: &str, stream: R) -> ManagerResult<PathBuf> {
        let _guard = self.lifecycle.lock();
        let container = self.container.load_full().ok_or(ContainerError::NotRunning)?;
        Ok(container.install(location, stream)?)
    }

    /// First service published under `T`, or `None` if not started.
    #[must_use]
    pub fn get_service<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container.load_full()?.get_service::<T>()
    }

    /// Every service published under `T`; empty if not started.
    #[must_use]
    pub fn get_services<T>(&self) -> Vec<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.container
            .load_full()
            .map(|c| c.get_services::<T>())
            .unwrap_or_default()
    }

    /// Installed modules; empty if not started.
    #[must_use]
    pub fn get_bundles(&self) -> Vec<InstalledModule> {
        self.container
            .load_full()
            .map(|c| c.get_bundles())
            .unwrap_or_default()
    }

    /// Whether a container is running.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.container.load().as_deref().is_some_and(PluginContainer::is_running)
    }

    /// The running container, if any.
    #[must_use]
    pub fn container(&self) -> Option<Arc<PluginContainer>> {
        self.container.load_full()
    }

    /// Register a listener. It is kept across restarts and attached to the
    /// running container, if any. Returns `false` if already registered.
    pub fn add_listener(&self, listener: Arc<dyn ContainerListener>) -> bool {
        let _guard = self.lifecycle.lock();
        if let Some(container) = self.container.load_full() {
            container.add_listener(Arc::clone(&listener));
        }
        self.listeners.add(listener)
    }

    /// Unregister a listener from the manager and the running container.
    /// Returns `false` if it was not registered.
    pub fn remove_listener(&self, listener: &Arc<dyn ContainerListener>) -> bool {
        let _guard = self.lifecycle.lock();
        if let Some(container) = self.container.load_full() {
            container.remove_listener(listener);
        }
        self.listeners.remove(listener)
    }

    /// Host hook: call once the host application has finished its own
    /// initialization. Starts plugins on the first call only; failures are
    /// logged, never propagated.
    pub fn host_initialized(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            debug!("host already initialized");
            return;
        }
        if let Err(e) = self.start() {
            error!(error = %e, "failed to start plugins");
        }
    }

    /// Host hook: stop plugins and forget every listener.
    pub fn host_shutdown(&self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "failed to stop plugins");
        }
        let _guard = self.lifecycle.lock();
        self.listeners.clear();
    }
}
