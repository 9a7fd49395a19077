//! The pluggable execution environment plugins run in.
//!
//! The container owns lifecycle and configuration; everything about how
//! module code is loaded, isolated and scheduled sits behind [`Environment`].
//! [`crate::LocalEnvironment`] runs activators in-process.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use berth_config::EffectiveConfig;

use crate::error::ContainerResult;
use crate::module::{InstalledModule, ModuleId};
use crate::registry::ServiceRegistry;

/// One instance of an execution environment, used for a single
/// start/stop cycle of the container.
pub trait Environment: Send + Sync {
    /// Apply the effective configuration. Called once, before anything else.
    ///
    /// # Errors
    ///
    /// Invalid configuration values.
    fn init(&self, config: &EffectiveConfig) -> ContainerResult<()>;

    /// The registry services are published into.
    fn registry(&self) -> Arc<ServiceRegistry>;

    /// Install and start every staged archive, then begin watching for new
    /// ones.
    ///
    /// # Errors
    ///
    /// Failure to begin auto-deploy. Individual modules that fail to start
    /// are not errors.
    fn start(&self) -> ContainerResult<()>;

    /// Stop every module and the auto-deploy watcher, waiting at most
    /// `timeout` (forever if `None`).
    ///
    /// # Errors
    ///
    /// [`crate::ContainerError::StopTimedOut`] if shutdown did not finish in
    /// time.
    fn stop(&self, timeout: Option<Duration>) -> ContainerResult<()>;

    /// Install the archive at `path` and start it if it resolves.
    ///
    /// # Errors
    ///
    /// The archive cannot be read or extracted.
    fn install_archive(&self, path: &Path) -> ContainerResult<ModuleId>;

    /// Snapshot of installed modules, ordered by id.
    fn modules(&self) -> Vec<InstalledModule>;
}

/// Creates a fresh [`Environment`] for each container start.
pub trait EnvironmentFactory: Send + Sync {
    /// Create an uninitialized environment.
    fn create(&self) -> Arc<dyn Environment>;
}
