//! In-process execution environment.
//!
//! Plugin archives are extracted into the runtime storage directory and their
//! activators, looked up by name in an [`ActivatorCatalog`], run on the
//! environment's own threads. A module starts once every requirement in its
//! descriptor is satisfied by:
//! - the runtime itself (`berth.*` at this crate's version, any `std.*`)
//! - the host's exported capabilities (`berth.capabilities.extra`)
//! - the exports of active modules, or the module's own exports

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, SystemTime};

use arc_swap::{ArcSwap, ArcSwapOption};
use berth_config::EffectiveConfig;
use berth_exports::{Capability, CapabilitySet, ModuleDescriptor, Requirement};
use parking_lot::Mutex;
use semver::Version;
use tracing::{debug, error, info, warn};

use crate::activator::{ActivatorCatalog, ModuleActivator, ModuleContext};
use crate::archive::{PluginArchive, is_archive_path};
use crate::environment::{Environment, EnvironmentFactory};
use crate::error::{ContainerError, ContainerResult};
use crate::keys;
use crate::listener::panic_message;
use crate::module::{InstalledModule, ModuleId, ModuleState};
use crate::registry::{Owner, ServiceRegistry};
use crate::scanner::{self, ScannerHandle};

/// Creates [`LocalEnvironment`]s sharing one activator catalog.
#[derive(Debug, Clone, Default)]
pub struct LocalEnvironmentFactory {
    catalog: ActivatorCatalog,
}

impl LocalEnvironmentFactory {
    /// Create a factory whose environments bind activators from `catalog`.
    #[must_use]
    pub fn new(catalog: ActivatorCatalog) -> Self {
        Self { catalog }
    }
}

impl EnvironmentFactory for LocalEnvironmentFactory {
    fn create(&self) -> Arc<dyn Environment> {
        Arc::new(LocalEnvironment::new(self.catalog.clone()))
    }
}

/// Runtime settings read from the effective configuration at init.
#[derive(Debug)]
pub(crate) struct Settings {
    pub(crate) deploy_dir: PathBuf,
    pub(crate) storage_dir: PathBuf,
    pub(crate) extensions: Vec<String>,
    pub(crate) poll_interval: Duration,
    pub(crate) debounce: Duration,
    pub(crate) watch: bool,
    host_capabilities: CapabilitySet,
    native_version: Version,
    config: Arc<EffectiveConfig>,
}

impl Settings {
    fn from_config(config: &EffectiveConfig) -> ContainerResult<Self> {
        let required = |key: &str| {
            config
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| ContainerError::Environment(format!("missing property '{key}'")))
        };

        let mut extensions: Vec<String> = config
            .get_or(keys::DEPLOY_EXTENSIONS, "")
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.trim_start_matches('.').to_owned())
            .collect();
        if extensions.is_empty() {
            extensions.push(keys::DEFAULT_ARCHIVE_EXTENSION.to_owned());
        }

        let native_version = Version::parse(env!("CARGO_PKG_VERSION"))
            .map_err(|e| ContainerError::Environment(format!("invalid runtime version: {e}")))?;

        Ok(Self {
            deploy_dir: required(keys::DEPLOY_DIR)?,
            storage_dir: required(keys::STORAGE_DIR)?,
            extensions,
            poll_interval: config.get_millis(
                keys::DEPLOY_POLL_INTERVAL_MS,
                Duration::from_millis(keys::DEFAULT_POLL_INTERVAL_MS),
            )?,
            debounce: config.get_millis(
                keys::DEPLOY_DEBOUNCE_MS,
                Duration::from_millis(keys::DEFAULT_DEBOUNCE_MS),
            )?,
            watch: config.get_parsed::<bool>(keys::DEPLOY_WATCH)?.unwrap_or(true),
            host_capabilities: CapabilitySet::parse(config.get_or(keys::CAPABILITIES_EXTRA, ""))?,
            native_version,
            config: Arc::new(config.clone()),
        })
    }

    fn is_satisfied(
        &self,
        requirement: &Requirement,
        available: &CapabilitySet,
        own: &[Capability],
    ) -> bool {
        let name = requirement.name.as_str();
        if name == "std" || name.starts_with("std.") {
            return true;
        }
        if name == "berth" || name.starts_with("berth.") {
            return requirement.range.matches(&self.native_version);
        }
        available.satisfies(requirement) || own.iter().any(|c| requirement.matches(c))
    }

    fn unsatisfied<'a>(
        &self,
        descriptor: &'a ModuleDescriptor,
        available: &CapabilitySet,
    ) -> Vec<&'a Requirement> {
        descriptor
            .requires
            .iter()
            .filter(|r| !self.is_satisfied(r, available, &descriptor.exports))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    /// `None` if `path` is not a regular file.
    fn of(path: &Path) -> std::io::Result<Option<Self>> {
        let meta = std::fs::metadata(path)?;
        Ok(meta.is_file().then(|| Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }))
    }
}

struct Activation {
    activator: Option<Box<dyn ModuleActivator>>,
    context: ModuleContext,
}

struct ModuleEntry {
    id: ModuleId,
    path: PathBuf,
    hash: String,
    stamp: FileStamp,
    descriptor: ModuleDescriptor,
    data_dir: PathBuf,
    state: ModuleState,
    last_error: Option<String>,
    reported_unresolved: bool,
    activation: Option<Activation>,
}

impl ModuleEntry {
    fn snapshot(&self) -> InstalledModule {
        InstalledModule {
            id: self.id,
            location: self.path.display().to_string(),
            name: self.descriptor.name.clone(),
            version: self.descriptor.version.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Default)]
struct ModuleTable {
    next_id: u64,
    modules: BTreeMap<ModuleId, ModuleEntry>,
    by_path: HashMap<PathBuf, ModuleId>,
    /// Archives that failed to install, skipped until they change.
    failed: HashMap<PathBuf, FileStamp>,
    activation_order: Vec<ModuleId>,
}

/// State shared between the environment and its deploy scanner.
pub(crate) struct Shared {
    catalog: ActivatorCatalog,
    registry: Arc<ServiceRegistry>,
    settings: ArcSwapOption<Settings>,
    table: Mutex<ModuleTable>,
    snapshot: ArcSwap<Vec<InstalledModule>>,
    stopped: AtomicBool,
}

impl Shared {
    fn settings(&self) -> ContainerResult<Arc<Settings>> {
        self.settings
            .load_full()
            .ok_or_else(|| ContainerError::Environment("environment is not initialized".into()))
    }

    fn ensure_live(&self) -> ContainerResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ContainerError::Environment("environment is stopped".into()));
        }
        Ok(())
    }

    /// Reconcile the deploy directory and start whatever now resolves.
    pub(crate) fn rescan(&self, settings: &Settings) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut table = self.table.lock();
        if let Err(e) = self.scan_deploy(&mut table, settings) {
            warn!(path = %settings.deploy_dir.display(), error = %e, "failed to scan deploy directory");
        }
        self.resolve_and_start_all(&mut table, settings);
        self.publish_snapshot(&table);
    }

    fn publish_snapshot(&self, table: &ModuleTable) {
        let modules = table.modules.values().map(ModuleEntry::snapshot).collect();
        self.snapshot.store(Arc::new(modules));
    }

    fn scan_deploy(&self, table: &mut ModuleTable, settings: &Settings) -> ContainerResult<()> {
        let mut found: BTreeMap<PathBuf, FileStamp> = BTreeMap::new();
        for entry in std::fs::read_dir(&settings.deploy_dir)? {
            let path = entry?.path();
            if !is_archive_path(&path, &settings.extensions) {
                continue;
            }
            match FileStamp::of(&path) {
                Ok(Some(stamp)) => {
                    found.insert(path, stamp);
                },
                Ok(None) => {},
                Err(e) => debug!(path = %path.display(), error = %e, "archive vanished during scan"),
            }
        }

        let removed: Vec<ModuleId> = table
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(&settings.deploy_dir) && !found.contains_key(*path))
            .map(|(_, id)| *id)
            .collect();
        for id in removed {
            info!(module_id = %id, "archive removed from deploy directory");
            self.uninstall(table, id);
        }
        table.failed.retain(|path, _| found.contains_key(path));

        for (path, stamp) in found {
            if let Some(&id) = table.by_path.get(&path) {
                self.refresh(table, settings, id, &path, stamp);
            } else if table.failed.get(&path) != Some(&stamp) {
                self.deploy(table, settings, &path, stamp);
            }
        }
        Ok(())
    }

    /// Redeploy `id` if its archive's content changed.
    fn refresh(
        &self,
        table: &mut ModuleTable,
        settings: &Settings,
        id: ModuleId,
        path: &Path,
        stamp: FileStamp,
    ) {
        let Some((old_stamp, old_hash)) = table.modules.get(&id).map(|e| (e.stamp, e.hash.clone()))
        else {
            return;
        };
        if old_stamp == stamp {
            return;
        }
        match hash_file(path) {
            Ok(hash) if hash == old_hash => {
                debug!(module_id = %id, path = %path.display(), "archive touched, content unchanged");
                if let Some(entry) = table.modules.get_mut(&id) {
                    entry.stamp = stamp;
                }
            },
            Ok(hash) => {
                info!(module_id = %id, path = %path.display(), hash = %hash, "archive changed, redeploying");
                self.uninstall(table, id);
                self.deploy(table, settings, path, stamp);
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "archive unreadable, retrying on next scan");
            },
        }
    }

    fn deploy(
        &self,
        table: &mut ModuleTable,
        settings: &Settings,
        path: &Path,
        stamp: FileStamp,
    ) -> Option<ModuleId> {
        match self.install(table, settings, path, stamp) {
            Ok(id) => {
                table.failed.remove(path);
                Some(id)
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to install plugin archive");
                table.failed.insert(path.to_path_buf(), stamp);
                None
            },
        }
    }

    fn install(
        &self,
        table: &mut ModuleTable,
        settings: &Settings,
        path: &Path,
        stamp: FileStamp,
    ) -> ContainerResult<ModuleId> {
        let archive = PluginArchive::open(path)?;
        table.next_id = table.next_id.saturating_add(1);
        let id = ModuleId::new(table.next_id);

        let data_dir = settings.storage_dir.join(id.dir_name());
        if data_dir.exists() {
            std::fs::remove_dir_all(&data_dir)?;
        }
        std::fs::create_dir_all(&data_dir)?;
        if let Err(e) = archive.extract(&data_dir) {
            remove_data_dir(&data_dir);
            return Err(e);
        }

        let descriptor = archive.descriptor().clone();
        info!(module_id = %id, module = %descriptor, path = %path.display(), "installed module");
        table.by_path.insert(path.to_path_buf(), id);
        table.modules.insert(
            id,
            ModuleEntry {
                id,
                path: path.to_path_buf(),
                hash: archive.hash().to_owned(),
                stamp,
                descriptor,
                data_dir,
                state: ModuleState::Installed,
                last_error: None,
                reported_unresolved: false,
                activation: None,
            },
        );
        Ok(id)
    }

    fn uninstall(&self, table: &mut ModuleTable, id: ModuleId) {
        self.stop_module(table, id);
        if let Some(entry) = table.modules.get_mut(&id) {
            entry.state = ModuleState::Uninstalled;
        }
        self.publish_snapshot(table);

        if let Some(entry) = table.modules.remove(&id) {
            if table.by_path.get(&entry.path) == Some(&id) {
                table.by_path.remove(&entry.path);
            }
            remove_data_dir(&entry.data_dir);
            info!(module_id = %id, module = %entry.descriptor, "uninstalled module");
        }
    }

    fn available_capabilities(table: &ModuleTable, settings: &Settings) -> CapabilitySet {
        let mut available = settings.host_capabilities.clone();
        available.extend(
            table
                .modules
                .values()
                .filter(|e| e.state == ModuleState::Active)
                .flat_map(|e| e.descriptor.exports.iter().cloned()),
        );
        available
    }

    /// Start installed modules until no more resolve.
    ///
    /// Modules whose activator failed are not retried until their archive
    /// changes.
    fn resolve_and_start_all(&self, table: &mut ModuleTable, settings: &Settings) {
        loop {
            let available = Self::available_capabilities(table, settings);
            let next = table
                .modules
                .values()
                .find(|e| {
                    e.state == ModuleState::Installed
                        && e.last_error.is_none()
                        && settings.unsatisfied(&e.descriptor, &available).is_empty()
                })
                .map(|e| e.id);
            let Some(id) = next else {
                break;
            };
            // Failures are recorded on the entry, which stops it being picked again.
            let _ = self.start_module(table, settings, id);
        }

        let available = Self::available_capabilities(table, settings);
        for entry in table
            .modules
            .values_mut()
            .filter(|e| e.state == ModuleState::Installed && e.last_error.is_none())
        {
            let missing = settings.unsatisfied(&entry.descriptor, &available);
            if missing.is_empty() || entry.reported_unresolved {
                continue;
            }
            let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
            warn!(
                module_id = %entry.id,
                module = %entry.descriptor,
                missing = %missing.join(", "),
                "module has unsatisfied requirements"
            );
            entry.reported_unresolved = true;
        }
    }

    fn start_module(
        &self,
        table: &mut ModuleTable,
        settings: &Settings,
        id: ModuleId,
    ) -> ContainerResult<()> {
        let entry = table
            .modules
            .get_mut(&id)
            .ok_or(ContainerError::ModuleNotFound(id))?;
        entry.state = ModuleState::Starting;
        let context = ModuleContext::new(
            id,
            entry.descriptor.clone(),
            entry.path.clone(),
            entry.data_dir.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&settings.config),
        );
        let activator_name = entry.descriptor.activator.clone();
        self.publish_snapshot(table);

        let result = match activator_name.as_deref() {
            None => Ok(None),
            Some(name) => match self.catalog.create(name) {
                None => Err(format!("no activator named '{name}' is registered")),
                Some(activator) => run_guarded(|| activator.start(&context)).map(|()| Some(activator)),
            },
        };

        let entry = table
            .modules
            .get_mut(&id)
            .ok_or(ContainerError::ModuleNotFound(id))?;
        match result {
            Ok(activator) => {
                entry.state = ModuleState::Active;
                entry.last_error = None;
                entry.reported_unresolved = false;
                entry.activation = Some(Activation { activator, context });
                info!(module_id = %id, module = %entry.descriptor, "module started");
                table.activation_order.push(id);
                Ok(())
            },
            Err(message) => {
                entry.state = ModuleState::Installed;
                entry.last_error = Some(message.clone());
                let module = entry.descriptor.to_string();
                let removed = self.registry.unregister_owner(Owner::Module(id));
                warn!(module_id = %id, module = %module, error = %message, services_removed = removed, "module failed to start");
                Err(ContainerError::Activator { module, message })
            },
        }
    }

    /// Stop an active module, first stopping active modules that depend on
    /// its exports.
    fn stop_module(&self, table: &mut ModuleTable, id: ModuleId) {
        let Some(entry) = table.modules.get_mut(&id) else {
            return;
        };
        if entry.state != ModuleState::Active {
            return;
        }
        entry.state = ModuleState::Stopping;
        let activation = entry.activation.take();
        self.publish_snapshot(table);

        for dependent in self.dependents(table, id) {
            debug!(module_id = %dependent, provider = %id, "stopping dependent module");
            self.stop_module(table, dependent);
        }

        if let Some(Activation {
            activator: Some(activator),
            context,
        }) = activation
            && let Err(message) = run_guarded(|| activator.stop(&context))
        {
            warn!(module_id = %id, error = %message, "module failed to stop cleanly");
        }

        let removed = self.registry.unregister_owner(Owner::Module(id));
        table.activation_order.retain(|m| *m != id);
        if let Some(entry) = table.modules.get_mut(&id) {
            entry.state = ModuleState::Installed;
            info!(module_id = %id, module = %entry.descriptor, services_removed = removed, "module stopped");
        }
    }

    /// Active modules with a requirement only `id` satisfies. `id` must
    /// already be out of the active state.
    fn dependents(&self, table: &ModuleTable, id: ModuleId) -> Vec<ModuleId> {
        let Some(provider) = table.modules.get(&id) else {
            return Vec::new();
        };
        let mut remaining = self
            .settings
            .load_full()
            .map(|s| s.host_capabilities.clone())
            .unwrap_or_default();
        remaining.extend(
            table
                .modules
                .values()
                .filter(|e| e.state == ModuleState::Active)
                .flat_map(|e| e.descriptor.exports.iter().cloned()),
        );
        table
            .modules
            .values()
            .filter(|e| e.state == ModuleState::Active && e.id != id)
            .filter(|e| {
                e.descriptor.requires.iter().any(|r| {
                    provider.descriptor.exports.iter().any(|c| r.matches(c))
                        && !remaining.satisfies(r)
                        && !e.descriptor.exports.iter().any(|c| r.matches(c))
                })
            })
            .map(|e| e.id)
            .collect()
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        let mut table = self.table.lock();
        let order: Vec<ModuleId> = table.activation_order.iter().rev().copied().collect();
        for id in order {
            self.stop_module(&mut table, id);
        }
        for entry in table.modules.values_mut() {
            entry.state = ModuleState::Uninstalled;
        }
        let count = table.modules.len();
        table.modules.clear();
        table.by_path.clear();
        table.failed.clear();
        self.snapshot.store(Arc::new(Vec::new()));
        info!(modules = count, "environment stopped");
    }
}

/// Run activator code, turning errors and panics into a message.
fn run_guarded(f: impl FnOnce() -> anyhow::Result<()>) -> Result<(), String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(format!("panicked: {}", panic_message(&*panic))),
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(std::fs::File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

fn remove_data_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %dir.display(), error = %e, "failed to remove module data directory");
    }
}

/// Runs plugin activators in the host process.
pub struct LocalEnvironment {
    shared: Arc<Shared>,
    scanner: Mutex<Option<ScannerHandle>>,
}

impl std::fmt::Debug for LocalEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEnvironment")
            .field("modules", &self.shared.snapshot.load().len())
            .field("services", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}

impl LocalEnvironment {
    /// Create an environment binding activators from `catalog`.
    #[must_use]
    pub fn new(catalog: ActivatorCatalog) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog,
                registry: Arc::new(ServiceRegistry::new()),
                settings: ArcSwapOption::empty(),
                table: Mutex::new(ModuleTable::default()),
                snapshot: ArcSwap::from_pointee(Vec::new()),
                stopped: AtomicBool::new(false),
            }),
            scanner: Mutex::new(None),
        }
    }

    /// Scan the deploy directory now instead of waiting for the scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment is not initialized or stopped.
    pub fn rescan(&self) -> ContainerResult<()> {
        let settings = self.shared.settings()?;
        self.shared.ensure_live()?;
        self.shared.rescan(&settings);
        Ok(())
    }
}

impl Environment for LocalEnvironment {
    fn init(&self, config: &EffectiveConfig) -> ContainerResult<()> {
        if self.shared.settings.load().is_some() {
            return Err(ContainerError::Environment("environment already initialized".into()));
        }
        let settings = Settings::from_config(config)?;
        debug!(
            deploy = %settings.deploy_dir.display(),
            storage = %settings.storage_dir.display(),
            extensions = ?settings.extensions,
            watch = settings.watch,
            poll_interval = ?settings.poll_interval,
            host_capabilities = settings.host_capabilities.len(),
            "initialized local environment"
        );
        self.shared.settings.store(Some(Arc::new(settings)));
        Ok(())
    }

    fn registry(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.shared.registry)
    }

    fn start(&self) -> ContainerResult<()> {
        let settings = self.shared.settings()?;
        self.shared.ensure_live()?;
        let mut scanner = self.scanner.lock();
        if scanner.is_some() {
            return Ok(());
        }
        self.shared.rescan(&settings);
        *scanner = Some(scanner::spawn(Arc::clone(&self.shared), settings)?);
        info!(modules = self.shared.snapshot.load().len(), "local environment started");
        Ok(())
    }

    fn stop(&self, timeout: Option<Duration>) -> ContainerResult<()> {
        let scanner = self.scanner.lock().take();
        let shared = Arc::clone(&self.shared);
        let (done_tx, done_rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("berth-env-shutdown".into())
            .spawn(move || {
                if let Some(scanner) = scanner {
                    scanner.shutdown();
                }
                shared.shutdown();
                let _ = done_tx.send(());
            })?;

        let outcome = match timeout {
            None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            Some(timeout) => done_rx.recv_timeout(timeout),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                let timeout = timeout.unwrap_or_default();
                error!(?timeout, "environment did not stop in time");
                Err(ContainerError::StopTimedOut { timeout })
            },
            Err(RecvTimeoutError::Disconnected) => Err(ContainerError::Environment(
                "environment shutdown panicked".into(),
            )),
        }
    }

    fn install_archive(&self, path: &Path) -> ContainerResult<ModuleId> {
        let settings = self.shared.settings()?;
        self.shared.ensure_live()?;
        let stamp = FileStamp::of(path)?.ok_or_else(|| ContainerError::Archive {
            path: path.to_path_buf(),
            message: "not a regular file".into(),
        })?;

        let mut table = self.shared.table.lock();
        if let Some(&previous) = table.by_path.get(path) {
            self.shared.uninstall(&mut table, previous);
        }
        let result = self.shared.install(&mut table, &settings, path, stamp);
        self.shared.resolve_and_start_all(&mut table, &settings);
        self.shared.publish_snapshot(&table);
        result
    }

    fn modules(&self) -> Vec<InstalledModule> {
        self.shared.snapshot.load().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::testing::{Behavior, Probe, ProbeActivator, deploy, descriptor};

    struct Home {
        _dir: tempfile::TempDir,
        deploy: PathBuf,
        storage: PathBuf,
    }

    fn home() -> Home {
        let dir = tempfile::tempdir().unwrap();
        let deploy = dir.path().join("deploy");
        let storage = dir.path().join("data/cache");
        std::fs::create_dir_all(&deploy).unwrap();
        std::fs::create_dir_all(&storage).unwrap();
        Home {
            _dir: dir,
            deploy,
            storage,
        }
    }

    fn config(home: &Home) -> EffectiveConfig {
        let mut config = EffectiveConfig::new();
        config.insert(keys::DEPLOY_DIR, home.deploy.display().to_string());
        config.insert(keys::STORAGE_DIR, home.storage.display().to_string());
        config.insert(keys::DEPLOY_WATCH, "false");
        config.insert(keys::DEPLOY_POLL_INTERVAL_MS, "0");
        config.insert(keys::CAPABILITIES_EXTRA, "acme.host;version=\"2.1.0\"");
        config
    }

    fn catalog(probe: &Arc<Probe>) -> ActivatorCatalog {
        let ok = Arc::clone(probe);
        let failing = Arc::clone(probe);
        let panicking = Arc::clone(probe);
        ActivatorCatalog::new()
            .with_activator("ok", move || ProbeActivator {
                probe: Arc::clone(&ok),
                behavior: Behavior::Ok,
            })
            .with_activator("fail", move || ProbeActivator {
                probe: Arc::clone(&failing),
                behavior: Behavior::Fail,
            })
            .with_activator("panic", move || ProbeActivator {
                probe: Arc::clone(&panicking),
                behavior: Behavior::Panic,
            })
    }

    fn environment(home: &Home, probe: &Arc<Probe>) -> LocalEnvironment {
        let env = LocalEnvironment::new(catalog(probe));
        env.init(&config(home)).unwrap();
        env
    }

    fn state_of(env: &LocalEnvironment, name: &str) -> Option<ModuleState> {
        env.modules().into_iter().find(|m| m.name == name).map(|m| m.state)
    }

    #[test]
    fn test_start_installs_staged_archives() {
        let home = home();
        deploy(&home.deploy, "a.jar", &descriptor("acme.a", Some("ok"), &[], &[]));
        deploy(&home.deploy, "notes.txt", "ignored");
        let probe = Arc::new(Probe::default());
        let env = environment(&home, &probe);

        env.start().unwrap();

        let modules = env.modules();
        assert_eq!(modules.len(), 1);
        assert!(modules[0].is_active());
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        assert_eq!(env.registry().get::<String>().unwrap().as_str(), "acme.a");
        assert!(home.storage.join("module-1/plugin.toml").is_file());

        env.stop(None).unwrap();
        assert!(env.modules().is_empty());
        assert!(env.registry().is_empty());
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_requirements_resolve_across_modules() {
        let home = home();
        // Consumer sorts first but needs the provider's export.
        deploy(
            &home.deploy,
            "a-consumer.jar",
            &descriptor("acme.consumer", None, &[], &[("acme.api", "^1.2")]),
        );
        deploy(
            &home.deploy,
            "b-provider.jar",
            &descriptor("acme.provider", None, &[("acme.api", "1.4.0")], &[("acme.host", ">=2")]),
        );
        deploy(
            &home.deploy,
            "c-orphan.jar",
            &descriptor("acme.orphan", None, &[], &[("acme.missing", "*")]),
        );
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();

        assert_eq!(state_of(&env, "acme.consumer"), Some(ModuleState::Active));
        assert_eq!(state_of(&env, "acme.provider"), Some(ModuleState::Active));
        assert_eq!(state_of(&env, "acme.orphan"), Some(ModuleState::Installed));
        env.stop(None).unwrap();
    }

    #[test]
    fn test_native_capabilities() {
        let home = home();
        deploy(
            &home.deploy,
            "native.jar",
            &descriptor("acme.native", None, &[], &[("berth.container", "0.*"), ("std.io", "*")]),
        );
        deploy(
            &home.deploy,
            "future.jar",
            &descriptor("acme.future", None, &[], &[("berth.container", ">=99")]),
        );
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();
        assert_eq!(state_of(&env, "acme.native"), Some(ModuleState::Active));
        assert_eq!(state_of(&env, "acme.future"), Some(ModuleState::Installed));
        env.stop(None).unwrap();
    }

    #[test]
    fn test_failing_and_panicking_activators() {
        let home = home();
        deploy(&home.deploy, "fail.jar", &descriptor("acme.fail", Some("fail"), &[], &[]));
        deploy(&home.deploy, "panic.jar", &descriptor("acme.panic", Some("panic"), &[], &[]));
        deploy(&home.deploy, "unknown.jar", &descriptor("acme.unknown", Some("nope"), &[], &[]));
        deploy(&home.deploy, "ok.jar", &descriptor("acme.ok", Some("ok"), &[], &[]));
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();

        let modules = env.modules();
        let by_name = |name: &str| modules.iter().find(|m| m.name == name).unwrap();
        assert_eq!(by_name("acme.fail").state, ModuleState::Installed);
        assert!(by_name("acme.fail").last_error.as_deref().unwrap().contains("refusing"));
        assert!(by_name("acme.panic").last_error.as_deref().unwrap().contains("exploded"));
        assert!(by_name("acme.unknown").last_error.as_deref().unwrap().contains("nope"));
        assert!(by_name("acme.ok").is_active());
        env.stop(None).unwrap();
    }

    #[test]
    fn test_rescan_handles_removal_and_redeploy() {
        let home = home();
        let a = deploy(&home.deploy, "a.jar", &descriptor("acme.a", Some("ok"), &[], &[]));
        let probe = Arc::new(Probe::default());
        let env = environment(&home, &probe);
        env.start().unwrap();
        let first_id = env.modules()[0].id;

        // Same content, new mtime: no redeploy.
        std::fs::write(&a, std::fs::read(&a).unwrap()).unwrap();
        env.rescan().unwrap();
        assert_eq!(env.modules()[0].id, first_id);

        std::fs::write(
            &a,
            crate::testing::archive(&descriptor("acme.a2", Some("ok"), &[], &[])),
        )
        .unwrap();
        env.rescan().unwrap();
        let modules = env.modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].name, "acme.a2");
        assert_ne!(modules[0].id, first_id);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 1);

        std::fs::remove_file(&a).unwrap();
        env.rescan().unwrap();
        assert!(env.modules().is_empty());
        assert!(env.registry().is_empty());
        env.stop(None).unwrap();
    }

    #[test]
    fn test_removing_provider_stops_dependents() {
        let home = home();
        let provider = deploy(
            &home.deploy,
            "provider.jar",
            &descriptor("acme.provider", None, &[("acme.api", "1.0.0")], &[]),
        );
        deploy(
            &home.deploy,
            "consumer.jar",
            &descriptor("acme.consumer", Some("ok"), &[], &[("acme.api", "1")]),
        );
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();
        assert_eq!(state_of(&env, "acme.consumer"), Some(ModuleState::Active));

        std::fs::remove_file(provider).unwrap();
        env.rescan().unwrap();
        assert_eq!(state_of(&env, "acme.consumer"), Some(ModuleState::Installed));
        assert!(env.registry().get::<String>().is_none());
        env.stop(None).unwrap();
    }

    #[test]
    fn test_invalid_archive_is_skipped_until_changed() {
        let home = home();
        let bad = home.deploy.join("bad.jar");
        std::fs::write(&bad, b"not an archive").unwrap();
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();
        assert!(env.modules().is_empty());

        std::fs::write(&bad, crate::testing::archive(&descriptor("acme.fixed", None, &[], &[])))
            .unwrap();
        env.rescan().unwrap();
        assert_eq!(state_of(&env, "acme.fixed"), Some(ModuleState::Active));
        env.stop(None).unwrap();
    }

    #[test]
    fn test_install_archive_outside_deploy_dir() {
        let home = home();
        let elsewhere = tempfile::tempdir().unwrap();
        let path = deploy(elsewhere.path(), "x.jar", &descriptor("acme.x", None, &[], &[]));
        let env = environment(&home, &Arc::new(Probe::default()));
        env.start().unwrap();

        let id = env.install_archive(&path).unwrap();
        env.rescan().unwrap();
        let modules = env.modules();
        assert_eq!(modules.len(), 1);
        assert_eq!(modules[0].id, id);
        assert!(modules[0].is_active());
        env.stop(None).unwrap();
    }

    #[test]
    fn test_uninitialized_and_stopped() {
        let env = LocalEnvironment::new(ActivatorCatalog::new());
        assert!(matches!(env.start(), Err(ContainerError::Environment(_))));

        let home = home();
        let env = environment(&home, &Arc::new(Probe::default()));
        assert!(matches!(env.init(&config(&home)), Err(ContainerError::Environment(_))));
        env.start().unwrap();
        env.stop(None).unwrap();
        env.stop(None).unwrap();
        let path = deploy(&home.deploy, "late.jar", &descriptor("acme.late", None, &[], &[]));
        assert!(env.install_archive(&path).is_err());
    }

    #[test]
    fn test_missing_deploy_property() {
        let env = LocalEnvironment::new(ActivatorCatalog::new());
        let err = env.init(&EffectiveConfig::new()).unwrap_err();
        assert!(matches!(err, ContainerError::Environment(ref m) if m.contains(keys::DEPLOY_DIR)));
    }

    struct Stuck(Mutex<std::sync::mpsc::Receiver<()>>);

    impl ModuleActivator for Stuck {
        fn start(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
            let _ = self.0.lock().recv_timeout(Duration::from_secs(5));
            Ok(())
        }
    }

    #[test]
    fn test_stop_timeout() {
        let home = home();
        deploy(&home.deploy, "stuck.jar", &descriptor("acme.stuck", Some("stuck"), &[], &[]));
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let release_rx = Arc::new(Mutex::new(Some(release_rx)));
        let catalog = ActivatorCatalog::new().with_activator("stuck", move || {
            let (_unused_tx, fallback) = std::sync::mpsc::channel();
            Stuck(Mutex::new(release_rx.lock().take().unwrap_or(fallback)))
        });
        let env = LocalEnvironment::new(catalog);
        env.init(&config(&home)).unwrap();
        env.start().unwrap();

        let err = env.stop(Some(Duration::from_millis(50))).unwrap_err();
        assert!(matches!(err, ContainerError::StopTimedOut { .. }));
        release_tx.send(()).unwrap();
    }
}
