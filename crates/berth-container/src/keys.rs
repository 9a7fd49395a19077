//! Well-known configuration keys.

/// Plugin home directory, seeded before the property files are read.
pub const PLUGIN_HOME: &str = "plugin.home";

/// Host capability export string (`name;version="x"` list).
pub const CAPABILITIES_EXTRA: &str = "berth.capabilities.extra";

/// Runtime storage directory (`<home>/data/cache`).
pub const STORAGE_DIR: &str = "berth.storage.dir";

/// Auto-deploy staging directory (`<home>/deploy`).
pub const DEPLOY_DIR: &str = "berth.deploy.dir";

/// Comma-separated archive extensions the deploy scanner recognizes.
pub const DEPLOY_EXTENSIONS: &str = "berth.deploy.extensions";

/// Deploy directory poll interval in milliseconds.
pub const DEPLOY_POLL_INTERVAL_MS: &str = "berth.deploy.poll.interval.ms";

/// Quiet period after a filesystem event before the deploy directory is rescanned.
pub const DEPLOY_DEBOUNCE_MS: &str = "berth.deploy.debounce.ms";

/// Whether to use filesystem notifications in addition to polling.
pub const DEPLOY_WATCH: &str = "berth.deploy.watch";

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Default debounce.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default archive extension.
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "jar";
