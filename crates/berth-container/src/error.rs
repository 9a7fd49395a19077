//! Container error types.

use std::path::PathBuf;
use std::time::Duration;

use berth_config::ConfigError;
use berth_exports::ExportError;

use crate::module::ModuleId;

/// Errors from plugin container operations.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The startup configuration could not be loaded.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The plugin home is missing or not a directory.
    #[error("invalid plugin home {path}: {message}")]
    InvalidHome {
        /// The configured home path.
        path: PathBuf,
        /// Why it was rejected.
        message: String,
    },

    /// A required directory does not exist.
    #[error("directory doesn't exist: {0}")]
    MissingDirectory(PathBuf),

    /// A path that must be a directory is something else.
    #[error("invalid directory: {0}")]
    NotADirectory(PathBuf),

    /// The operation requires a running container.
    #[error("plugin container is not running")]
    NotRunning,

    /// The install location does not name a plugin archive.
    #[error("invalid plugin name '{name}': {reason}")]
    InvalidName {
        /// The rejected location.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A plugin could not be staged in the deploy directory.
    #[error("failed to stage plugin at {path}: {source}")]
    Staging {
        /// The staging target.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A capability string or module descriptor is invalid.
    #[error("descriptor error: {0}")]
    Descriptor(#[from] ExportError),

    /// A plugin archive could not be read or extracted.
    #[error("archive error at {path}: {message}")]
    Archive {
        /// Path to the archive.
        path: PathBuf,
        /// Failure description.
        message: String,
    },

    /// A module's activator failed or panicked.
    #[error("activator for {module} failed: {message}")]
    Activator {
        /// The module whose activator failed.
        module: String,
        /// Failure description.
        message: String,
    },

    /// A module id is not known to the environment.
    #[error("module not found: {0}")]
    ModuleNotFound(ModuleId),

    /// The execution environment failed.
    #[error("environment error: {0}")]
    Environment(String),

    /// The environment did not finish shutting down in time.
    #[error("plugin container did not stop within {timeout:?}")]
    StopTimedOut {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

/// Result type for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;
