//! Installed module identity and state.

use std::fmt;

use semver::Version;

/// Identifier the environment assigns to an installed module.
///
/// Ids are never reused within one environment; a redeployed archive gets a
/// fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Name of the module's directory under the runtime storage directory.
    #[must_use]
    pub fn dir_name(self) -> String {
        format!("module-{}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The lifecycle state of an installed module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    /// Installed; not started, or waiting for its requirements.
    Installed,
    /// Activator `start` is running.
    Starting,
    /// Started and serving.
    Active,
    /// Activator `stop` is running.
    Stopping,
    /// Removed from the environment.
    Uninstalled,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Installed => "installed",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Uninstalled => "uninstalled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one installed module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledModule {
    /// Environment-assigned id.
    pub id: ModuleId,
    /// Where the module was installed from (the archive path).
    pub location: String,
    /// Module name from its descriptor.
    pub name: String,
    /// Module version from its descriptor.
    pub version: Version,
    /// Current state.
    pub state: ModuleState,
    /// Why the last start attempt failed, if it did.
    pub last_error: Option<String>,
}

impl InstalledModule {
    /// Whether the module is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == ModuleState::Active
    }
}

impl fmt::Display for InstalledModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [{}] ({})", self.name, self.version, self.id, self.state)
    }
}
