//! Capabilities, requirements and capability sets.

use std::collections::BTreeMap;
use std::fmt;

use semver::{Version, VersionReq};

use crate::descriptor::parse_version;
use crate::error::{ExportError, ExportResult};

/// Namespaces the runtime provides natively and hosts never re-export.
pub const RESERVED_PREFIXES: &[&str] = &["berth.", "std."];

/// Whether `name` belongs to a reserved namespace.
///
/// The bare namespace root (`berth`, `std`) is reserved too.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| {
        name.starts_with(prefix) || prefix.strip_suffix('.').is_some_and(|root| name == root)
    })
}

/// Check a module or capability name: dot-separated segments of ASCII
/// alphanumerics, `_` and `-`.
pub(crate) fn validate_name(name: &str) -> ExportResult<()> {
    let valid = !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ExportError::InvalidName(name.to_owned()))
    }
}

/// A named, versioned capability a module exports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Capability {
    /// Capability name, e.g. `acme.billing`.
    pub name: String,
    /// Exported version.
    pub version: Version,
}

impl Capability {
    /// Create a capability.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};version=\"{}\"", self.name, self.version)
    }
}

/// A capability a module needs, with the range of versions it accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Capability name.
    pub name: String,
    /// Accepted versions.
    pub range: VersionReq,
}

impl Requirement {
    /// Create a requirement.
    #[must_use]
    pub fn new(name: impl Into<String>, range: VersionReq) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    /// Whether `capability` satisfies this requirement.
    #[must_use]
    pub fn matches(&self, capability: &Capability) -> bool {
        capability.name == self.name && self.range.matches(&capability.version)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.range)
    }
}

/// Deduplicated capability name → version map, ordered by name.
///
/// Inserting a name that is already present replaces its version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: BTreeMap<String, Version>,
}

impl CapabilitySet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a capability, returning the version it replaced.
    pub fn insert(&mut self, capability: Capability) -> Option<Version> {
        self.entries.insert(capability.name, capability.version)
    }

    /// Version exported under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Version> {
        self.entries.get(name)
    }

    /// Whether `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether some entry satisfies `requirement`.
    #[must_use]
    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        self.get(&requirement.name)
            .is_some_and(|version| requirement.range.matches(version))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Version)> {
        self.entries.iter().map(|(name, version)| (name.as_str(), version))
    }

    /// Serialize as a comma-separated `name;version="x.y.z"` list.
    #[must_use]
    pub fn to_export_string(&self) -> String {
        self.entries
            .iter()
            .map(|(name, version)| format!("{name};version=\"{version}\""))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse an export string produced by [`to_export_string`](Self::to_export_string).
    ///
    /// Entries without a `version` attribute get `0.0.0`; unknown attributes
    /// are ignored. Blank input is an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::InvalidName`] or [`ExportError::InvalidVersion`]
    /// for a malformed entry.
    pub fn parse(input: &str) -> ExportResult<Self> {
        let mut set = Self::new();
        for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.split(';').map(str::trim);
            let name = parts.next().unwrap_or_default();
            validate_name(name)?;

            let mut version = Version::new(0, 0, 0);
            for attribute in parts {
                let Some((key, value)) = attribute.split_once('=') else {
                    continue;
                };
                if key.trim() != "version" {
                    continue;
                }
                let raw = value.trim().trim_matches('"');
                version = parse_version(raw).map_err(|e| ExportError::InvalidVersion {
                    name: name.to_owned(),
                    version: raw.to_owned(),
                    message: e.to_string(),
                })?;
            }
            set.insert(Capability::new(name, version));
        }
        Ok(set)
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_export_string())
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl Extend<Capability> for CapabilitySet {
    fn extend<I: IntoIterator<Item = Capability>>(&mut self, iter: I) {
        for capability in iter {
            self.insert(capability);
        }
    }
}
