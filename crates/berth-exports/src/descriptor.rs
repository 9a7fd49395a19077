//! Module descriptors.
//!
//! A descriptor is a small TOML document:
//!
//! ```toml
//! [module]
//! name = "acme.invoicing"
//! version = "1.4.0"
//! activator = "acme.invoicing"   # optional
//!
//! [[export]]
//! name = "acme.invoicing.api"
//! version = "1.4.0"
//!
//! [[require]]
//! name = "acme.billing"
//! range = ">=1.2, <2"
//! ```
//!
//! Plugin archives carry one as `plugin.toml`; host descriptors are read
//! through a [`DescriptorSource`](crate::DescriptorSource).

use std::fmt;
use std::path::Path;

use semver::{Version, VersionReq};
use serde::Deserialize;

use crate::capability::{Capability, CapabilitySet, Requirement, validate_name};
use crate::error::{ExportError, ExportResult};

/// Descriptor file name inside a plugin archive.
pub const DESCRIPTOR_FILE_NAME: &str = "plugin.toml";

/// Metadata for one module: identity, exports and requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Module name.
    pub name: String,
    /// Module version.
    pub version: Version,
    /// Name of the activator the host binds to this module, if any.
    pub activator: Option<String>,
    /// Capabilities the module exports, in declaration order.
    pub exports: Vec<Capability>,
    /// Capabilities the module requires.
    pub requires: Vec<Requirement>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    module: RawModule,
    #[serde(default, rename = "export")]
    exports: Vec<RawExport>,
    #[serde(default, rename = "require")]
    requires: Vec<RawRequire>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
    name: String,
    version: Option<String>,
    activator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExport {
    name: String,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRequire {
    name: String,
    #[serde(default)]
    range: Option<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no exports or requirements.
    #[must_use]
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            activator: None,
            exports: Vec::new(),
            requires: Vec::new(),
        }
    }

    /// Parse a descriptor document. `origin` labels error messages.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Parse`] for invalid TOML,
    /// [`ExportError::InvalidName`], [`ExportError::InvalidVersion`] or
    /// [`ExportError::InvalidRange`] for invalid entries.
    pub fn parse(origin: &str, content: &str) -> ExportResult<Self> {
        let raw: RawDescriptor = toml::from_str(content).map_err(|e| ExportError::Parse {
            origin: origin.to_owned(),
            message: e.to_string(),
        })?;

        validate_name(&raw.module.name)?;
        let version = version_or_default(&raw.module.name, raw.module.version.as_deref())?;

        let exports = raw
            .exports
            .into_iter()
            .map(|export| {
                validate_name(&export.name)?;
                let version = version_or_default(&export.name, export.version.as_deref())?;
                Ok(Capability::new(export.name, version))
            })
            .collect::<ExportResult<Vec<_>>>()?;

        let requires = raw
            .requires
            .into_iter()
            .map(|require| {
                validate_name(&require.name)?;
                let range = match require.range.as_deref().map(str::trim) {
                    None | Some("" | "*") => VersionReq::STAR,
                    Some(range) => VersionReq::parse(range).map_err(|e| ExportError::InvalidRange {
                        name: require.name.clone(),
                        range: range.to_owned(),
                        message: e.to_string(),
                    })?,
                };
                Ok(Requirement::new(require.name, range))
            })
            .collect::<ExportResult<Vec<_>>>()?;

        Ok(Self {
            name: raw.module.name,
            version,
            activator: raw.module.activator.filter(|a| !a.trim().is_empty()),
            exports,
            requires,
        })
    }

    /// Read and parse a descriptor file.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Read`] if the file cannot be read, otherwise
    /// see [`parse`](Self::parse).
    pub fn load(path: &Path) -> ExportResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ExportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&path.display().to_string(), &content)
    }

    /// Add an export.
    #[must_use]
    pub fn with_export(mut self, name: impl Into<String>, version: Version) -> Self {
        self.exports.push(Capability::new(name, version));
        self
    }

    /// Add a requirement.
    #[must_use]
    pub fn with_require(mut self, name: impl Into<String>, range: VersionReq) -> Self {
        self.requires.push(Requirement::new(name, range));
        self
    }

    /// Set the activator name.
    #[must_use]
    pub fn with_activator(mut self, activator: impl Into<String>) -> Self {
        self.activator = Some(activator.into());
        self
    }

    /// The module's exports as a capability set (later duplicates win).
    #[must_use]
    pub fn export_set(&self) -> CapabilitySet {
        self.exports.iter().cloned().collect()
    }
}

impl fmt::Display for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

fn version_or_default(name: &str, raw: Option<&str>) -> ExportResult<Version> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(Version::new(0, 0, 0)),
        Some(raw) => parse_version(raw).map_err(|e| ExportError::InvalidVersion {
            name: name.to_owned(),
            version: raw.to_owned(),
            message: e.to_string(),
        }),
    }
}

/// Parse a version, accepting the short forms `1` and `1.2` as `1.0.0` and
/// `1.2.0`.
///
/// # Errors
///
/// Returns the [`semver::Error`] for anything else that is not semver.
pub fn parse_version(raw: &str) -> Result<Version, semver::Error> {
    let raw = raw.trim();
    match Version::parse(raw) {
        Ok(version) => Ok(version),
        Err(err) => {
            let parts: Vec<&str> = raw.split('.').collect();
            let short_numeric = (1..=2).contains(&parts.len())
                && parts
                    .iter()
                    .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()));
            if !short_numeric {
                return Err(err);
            }
            let mut padded = raw.to_owned();
            for _ in parts.len()..3 {
                padded.push_str(".0");
            }
            Version::parse(&padded)
        },
    }
}
