//! Where host module descriptors come from.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::descriptor::ModuleDescriptor;
use crate::error::{ExportError, ExportResult};

/// A collection of host module descriptors.
///
/// Each item is reported separately so one malformed descriptor never hides
/// the others.
pub trait DescriptorSource: Send + Sync {
    /// Short label used in log output.
    fn label(&self) -> String;

    /// Every descriptor this source can see, in scan order.
    fn descriptors(&self) -> Vec<ExportResult<ModuleDescriptor>>;
}

impl<S: DescriptorSource + ?Sized> DescriptorSource for std::sync::Arc<S> {
    fn label(&self) -> String {
        (**self).label()
    }

    fn descriptors(&self) -> Vec<ExportResult<ModuleDescriptor>> {
        (**self).descriptors()
    }
}

#[derive(Debug, Clone)]
enum StaticEntry {
    Toml { origin: String, content: String },
    Parsed(ModuleDescriptor),
}

/// Descriptors compiled into the host, as TOML text or prebuilt values.
///
/// ```rust
/// use berth_exports::StaticSource;
///
/// let source = StaticSource::new("host").with_toml(
///     "billing",
///     "[module]\nname = \"acme.billing\"\n[[export]]\nname = \"acme.billing\"\nversion = \"1.2.0\"\n",
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    label: String,
    entries: Vec<StaticEntry>,
}

impl StaticSource {
    /// Create an empty static source.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
        }
    }

    /// Add a TOML descriptor, parsed on every scan.
    #[must_use]
    pub fn with_toml(mut self, origin: impl Into<String>, content: impl Into<String>) -> Self {
        self.entries.push(StaticEntry::Toml {
            origin: origin.into(),
            content: content.into(),
        });
        self
    }

    /// Add an already-built descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: ModuleDescriptor) -> Self {
        self.entries.push(StaticEntry::Parsed(descriptor));
        self
    }
}

impl DescriptorSource for StaticSource {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn descriptors(&self) -> Vec<ExportResult<ModuleDescriptor>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                StaticEntry::Toml { origin, content } => ModuleDescriptor::parse(origin, content),
                StaticEntry::Parsed(descriptor) => Ok(descriptor.clone()),
            })
            .collect()
    }
}

/// Every `*.toml` file directly inside a directory, in file name order.
///
/// A missing directory yields no descriptors.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    /// Scan `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The scanned directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn descriptor_paths(&self) -> ExportResult<Vec<PathBuf>> {
        let read_err = |source| ExportError::Read {
            path: self.dir.clone(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            let is_toml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
            if is_toml && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

impl DescriptorSource for DirectorySource {
    fn label(&self) -> String {
        self.dir.display().to_string()
    }

    fn descriptors(&self) -> Vec<ExportResult<ModuleDescriptor>> {
        if !self.dir.exists() {
            debug!(path = %self.dir.display(), "descriptor directory does not exist");
            return Vec::new();
        }
        match self.descriptor_paths() {
            Ok(paths) => paths.iter().map(|p| ModuleDescriptor::load(p)).collect(),
            Err(e) => vec![Err(e)],
        }
    }
}
