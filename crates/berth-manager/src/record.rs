//! Persisted plugin configuration records.
//!
//! The host stores whether plugins are enabled and where their home
//! directory lives. The manager only ever needs the most recently created
//! record of kind [`PLUGIN_CONFIGURATION_KIND`], so the storage behind it is
//! abstracted as a [`ConfigRecordSource`].

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::debug;

/// Record kind holding the plugin configuration.
pub const PLUGIN_CONFIGURATION_KIND: &str = "plugin-configuration";

/// Whether plugins are enabled, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfigRecord {
    /// Plugins are enabled.
    pub active: bool,
    /// Plugin home directory.
    pub path: String,
}

impl PluginConfigRecord {
    /// An active record pointing at `path`.
    #[must_use]
    pub fn active(path: impl Into<String>) -> Self {
        Self {
            active: true,
            path: path.into(),
        }
    }

    /// The plugin home, if the record enables plugins and names one.
    #[must_use]
    pub fn home(&self) -> Option<PathBuf> {
        let path = self.path.trim();
        (self.active && !path.is_empty()).then(|| PathBuf::from(path))
    }
}

/// Reads the current plugin configuration record.
pub trait ConfigRecordSource: Send + Sync + fmt::Debug {
    /// The most recently created plugin configuration record, or `None` if
    /// there is none.
    ///
    /// # Errors
    ///
    /// The backing store could not be read.
    fn latest(&self) -> anyhow::Result<Option<PluginConfigRecord>>;
}

/// In-memory record, replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticRecordSource {
    record: RwLock<Option<PluginConfigRecord>>,
}

impl StaticRecordSource {
    /// A source holding `record`.
    #[must_use]
    pub fn new(record: Option<PluginConfigRecord>) -> Self {
        Self {
            record: RwLock::new(record),
        }
    }

    /// Replace the record.
    pub fn set(&self, record: Option<PluginConfigRecord>) {
        *self.record.write() = record;
    }
}

impl ConfigRecordSource for StaticRecordSource {
    fn latest(&self) -> anyhow::Result<Option<PluginConfigRecord>> {
        Ok(self.record.read().clone())
    }
}

/// Records stored in a TOML file:
///
/// ```toml
/// [[record]]
/// kind = "plugin-configuration"
/// created = "2024-03-01T09:00:00Z"
/// active = true
/// path = "/srv/plugins"
/// ```
///
/// A missing file means no record.
#[derive(Debug, Clone)]
pub struct FileRecordSource {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RecordFile {
    #[serde(default, rename = "record")]
    records: Vec<StoredRecord>,
}

#[derive(Debug, Deserialize)]
struct StoredRecord {
    kind: String,
    created: DateTime<Utc>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    path: String,
}

impl FileRecordSource {
    /// Read records from `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The record file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigRecordSource for FileRecordSource {
    fn latest(&self) -> anyhow::Result<Option<PluginConfigRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no plugin configuration record file");
                return Ok(None);
            },
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", self.path.display()));
            },
        };
        let file: RecordFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        // Later entries win ties on `created`.
        let latest = file
            .records
            .into_iter()
            .filter(|r| r.kind == PLUGIN_CONFIGURATION_KIND)
            .max_by_key(|r| r.created);
        Ok(latest.map(|r| PluginConfigRecord {
            active: r.active,
            path: r.path,
        }))
    }
}
