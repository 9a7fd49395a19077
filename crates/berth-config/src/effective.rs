use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// The fully-resolved key/value configuration used to start a container.
///
/// Keys iterate in lexicographic order. Values never contain unresolved
/// `${...}` placeholders once produced by [`ConfigLoader`](crate::ConfigLoader).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveConfig {
    values: BTreeMap<String, String>,
    loaded_files: Vec<PathBuf>,
}

impl EffectiveConfig {
    /// Create an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up a value, falling back to `default`.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parse a value into `T`. Blank values count as absent.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value does not parse.
    pub fn get_parsed<T>(&self, key: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.get(key).map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_owned(),
                value: raw.to_owned(),
                message: e.to_string(),
            })
    }

    /// Read a millisecond count as a [`Duration`], or `default` if unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the value is not a
    /// non-negative integer.
    pub fn get_millis(&self, key: &str, default: Duration) -> ConfigResult<Duration> {
        Ok(self
            .get_parsed::<u64>(key)?
            .map_or(default, Duration::from_millis))
    }

    /// Set a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Whether `key` is set.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the configuration is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Property files that contributed to this configuration, in load order.
    #[must_use]
    pub fn loaded_files(&self) -> &[PathBuf] {
        &self.loaded_files
    }

    pub(crate) fn record_file(&mut self, path: &Path) {
        self.loaded_files.push(path.to_path_buf());
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for EffectiveConfig {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.values
            .extend(iter.into_iter().map(|(k, v)| (k.into(), v.into())));
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EffectiveConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Self::new();
        config.extend(iter);
        config
    }
}
