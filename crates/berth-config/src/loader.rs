//! Property file discovery and layered loading.
//!
//! Implements the startup configuration algorithm:
//! 1. Start from the seed values supplied by the host
//! 2. Layer `etc/config.properties` (base)
//! 3. Layer `etc/startup.properties` (startup overrides)
//!
//! Each value of a layer is expanded against that layer, the values
//! accumulated so far and an environment snapshot before it is merged.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::effective::EffectiveConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::properties::{self, Properties};
use crate::substitute::Substitutor;

/// Base property file name.
pub const BASE_CONFIG_FILE: &str = "config.properties";

/// Startup override property file name.
pub const STARTUP_CONFIG_FILE: &str = "startup.properties";

/// Required property files, lowest priority first.
pub const CONFIG_FILES: [&str; 2] = [BASE_CONFIG_FILE, STARTUP_CONFIG_FILE];

/// Builds an [`EffectiveConfig`] from a configuration directory.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    seeds: BTreeMap<String, String>,
    env: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    /// Create a loader with no seeds that snapshots the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a seed value. Seeds have the lowest priority.
    #[must_use]
    pub fn with_seed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.seeds.insert(key.into(), value.into());
        self
    }

    /// Add several seed values.
    #[must_use]
    pub fn with_seeds<I, K, V>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.seeds
            .extend(seeds.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Use a fixed environment instead of the process environment.
    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    /// Load both property files from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if either file is missing or unreadable,
    /// [`ConfigError::Parse`] for a malformed line and
    /// [`ConfigError::Syntax`]/[`ConfigError::Cycle`] for bad placeholders.
    pub fn load(&self, dir: &Path) -> ConfigResult<EffectiveConfig> {
        let env = self.env.clone().unwrap_or_else(collect_env_vars);
        let mut config: EffectiveConfig = self.seeds.clone().into_iter().collect();

        for name in CONFIG_FILES {
            let path = dir.join(name);
            let layer = read_layer(&path)?;
            let resolved = resolve_layer(&layer, config.as_map(), &env)?;
            debug!(path = %path.display(), entries = resolved.len(), "merged property layer");
            config.extend(resolved);
            config.record_file(&path);
        }

        info!(dir = %dir.display(), entries = config.len(), "loaded container configuration");
        Ok(config)
    }

    /// Resolve a single layer of raw properties against `config`, then merge
    /// it in.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Syntax`] or [`ConfigError::Cycle`].
    pub fn load_layer(&self, layer: &Properties, config: &mut EffectiveConfig) -> ConfigResult<()> {
        let env = self.env.clone().unwrap_or_else(collect_env_vars);
        let resolved = resolve_layer(layer, config.as_map(), &env)?;
        config.extend(resolved);
        Ok(())
    }
}

fn read_layer(path: &Path) -> ConfigResult<Properties> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    properties::parse(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_layer(
    layer: &Properties,
    config: &BTreeMap<String, String>,
    env: &HashMap<String, String>,
) -> ConfigResult<Vec<(String, String)>> {
    let substitutor = Substitutor::new(config, env).with_layer(layer);
    layer
        .iter()
        .map(|(key, raw)| Ok((key.to_owned(), substitutor.resolve(key, raw)?)))
        .collect()
}

/// Snapshot the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Paths of the required property files inside `dir`.
#[must_use]
pub fn config_paths(dir: &Path) -> Vec<PathBuf> {
    CONFIG_FILES.iter().map(|name| dir.join(name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_etc(base: &str, startup: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BASE_CONFIG_FILE), base).unwrap();
        std::fs::write(dir.path().join(STARTUP_CONFIG_FILE), startup).unwrap();
        dir
    }

    fn loader() -> ConfigLoader {
        ConfigLoader::new().with_env(HashMap::from([("HOME".to_owned(), "/home/berth".to_owned())]))
    }

    #[test]
    fn test_layers_override_in_order() {
        let etc = write_etc("a=base\nb=base\n", "b=startup\nc=startup\n");
        let config = loader().with_seed("a", "seed").load(etc.path()).unwrap();

        assert_eq!(config.get("a"), Some("base"));
        assert_eq!(config.get("b"), Some("startup"));
        assert_eq!(config.get("c"), Some("startup"));
        assert_eq!(config.loaded_files().len(), 2);
    }

    #[test]
    fn test_values_resolve_against_seeds_earlier_layers_and_env() {
        let etc = write_etc(
            "storage=${plugin.home}/data\nuser.dir=${HOME}/x\n",
            "cache=${storage}/cache\n",
        );
        let config = loader()
            .with_seed("plugin.home", "/srv/plugins")
            .load(etc.path())
            .unwrap();

        assert_eq!(config.get("storage"), Some("/srv/plugins/data"));
        assert_eq!(config.get("user.dir"), Some("/home/berth/x"));
        assert_eq!(config.get("cache"), Some("/srv/plugins/data/cache"));
    }

    #[test]
    fn test_forward_reference_within_layer() {
        let etc = write_etc("a=${b}\nb=x\n", "");
        let config = loader().load(etc.path()).unwrap();
        assert_eq!(config.get("a"), Some("x"));
        assert_eq!(config.get("b"), Some("x"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(BASE_CONFIG_FILE), "a=1\n").unwrap();

        let err = loader().load(dir.path()).unwrap_err();
        match err {
            ConfigError::Read { path, .. } => assert!(path.ends_with(STARTUP_CONFIG_FILE)),
            other => panic!("expected read error, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_is_fatal() {
        let etc = write_etc("a=${a}\n", "");
        let err = loader().load(etc.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Cycle { .. }));
    }

    #[test]
    fn test_stray_delimiter_is_fatal() {
        let etc = write_etc("", "bad=value}\n");
        let err = loader().load(etc.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { .. }));
    }

    #[test]
    fn test_malformed_escape_is_parse_error() {
        let etc = write_etc("a=\\uZZZZ\n", "");
        let err = loader().load(etc.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_layer_merges() {
        let mut config: EffectiveConfig = [("root", "/r")].into_iter().collect();
        let layer: Properties = [("sub", "${root}/sub")].into_iter().collect();
        loader().load_layer(&layer, &mut config).unwrap();
        assert_eq!(config.get("sub"), Some("/r/sub"));
    }

    #[test]
    fn test_config_paths() {
        let paths = config_paths(Path::new("/etc/berth"));
        assert_eq!(paths[0], Path::new("/etc/berth/config.properties"));
        assert_eq!(paths[1], Path::new("/etc/berth/startup.properties"));
    }
}
