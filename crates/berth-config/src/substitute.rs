use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::trace;

use crate::error::{ConfigError, ConfigResult};
use crate::properties::Properties;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Expands `${name}` placeholders against a layer of raw values, the
/// configuration accumulated so far and an environment snapshot.
///
/// Lookup order for a name: the layer being loaded (raw, expanded on
/// demand), the accumulated configuration, the environment, then `""`.
#[derive(Debug, Clone, Copy)]
pub struct Substitutor<'a> {
    layer: Option<&'a Properties>,
    config: &'a BTreeMap<String, String>,
    env: &'a HashMap<String, String>,
}

impl<'a> Substitutor<'a> {
    /// Create a substitutor over already-resolved configuration and an
    /// environment snapshot.
    #[must_use]
    pub fn new(config: &'a BTreeMap<String, String>, env: &'a HashMap<String, String>) -> Self {
        Self {
            layer: None,
            config,
            env,
        }
    }

    /// Resolve names against this layer's raw values before the accumulated
    /// configuration.
    #[must_use]
    pub fn with_layer(mut self, layer: &'a Properties) -> Self {
        self.layer = Some(layer);
        self
    }

    /// Expand every placeholder in `value`, which is the definition of `key`.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Syntax`] for a `}` with no preceding `${`. A `${`
    ///   that is never closed is kept as literal text.
    /// - [`ConfigError::Cycle`] when expansion re-enters `key` or any name
    ///   still being expanded.
    pub fn resolve(&self, key: &str, value: &str) -> ConfigResult<String> {
        let mut resolving = HashSet::new();
        resolving.insert(key.to_owned());
        self.expand(value.to_owned(), &mut resolving)
    }

    fn expand(&self, mut value: String, resolving: &mut HashSet<String>) -> ConfigResult<String> {
        loop {
            // With no `}` left there is no placeholder, even after a `${`.
            let Some(close) = value.find(CLOSE) else {
                return Ok(value);
            };

            let (head, tail) = value.split_at(close);
            let Some(open) = head.rfind(OPEN) else {
                return Err(ConfigError::Syntax {
                    value,
                    message: "stop delimiter with no start delimiter",
                });
            };

            let (prefix, placeholder) = head.split_at(open);
            let name = placeholder.strip_prefix(OPEN).unwrap_or(placeholder);
            let suffix = tail.strip_prefix(CLOSE).unwrap_or(tail);

            if resolving.contains(name) {
                return Err(ConfigError::Cycle {
                    name: name.to_owned(),
                });
            }

            let raw = self.lookup(name);
            trace!(name, "expanding variable");
            resolving.insert(name.to_owned());
            let expanded = self.expand(raw, resolving)?;
            resolving.remove(name);

            value = format!("{prefix}{expanded}{suffix}");
        }
    }

    fn lookup(&self, name: &str) -> String {
        self.layer
            .and_then(|layer| layer.get(name))
            .or_else(|| self.config.get(name).map(String::as_str))
            .or_else(|| self.env.get(name).map(String::as_str))
            .unwrap_or_default()
            .to_owned()
    }
}

/// Expand `value` against a resolved configuration map and an environment
/// snapshot.
///
/// # Errors
///
/// See [`Substitutor::resolve`].
pub fn substitute(
    key: &str,
    value: &str,
    config: &BTreeMap<String, String>,
    env: &HashMap<String, String>,
) -> ConfigResult<String> {
    Substitutor::new(config, env).resolve(key, value)
}
