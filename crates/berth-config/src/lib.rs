#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Startup configuration for the Berth plugin container.
//!
//! The container is configured from two Java-style property files that live
//! in the plugin home's `etc/` directory. They are layered over a set of seed
//! values supplied by the host (the plugin home path, the exported host
//! capabilities) and every value is passed through `${name}` substitution.
//!
//! # Usage
//!
//! ```rust,no_run
//! use berth_config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .with_seed("plugin.home", "/srv/plugins")
//!     .load(std::path::Path::new("/srv/plugins/etc"))
//!     .unwrap();
//! println!("storage: {:?}", config.get("berth.storage.dir"));
//! ```
//!
//! # Layering
//!
//! From lowest to highest priority:
//!
//! 1. **Seeds** supplied through [`ConfigLoader::with_seed`]
//! 2. **Base** (`etc/config.properties`)
//! 3. **Startup** (`etc/startup.properties`)
//!
//! Both files are required; a missing file is a [`ConfigError::Read`].
//!
//! # Substitution
//!
//! Placeholders are expanded innermost first, so `${foo.${bar}}` looks up
//! `bar` before `foo.<bar>`. Names resolve against the file being loaded,
//! then the accumulated configuration, then the process environment. Names
//! that resolve nowhere expand to the empty string. Self-referential and
//! mutually-referential definitions fail with [`ConfigError::Cycle`].

/// Configuration error types.
pub mod error;
/// The resolved key/value configuration map.
pub mod effective;
/// Property file discovery and layered loading.
pub mod loader;
/// Java-style `.properties` parsing.
pub mod properties;
/// `${name}` placeholder expansion.
pub mod substitute;

pub use effective::EffectiveConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::{BASE_CONFIG_FILE, CONFIG_FILES, ConfigLoader, STARTUP_CONFIG_FILE};
pub use properties::{MalformedLine, Properties};
pub use substitute::{Substitutor, substitute};
