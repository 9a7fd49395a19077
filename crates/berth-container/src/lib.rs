//! Plugin container runtime for Berth.
//!
//! Discovers, starts, stops and mediates communication for plugins deployed
//! into a plugin home directory:
//!
//! - [`PluginContainer`]: lifecycle state machine, install staging and
//!   lock-free service lookups
//! - [`ServiceRegistry`]: cross-boundary registry keyed by service type
//! - [`ServiceBridge`]: host services published on every start
//! - [`Environment`]: the pluggable execution environment plugins run in;
//!   [`LocalEnvironment`] runs [`ModuleActivator`]s in-process
//! - [`PluginArchive`]: tar or tar.gz archives carrying a `plugin.toml`
//! - [`ContainerListener`]: `started`/`stopped` notifications
//!
//! # Plugin home
//!
//! ```text
//! <home>/
//!   etc/config.properties     base configuration
//!   etc/startup.properties    startup overrides
//!   system/*.toml             host module descriptors (capability exports)
//!   deploy/                   archives here are installed automatically
//!   data/cache/               extracted modules
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod activator;
pub mod archive;
pub mod bridge;
pub mod container;
pub mod environment;
pub mod error;
pub mod keys;
pub mod layout;
pub mod listener;
pub mod local;
pub mod module;
pub mod registry;
mod scanner;

#[cfg(test)]
mod testing;

pub use activator::{ActivatorCatalog, ModuleActivator, ModuleContext};
pub use archive::PluginArchive;
pub use bridge::{DispatchContext, HostDispatchContext, ServiceBridge};
pub use container::{ContainerOptions, ContainerState, PluginContainer};
pub use environment::{Environment, EnvironmentFactory};
pub use error::{ContainerError, ContainerResult};
pub use layout::PluginLayout;
pub use listener::{ContainerListener, ListenerSet, PendingNotification};
pub use local::{LocalEnvironment, LocalEnvironmentFactory};
pub use module::{InstalledModule, ModuleId, ModuleState};
pub use registry::{Owner, ServiceRegistration, ServiceRegistry, ServiceToken};
