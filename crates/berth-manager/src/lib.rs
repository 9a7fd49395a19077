//! Configuration-driven entry point to the Berth plugin container.
//!
//! [`PluginManager`] is what the rest of a host application talks to. It
//! reads the persisted plugin configuration record on [`start`], creates and
//! starts a [`PluginContainer`](berth_container::PluginContainer) only when
//! plugins are enabled, and answers lookups without blocking behind a slow
//! start or stop. Listeners registered with the manager survive container
//! restarts.
//!
//! Plugins are optional: with no record, an inactive record, or an empty
//! path, [`start`] succeeds and nothing runs.
//!
//! [`start`]: PluginManager::start

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod manager;
pub mod record;

pub use error::{ManagerError, ManagerResult};
pub use manager::PluginManager;
pub use record::{
    ConfigRecordSource, FileRecordSource, PLUGIN_CONFIGURATION_KIND, PluginConfigRecord,
    StaticRecordSource,
};
