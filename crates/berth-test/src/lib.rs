//! Berth Test - Shared test utilities for the Berth plugin container.
//!
//! Used as a dev-dependency by crates that drive a whole container:
//!
//! ```toml
//! [dev-dependencies]
//! berth-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use berth_test::{ArchiveBuilder, PluginHomeFixture};
//!
//! let home = PluginHomeFixture::new();
//! home.deploy("greeter.jar", &ArchiveBuilder::new("acme.greeter").build());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod archive;
pub mod fixtures;
pub mod listeners;
pub mod logging;

pub use archive::ArchiveBuilder;
pub use fixtures::{PluginHomeFixture, wait_until};
pub use listeners::{FailingListener, ListenerEvent, RecordingListener};
pub use logging::init_test_logging;
