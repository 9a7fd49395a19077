//! Logging setup for the Berth plugin container.
//!
//! The container and its crates log through `tracing`; this crate installs
//! the subscriber that host applications and tests use to see it.
//!
//! # Example
//!
//! ```rust,no_run
//! use berth_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), berth_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("berth_container=debug");
//! setup_logging(&config)?;
//! tracing::info!("plugin host starting");
//! # Ok(())
//! # }
//! ```
//!
//! With the `config` feature, [`LogConfig::from_effective`] reads the
//! `berth.log.*` keys from a plugin home's property files.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    LOG_DIRECTIVES_KEY, LOG_FORMAT_KEY, LOG_LEVEL_KEY, LogConfig, LogFormat, LogTarget,
    setup_default_logging, setup_logging,
};
