//! Module descriptors and host capability exports for the Berth plugin container.
//!
//! Every unit of code that takes part in capability negotiation, host or
//! plugin, is described by a [`ModuleDescriptor`]: a name, a version, the
//! capabilities it exports and the version ranges it requires.
//!
//! - [`ModuleDescriptor`]: parsed from a `plugin.toml`-style TOML document
//! - [`CapabilitySet`]: deduplicated, name-ordered capability → version map
//! - [`DescriptorSource`]: where host descriptors come from ([`StaticSource`],
//!   [`DirectorySource`])
//! - [`CapabilityExporter`]: scans sources and builds the export string the
//!   container hands to plugins
//!
//! # Export string
//!
//! ```text
//! acme.billing;version="1.2.0",acme.stock;version="3.0.0"
//! ```
//!
//! Names under the runtime's own namespaces ([`RESERVED_PREFIXES`]) are never
//! exported; the container already provides them natively.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod capability;
pub mod descriptor;
pub mod error;
pub mod exporter;
pub mod source;

pub use capability::{Capability, CapabilitySet, RESERVED_PREFIXES, Requirement, is_reserved};
pub use descriptor::{DESCRIPTOR_FILE_NAME, ModuleDescriptor, parse_version};
pub use error::{ExportError, ExportResult};
pub use exporter::CapabilityExporter;
pub use source::{DescriptorSource, DirectorySource, StaticSource};
