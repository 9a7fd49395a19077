//! Export error types.

use std::path::PathBuf;

/// Errors from descriptor parsing and capability handling.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// A descriptor document could not be read.
    #[error("failed to read descriptor {path}: {source}")]
    Read {
        /// Path to the descriptor.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A descriptor document is not valid TOML or misses required fields.
    #[error("descriptor parse error in {origin}: {message}")]
    Parse {
        /// Where the descriptor came from (path, archive, or label).
        origin: String,
        /// Parse error message.
        message: String,
    },

    /// A version string is not a valid semantic version.
    #[error("invalid version for {name}: {version} ({message})")]
    InvalidVersion {
        /// Module or capability name.
        name: String,
        /// The offending version string.
        version: String,
        /// Parser message.
        message: String,
    },

    /// A requirement range is not a valid version requirement.
    #[error("invalid version range for {name}: {range} ({message})")]
    InvalidRange {
        /// Capability name.
        name: String,
        /// The offending range.
        range: String,
        /// Parser message.
        message: String,
    },

    /// A module or capability name is empty or contains invalid characters.
    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

/// Result type for export operations.
pub type ExportResult<T> = Result<T, ExportError>;
