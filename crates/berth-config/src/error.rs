use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::properties::MalformedLine;

/// Configuration error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a property file.
    #[error("failed to load configuration: {path}: {source}")]
    Read {
        /// Path to the property file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A property file contains a malformed line.
    #[error("failed to parse configuration at {path}: {source}")]
    Parse {
        /// Path to the property file.
        path: PathBuf,
        /// The offending line.
        #[source]
        source: MalformedLine,
    },

    /// Placeholder syntax error, e.g. a `}` with no preceding `${`.
    #[error("{message}: {value}")]
    Syntax {
        /// The value being expanded.
        value: String,
        /// What is wrong with it.
        message: &'static str,
    },

    /// A variable refers back to itself, directly or through other variables.
    #[error("recursive variable reference: {name}")]
    Cycle {
        /// The name that was re-entered.
        name: String,
    },

    /// A value could not be converted to the requested type.
    #[error("invalid value for '{key}': {value} ({message})")]
    InvalidValue {
        /// The configuration key.
        key: String,
        /// The raw value.
        value: String,
        /// Conversion failure description.
        message: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
