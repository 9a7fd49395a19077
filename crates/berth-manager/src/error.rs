//! Manager error types.

use berth_container::ContainerError;

/// Errors from the plugin manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// The underlying container failed.
    #[error(transparent)]
    Container(#[from] ContainerError),

    /// The persisted configuration record could not be read.
    #[error("failed to read plugin configuration record: {0}")]
    Record(String),
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
