//! Lifecycle errors
//!
//! Expected failure modes (spawn failure, non-zero exit, deadline, cancel)
//! are reported through [`crate::ProcessOutcome`], not here. These variants
//! cover the conditions the lifecycle manager cannot represent as an outcome.

use thiserror::Error;

/// Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, ProcessError>;

/// Unexpected lifecycle failures
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Waiting on a running child failed at the OS level
    #[error("failed to wait on process {pid}: {source}")]
    Wait {
        /// Process ID of the child
        pid: u32,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned but reported no process ID
    #[error("process '{name}' was spawned without a process ID")]
    MissingPid {
        /// Label of the process spec
        name: String,
    },
}
