//! Run-level errors
//!
//! Only [`BatchError::Enumeration`] and [`BatchError::PrerequisiteMissing`]
//! abort a run. Per-job failures never become a `BatchError`; they are
//! recorded as job results.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors that stop a run or fail its reporting
#[derive(Debug, Error)]
pub enum BatchError {
    /// The job directory could not be enumerated
    #[error("cannot enumerate jobs in {path}: {reason}")]
    Enumeration {
        /// Directory that was scanned
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// A static prerequisite (engine, load-time dependency) is missing
    #[error("prerequisite missing: {what} ({path})")]
    PrerequisiteMissing {
        /// Which prerequisite
        what: String,
        /// Path that was checked
        path: PathBuf,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O failure while preparing the run
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The reporter could not emit the summary
    #[error("report failed: {0}")]
    Report(String),
}

impl BatchError {
    /// Whether this error aborts the run before any job is dispatched
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Enumeration { .. } | Self::PrerequisiteMissing { .. } | Self::Config(_)
        )
    }
}
