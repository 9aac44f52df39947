//! lelot - Batch Orchestration Core
//!
//! *Le Lot* (The Batch) - Discovers jobs, builds engine invocations, drives
//! them through a bounded worker pool and classifies every outcome.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Batch configuration passed into the dispatcher
pub mod config;

/// Run-level errors
pub mod error;

/// Job identity, mode and lifecycle state
pub mod job;

/// Job discovery
pub mod source;

/// Parameter resolution boundary
pub mod resolver;

/// Control script and parameter bundle generation
pub mod invocation;

/// Outcome classification
pub mod classify;

/// Result collection, run summary and reporter boundary
pub mod aggregate;

/// Progress events
pub mod progress;

/// Worker pool
pub mod dispatch;

/// Environment and script variable prefix shared by every parameter channel
pub const VARIABLE_PREFIX: &str = "LEPILOTE_";

/// Format of the per-run timestamp embedded in invocation filenames
pub const RUN_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

pub use aggregate::{BatchRun, JobResult, Reporter, ResultCollector, RunSummary};
pub use classify::{classify, Classification, ClassifyInput, JobCategory, OutcomeReason};
pub use config::BatchConfig;
pub use dispatch::Dispatcher;
pub use error::{BatchError, Result};
pub use invocation::{Invocation, InvocationBuilder, InvocationError, ParameterBundle};
pub use job::{Job, JobMode, JobState};
pub use progress::{ChannelProgress, LogProgress, NoProgress, ProgressEvent, ProgressSink};
pub use resolver::{NoParameters, ParameterResolver};
pub use source::{DirectorySource, JobSource};
