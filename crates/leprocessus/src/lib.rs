//! leprocessus - External Process Lifecycle
//!
//! *Le Processus* (The Process) - Runs one external engine invocation to
//! completion or forced termination, and releases everything it held before
//! returning.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Command description handed to the lifecycle manager
pub mod command;

/// Lifecycle errors
pub mod error;

/// Line-level output heuristics (failure markers)
pub mod markers;

/// Asynchronous stdout/stderr capture
pub mod capture;

/// Process tree inspection, kill and liveness checks
pub mod tree;

/// Spawn, deadline, teardown and disposal
pub mod lifecycle;

/// Default per-job deadline in seconds (6 minutes)
pub const DEFAULT_DEADLINE_SECS: u64 = 360;
/// Default bounded wait for confirmed exit after a forced kill
pub const DEFAULT_KILL_WAIT_SECS: u64 = 10;
/// Default grace delay between confirmed exit and disposal
pub const DEFAULT_DISPOSE_GRACE_MS: u64 = 500;
/// Default bound on draining the output readers after exit
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2_000;
/// Exit code reported when the real code could not be retrieved
pub const UNKNOWN_EXIT_CODE: i32 = -1;

pub use command::ProcessSpec;
pub use error::{ProcessError, Result};
pub use lifecycle::{LifecycleOptions, ProcessHandle, ProcessLifecycle, ProcessOutcome, Termination};
pub use markers::{KeywordClassifier, LineClassifier, MarkerRule, OutputMarker};
pub use tree::{is_alive, kill_tree};
