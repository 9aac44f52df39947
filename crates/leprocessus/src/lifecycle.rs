//! Process lifecycle manager
//!
//! [`ProcessLifecycle::execute`] owns one engine process from spawn to
//! disposal. Whatever route ends the run (normal exit, deadline,
//! cancellation) the same teardown sequence follows:
//!
//! 1. kill the process tree if it is still running, then wait (bounded) for
//!    confirmed exit;
//! 2. sweep leftovers of the process group;
//! 3. drain the output readers, aborting any that stay open;
//! 4. observe the dispose grace delay so the OS releases handles and file
//!    locks before the worker picks up its next job;
//! 5. drop the child handle.
//!
//! Only then does `execute` return.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{drain_readers, OutputCapture, StreamKind};
use crate::command::ProcessSpec;
use crate::error::{ProcessError, Result};
use crate::markers::{KeywordClassifier, LineClassifier, OutputMarker};
use crate::tree;
use crate::{
    DEFAULT_DEADLINE_SECS, DEFAULT_DISPOSE_GRACE_MS, DEFAULT_DRAIN_TIMEOUT_MS,
    DEFAULT_KILL_WAIT_SECS, UNKNOWN_EXIT_CODE,
};

/// Timing knobs for one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Hard deadline for the engine process
    pub deadline: Duration,

    /// Bounded wait for confirmed exit after a forced kill
    pub kill_wait: Duration,

    /// Delay between confirmed exit and disposal
    pub dispose_grace: Duration,

    /// Bound on draining the output readers after exit
    pub drain_timeout: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            kill_wait: Duration::from_secs(DEFAULT_KILL_WAIT_SECS),
            dispose_grace: Duration::from_millis(DEFAULT_DISPOSE_GRACE_MS),
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}

/// How the process run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The process exited on its own
    Exited,
    /// The deadline elapsed and the tree was killed
    DeadlineExceeded,
    /// The cancellation signal fired and the tree was killed
    Cancelled,
    /// The process could not be started
    SpawnFailed {
        /// OS error text
        message: String,
    },
}

impl Termination {
    /// Whether the tree had to be killed
    pub fn was_forced(&self) -> bool {
        matches!(self, Self::DeadlineExceeded | Self::Cancelled)
    }
}

/// Everything known about a finished (or never started) process
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    /// OS process ID, if the spawn succeeded
    pub pid: Option<u32>,

    /// Descendants observed at teardown
    pub descendant_pids: Vec<u32>,

    /// Wall-clock start time
    pub started_at: DateTime<Local>,

    /// Time from spawn to disposal
    pub duration: Duration,

    /// Exit code, or [`UNKNOWN_EXIT_CODE`] when it could not be retrieved
    pub exit_code: i32,

    /// Captured stdout
    pub stdout: String,

    /// Captured stderr
    pub stderr: String,

    /// Markers detected while the process ran
    pub markers: BTreeSet<OutputMarker>,

    /// How the run ended
    pub termination: Termination,

    /// Whether the process was confirmed gone before disposal
    pub exit_confirmed: bool,
}

impl ProcessOutcome {
    fn spawn_failed(message: String, started_at: DateTime<Local>, started: Instant) -> Self {
        Self {
            pid: None,
            descendant_pids: Vec::new(),
            started_at,
            duration: started.elapsed(),
            exit_code: UNKNOWN_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            markers: BTreeSet::new(),
            termination: Termination::SpawnFailed { message },
            exit_confirmed: true,
        }
    }

    /// Whether a marker was detected
    pub fn has_marker(&self, marker: OutputMarker) -> bool {
        self.markers.contains(&marker)
    }

    /// All process IDs this run was responsible for
    pub fn tracked_pids(&self) -> Vec<u32> {
        self.pid
            .into_iter()
            .chain(self.descendant_pids.iter().copied())
            .collect()
    }
}

/// The live process, owned by the worker running the job.
///
/// Never escapes [`ProcessLifecycle::execute`].
pub struct ProcessHandle {
    name: String,
    pid: u32,
    started: Instant,
    started_at: DateTime<Local>,
    child: Child,
    capture: OutputCapture,
    readers: Vec<tokio::task::JoinHandle<()>>,
}

impl ProcessHandle {
    /// OS process ID
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wall-clock start time
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }
}

/// Runs engine processes under a deadline with guaranteed teardown
#[derive(Clone)]
pub struct ProcessLifecycle {
    options: LifecycleOptions,
    classifier: Arc<dyn LineClassifier>,
}

impl Default for ProcessLifecycle {
    fn default() -> Self {
        Self::new(LifecycleOptions::default())
    }
}

impl std::fmt::Debug for ProcessLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLifecycle")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ProcessLifecycle {
    /// Create a manager with the default keyword classifier
    pub fn new(options: LifecycleOptions) -> Self {
        Self {
            options,
            classifier: Arc::new(KeywordClassifier::default()),
        }
    }

    /// Replace the output-line heuristic
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn LineClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Timing knobs in use
    pub fn options(&self) -> LifecycleOptions {
        self.options
    }

    /// Run `spec` until it exits, the deadline elapses, or `cancel` fires.
    ///
    /// Spawn failure, non-zero exit, deadline and cancellation are all
    /// reported in the returned [`ProcessOutcome`]. An `Err` means the OS
    /// failed in a way that has no outcome representation; the tree has
    /// still been killed and disposed of when it is returned.
    pub async fn execute(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let started = Instant::now();
        let started_at = Local::now();

        let mut handle = match self.spawn(spec, started, started_at) {
            Ok(handle) => handle,
            Err(SpawnError::Os(message)) => {
                warn!(job = %spec.name, program = %spec.program.display(), "failed to spawn engine: {}", message);
                return Ok(ProcessOutcome::spawn_failed(message, started_at, started));
            }
            Err(SpawnError::Process(e)) => return Err(e),
        };

        let waited = tokio::select! {
            status = handle.child.wait() => Waited::Status(status),
            _ = tokio::time::sleep(self.options.deadline) => Waited::Deadline,
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let (termination, exit_code, wait_error) = match waited {
            Waited::Status(Ok(status)) => {
                debug!(job = %handle.name, pid = handle.pid, ?status, "engine exited");
                (Termination::Exited, status.code().unwrap_or(UNKNOWN_EXIT_CODE), None)
            }
            Waited::Status(Err(source)) => (Termination::Exited, UNKNOWN_EXIT_CODE, Some(source)),
            Waited::Deadline => {
                warn!(job = %handle.name, pid = handle.pid, deadline = ?self.options.deadline, "deadline exceeded, killing process tree");
                (Termination::DeadlineExceeded, UNKNOWN_EXIT_CODE, None)
            }
            Waited::Cancelled => {
                info!(job = %handle.name, pid = handle.pid, "run cancelled, killing process tree");
                (Termination::Cancelled, UNKNOWN_EXIT_CODE, None)
            }
        };

        let needs_kill = termination.was_forced() || wait_error.is_some();
        let teardown = self.teardown(&mut handle, needs_kill).await;
        let exit_code = teardown.exit_code.unwrap_or(exit_code);

        let output = handle.capture.snapshot();
        let pid = handle.pid;
        let name = handle.name.clone();
        drop(handle);

        if let Some(source) = wait_error {
            return Err(ProcessError::Wait { pid, source });
        }

        let outcome = ProcessOutcome {
            pid: Some(pid),
            descendant_pids: teardown.descendants,
            started_at,
            duration: started.elapsed(),
            exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            markers: output.markers,
            termination,
            exit_confirmed: teardown.exit_confirmed,
        };

        info!(
            job = %name,
            pid,
            exit_code = outcome.exit_code,
            termination = ?outcome.termination,
            elapsed_ms = outcome.duration.as_millis() as u64,
            "engine process disposed"
        );

        Ok(outcome)
    }

    fn spawn(
        &self,
        spec: &ProcessSpec,
        started: Instant,
        started_at: DateTime<Local>,
    ) -> std::result::Result<ProcessHandle, SpawnError> {
        let mut child = spec
            .to_command()
            .spawn()
            .map_err(|e| SpawnError::Os(e.to_string()))?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                let _ = child.start_kill();
                return Err(SpawnError::Process(ProcessError::MissingPid {
                    name: spec.name.clone(),
                }));
            }
        };

        info!(job = %spec.name, pid, program = %spec.program.display(), "engine spawned");

        let capture = OutputCapture::new();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture.spawn_reader(
                &spec.name,
                StreamKind::Stdout,
                stdout,
                Arc::clone(&self.classifier),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture.spawn_reader(
                &spec.name,
                StreamKind::Stderr,
                stderr,
                Arc::clone(&self.classifier),
            ));
        }

        Ok(ProcessHandle {
            name: spec.name.clone(),
            pid,
            started,
            started_at,
            child,
            capture,
            readers,
        })
    }

    async fn teardown(&self, handle: &mut ProcessHandle, kill: bool) -> Teardown {
        let mut result = Teardown {
            exit_code: None,
            descendants: Vec::new(),
            exit_confirmed: true,
        };

        if kill {
            result.descendants = tree::kill_tree(handle.pid);
            let _ = handle.child.start_kill();

            match tokio::time::timeout(self.options.kill_wait, handle.child.wait()).await {
                Ok(Ok(status)) => {
                    result.exit_code = Some(status.code().unwrap_or(UNKNOWN_EXIT_CODE));
                }
                Ok(Err(e)) => {
                    debug!(job = %handle.name, pid = handle.pid, "wait after kill failed: {}", e);
                    result.exit_confirmed = !tree::is_alive(handle.pid);
                }
                Err(_) => {
                    result.exit_confirmed = false;
                }
            }

            let survivors = tree::wait_until_dead(&result.descendants, self.options.kill_wait).await;
            if !result.exit_confirmed || !survivors.is_empty() {
                warn!(
                    job = %handle.name,
                    pid = handle.pid,
                    ?survivors,
                    "process tree still reported alive {:?} after kill",
                    self.options.kill_wait
                );
                result.exit_confirmed = false;
            }
        }

        tree::signal_group(handle.pid);

        let readers = std::mem::take(&mut handle.readers);
        drain_readers(&handle.name, readers, self.options.drain_timeout).await;

        tokio::time::sleep(self.options.dispose_grace).await;

        debug!(
            job = %handle.name,
            pid = handle.pid,
            since_spawn_ms = handle.started.elapsed().as_millis() as u64,
            "teardown complete"
        );

        result
    }
}

enum Waited {
    Status(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Cancelled,
}

enum SpawnError {
    Os(String),
    Process(ProcessError),
}

struct Teardown {
    exit_code: Option<i32>,
    descendants: Vec<u32>,
    exit_confirmed: bool,
}
