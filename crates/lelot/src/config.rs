//! Batch configuration
//!
//! Constructed once at startup and handed to the [`crate::Dispatcher`]; no
//! component reads settings from anywhere else.

use std::path::PathBuf;
use std::time::Duration;

use leprocessus::{KeywordClassifier, LifecycleOptions, MarkerRule};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};
use crate::job::JobMode;

/// Default maximum number of concurrent engine processes
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default artifact extension
pub const DEFAULT_ARTIFACT_EXTENSION: &str = "json";

/// Default input document extension
pub const DEFAULT_INPUT_EXTENSION: &str = "dwg";

/// Default dependency-load directive
pub const DEFAULT_DEPENDENCY_DIRECTIVE: &str = "(command \"_.NETLOAD\" \"{path}\")";

/// Primary then fallback session-ending directives
pub const DEFAULT_QUIT_DIRECTIVES: &[&str] = &["(command \"_.QUIT\" \"_Y\")", "_.QUIT _Y"];

/// Batch configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Engine executable
    pub engine: PathBuf,

    /// Engine argument template.
    ///
    /// Placeholders: `{document}`, `{script}`, `{params}`, `{job}`, `{output}`.
    pub engine_args: Vec<String>,

    /// Load-time dependencies (plugins) required by the engine commands
    pub dependencies: Vec<PathBuf>,

    /// Script line loading one dependency; `{path}` is the dependency path
    pub dependency_directive: String,

    /// Engine command lines embedded in the control script
    pub commands: Vec<String>,

    /// Session-ending directives, primary first
    pub quit_directives: Vec<String>,

    /// Eligible input extensions (case-insensitive, without the dot)
    pub input_extensions: Vec<String>,

    /// Root folder for expected artifacts
    pub output_root: PathBuf,

    /// Folder for generated scripts and sidecar files
    pub script_dir: PathBuf,

    /// Extension of the expected artifact
    pub artifact_extension: String,

    /// Success semantics for every job in the run
    pub mode: JobMode,

    /// Maximum number of jobs in flight
    pub max_concurrency: usize,

    /// Per-job deadline in seconds
    pub deadline_secs: u64,

    /// Bounded wait for confirmed exit after a forced kill
    pub kill_wait_secs: u64,

    /// Delay between confirmed exit and disposal
    pub dispose_grace_ms: u64,

    /// Bound on draining output readers
    pub drain_timeout_ms: u64,

    /// Configuration payload used when the resolver has nothing for a job
    pub fallback_template: Option<PathBuf>,

    /// Keep scripts and sidecar files after the job finishes
    pub keep_invocation_files: bool,

    /// Delete a leftover artifact from a previous run before spawning
    pub clear_stale_artifacts: bool,

    /// Output-line marker rules; empty means the built-in defaults
    pub marker_rules: Vec<MarkerRule>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            engine: PathBuf::new(),
            engine_args: vec!["{document}".to_string(), "{script}".to_string()],
            dependencies: Vec::new(),
            dependency_directive: DEFAULT_DEPENDENCY_DIRECTIVE.to_string(),
            commands: Vec::new(),
            quit_directives: DEFAULT_QUIT_DIRECTIVES.iter().map(|s| s.to_string()).collect(),
            input_extensions: vec![DEFAULT_INPUT_EXTENSION.to_string()],
            output_root: PathBuf::from("output"),
            script_dir: std::env::temp_dir().join("lepilote"),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
            mode: JobMode::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            deadline_secs: leprocessus::DEFAULT_DEADLINE_SECS,
            kill_wait_secs: leprocessus::DEFAULT_KILL_WAIT_SECS,
            dispose_grace_ms: leprocessus::DEFAULT_DISPOSE_GRACE_MS,
            drain_timeout_ms: leprocessus::DEFAULT_DRAIN_TIMEOUT_MS,
            fallback_template: None,
            keep_invocation_files: false,
            clear_stale_artifacts: false,
            marker_rules: Vec::new(),
        }
    }
}

impl BatchConfig {
    /// Create a configuration for `engine` with defaults elsewhere
    pub fn new(engine: impl Into<PathBuf>) -> Self {
        Self {
            engine: engine.into(),
            ..Self::default()
        }
    }

    /// Validate the configuration
    ///
    /// # Returns
    ///
    /// `Ok(())` if valid, `Err(BatchError::Config)` otherwise
    pub fn validate(&self) -> Result<()> {
        if self.engine.as_os_str().is_empty() {
            return Err(BatchError::Config("engine path is not set".to_string()));
        }

        if self.max_concurrency == 0 {
            return Err(BatchError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.deadline_secs == 0 {
            return Err(BatchError::Config(
                "deadline_secs must be greater than 0".to_string(),
            ));
        }

        if self.artifact_extension.trim_start_matches('.').is_empty() {
            return Err(BatchError::Config(
                "artifact_extension cannot be empty".to_string(),
            ));
        }

        if !self.engine_args.iter().any(|a| a.contains("{script}")) {
            return Err(BatchError::Config(
                "engine_args must reference {script}".to_string(),
            ));
        }

        if self.input_extensions.is_empty() {
            return Err(BatchError::Config(
                "at least one input extension is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-job deadline
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Timing knobs for the lifecycle manager
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            deadline: self.deadline(),
            kill_wait: Duration::from_secs(self.kill_wait_secs),
            dispose_grace: Duration::from_millis(self.dispose_grace_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    /// Output-line classifier built from the configured rules
    pub fn classifier(&self) -> KeywordClassifier {
        if self.marker_rules.is_empty() {
            KeywordClassifier::default()
        } else {
            KeywordClassifier::new(self.marker_rules.clone())
        }
    }

    /// Artifact extension without a leading dot
    pub fn artifact_extension(&self) -> &str {
        self.artifact_extension.trim_start_matches('.')
    }
}
