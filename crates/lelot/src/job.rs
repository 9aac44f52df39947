//! Job model
//!
//! A [`Job`] is created by the job source, then owned and mutated only by the
//! worker that runs it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::aggregate::JobResult;

/// How success is judged once the engine has run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// The engine writes an issues file only when it finds problems:
    /// success means the expected artifact is absent
    #[default]
    Validation,
    /// The engine is expected to produce the artifact:
    /// success means it exists
    Artifact,
}

impl JobMode {
    /// Name used in parameter channels and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Artifact => "artifact",
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validation" | "validate" => Ok(Self::Validation),
            "artifact" | "export" => Ok(Self::Artifact),
            other => Err(format!("unknown job mode '{other}'")),
        }
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Discovered, not yet picked up by a worker
    Pending,
    /// Parameters resolved (or found unavailable)
    Resolved,
    /// Engine process running
    Running,
    /// Result produced
    Finished,
}

/// One unit of work: one input file
#[derive(Debug, Clone)]
pub struct Job {
    /// Stable identity derived from the input file name
    pub id: String,

    /// Position in discovery order
    pub index: usize,

    /// Input document
    pub source_path: PathBuf,

    /// Success semantics
    pub mode: JobMode,

    /// Resolved configuration payload
    pub config: Option<serde_json::Value>,

    /// Current state
    pub state: JobState,

    /// Final result, set once
    pub result: Option<JobResult>,
}

impl Job {
    /// Create a pending job
    pub fn new(id: impl Into<String>, index: usize, source_path: impl Into<PathBuf>, mode: JobMode) -> Self {
        Self {
            id: id.into(),
            index,
            source_path: source_path.into(),
            mode,
            config: None,
            state: JobState::Pending,
            result: None,
        }
    }

    /// Record the final result
    pub fn finish(&mut self, result: JobResult) {
        self.state = JobState::Finished;
        self.result = Some(result);
    }

    /// Whether the job has reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.state == JobState::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("validation", JobMode::Validation)]
    #[case("Validate", JobMode::Validation)]
    #[case("artifact", JobMode::Artifact)]
    #[case(" EXPORT ", JobMode::Artifact)]
    fn test_mode_parse(#[case] input: &str, #[case] expected: JobMode) {
        assert_eq!(input.parse::<JobMode>().unwrap(), expected);
    }

    #[test]
    fn test_mode_parse_rejects_unknown() {
        assert!("render".parse::<JobMode>().is_err());
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("plan-01", 0, "/in/plan-01.dwg", JobMode::default());
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.mode, JobMode::Validation);
        assert!(job.result.is_none());
        assert!(!job.is_finished());
    }
}
