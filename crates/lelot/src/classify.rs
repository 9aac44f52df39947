//! Outcome classification
//!
//! [`classify`] is a pure function. The caller probes the filesystem for the
//! expected artifact after the process has been disposed and passes the
//! answer in, so every rule here can be exercised without a process.
//!
//! Decision order, first match wins:
//!
//! 1. configuration unresolved before spawn: `NonProcessed`, `ConfigUnavailable`
//! 2. spawn failed: `NonProcessed`, `SpawnFailure`
//! 3. command-not-found marker seen (any exit code): `NonProcessed`, `CommandNotFound`
//! 4. deadline exceeded: `NonProcessed`, `Timeout`
//! 5. run cancelled mid-flight: `NonProcessed`, `Cancelled`
//! 6. the engine ran; success depends on the mode:
//!    - artifact mode: `Success` iff the artifact exists, else
//!      `FailedProcessed`, `ArtifactMissing`
//!    - validation mode (inverted): `Success` iff the artifact is absent,
//!      else `FailedProcessed`, `ValidationIssuesRecorded`
//!
//! A dependency-load-failure marker never changes the category; it is
//! carried as a flag so the summary can surface it.

use leprocessus::{OutputMarker, ProcessOutcome, Termination};
use serde::{Deserialize, Serialize};

use crate::job::JobMode;

/// Result category of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCategory {
    /// The intended operation ran and succeeded
    Success,
    /// The intended operation ran and reported a failure
    FailedProcessed,
    /// The intended operation never ran
    NonProcessed,
}

impl std::fmt::Display for JobCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::FailedProcessed => write!(f, "failed-processed"),
            Self::NonProcessed => write!(f, "non-processed"),
        }
    }
}

/// Why a job ended in its category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OutcomeReason {
    /// Artifact mode: the artifact was written
    ArtifactProduced,
    /// Validation mode: no issues file was written
    NoIssuesRecorded,
    /// Artifact mode: the engine ran but no artifact appeared
    ArtifactMissing,
    /// Validation mode: the engine ran and wrote an issues file
    ValidationIssuesRecorded,
    /// No configuration payload and no fallback template
    ConfigUnavailable,
    /// The engine process could not be started
    SpawnFailure,
    /// The engine did not recognise the command it was asked to run
    CommandNotFound,
    /// The deadline elapsed and the process tree was killed
    Timeout,
    /// The run was cancelled while the job was in flight
    Cancelled,
    /// The job pipeline failed unexpectedly
    UnexpectedPipelineException,
}

impl OutcomeReason {
    /// Category this reason belongs to
    pub fn category(&self) -> JobCategory {
        match self {
            Self::ArtifactProduced | Self::NoIssuesRecorded => JobCategory::Success,
            Self::ArtifactMissing | Self::ValidationIssuesRecorded => JobCategory::FailedProcessed,
            Self::ConfigUnavailable
            | Self::SpawnFailure
            | Self::CommandNotFound
            | Self::Timeout
            | Self::Cancelled
            | Self::UnexpectedPipelineException => JobCategory::NonProcessed,
        }
    }

    /// Short human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::ArtifactProduced => "artifact produced",
            Self::NoIssuesRecorded => "no validation issues recorded",
            Self::ArtifactMissing => "engine ran but the expected artifact is missing",
            Self::ValidationIssuesRecorded => "validation issues recorded",
            Self::ConfigUnavailable => "no configuration available",
            Self::SpawnFailure => "engine could not be started",
            Self::CommandNotFound => "engine did not recognise the command",
            Self::Timeout => "deadline exceeded, process tree killed",
            Self::Cancelled => "run cancelled while the job was running",
            Self::UnexpectedPipelineException => "unexpected pipeline failure",
        }
    }
}

impl std::fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Everything the classifier looks at
#[derive(Debug, Clone, Copy)]
pub struct ClassifyInput<'a> {
    /// Whether a configuration payload was available before spawn
    pub config_resolved: bool,

    /// Process outcome, if the job got as far as the lifecycle manager
    pub outcome: Option<&'a ProcessOutcome>,

    /// Success semantics
    pub mode: JobMode,

    /// Whether the expected artifact exists after the process was disposed
    pub artifact_exists: bool,
}

/// Classifier verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Category
    pub category: JobCategory,

    /// Reason
    pub reason: OutcomeReason,

    /// Human-readable detail
    pub detail: String,

    /// A dependency failed to load during the run
    pub dependency_load_failure: bool,
}

impl Classification {
    /// Verdict for `reason` with its default description
    pub fn of(reason: OutcomeReason) -> Self {
        Self::with_detail(reason, reason.description())
    }

    /// Verdict for `reason` with a specific detail
    pub fn with_detail(reason: OutcomeReason, detail: impl Into<String>) -> Self {
        Self {
            category: reason.category(),
            reason,
            detail: detail.into(),
            dependency_load_failure: false,
        }
    }
}

/// Classify one job
pub fn classify(input: &ClassifyInput<'_>) -> Classification {
    if !input.config_resolved {
        return Classification::of(OutcomeReason::ConfigUnavailable);
    }

    let outcome = match input.outcome {
        Some(outcome) => outcome,
        None => {
            return Classification::with_detail(
                OutcomeReason::SpawnFailure,
                "engine was never started",
            )
        }
    };

    let mut verdict = decide(outcome, input.mode, input.artifact_exists);
    verdict.dependency_load_failure = outcome.has_marker(OutputMarker::DependencyLoadFailure);
    verdict
}

fn decide(outcome: &ProcessOutcome, mode: JobMode, artifact_exists: bool) -> Classification {
    if let Termination::SpawnFailed { message } = &outcome.termination {
        return Classification::with_detail(
            OutcomeReason::SpawnFailure,
            format!("engine could not be started: {message}"),
        );
    }

    if outcome.has_marker(OutputMarker::CommandNotFound) {
        return Classification::with_detail(
            OutcomeReason::CommandNotFound,
            format!(
                "engine did not recognise the command (exit code {})",
                outcome.exit_code
            ),
        );
    }

    match outcome.termination {
        Termination::DeadlineExceeded => return Classification::of(OutcomeReason::Timeout),
        Termination::Cancelled => return Classification::of(OutcomeReason::Cancelled),
        _ => {}
    }

    let reason = match (mode, artifact_exists) {
        (JobMode::Artifact, true) => OutcomeReason::ArtifactProduced,
        (JobMode::Artifact, false) => OutcomeReason::ArtifactMissing,
        // Inverted: an artifact in validation mode is the issues report.
        (JobMode::Validation, false) => OutcomeReason::NoIssuesRecorded,
        (JobMode::Validation, true) => OutcomeReason::ValidationIssuesRecorded,
    };
    Classification::of(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use rstest::rstest;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn outcome(termination: Termination, markers: &[OutputMarker]) -> ProcessOutcome {
        ProcessOutcome {
            pid: Some(4242),
            descendant_pids: Vec::new(),
            started_at: Local::now(),
            duration: Duration::from_millis(10),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            markers: markers.iter().copied().collect::<BTreeSet<_>>(),
            termination,
            exit_confirmed: true,
        }
    }

    fn run(outcome: &ProcessOutcome, mode: JobMode, artifact_exists: bool) -> Classification {
        classify(&ClassifyInput {
            config_resolved: true,
            outcome: Some(outcome),
            mode,
            artifact_exists,
        })
    }

    #[rstest]
    #[case(JobMode::Validation, false, JobCategory::Success, OutcomeReason::NoIssuesRecorded)]
    #[case(JobMode::Validation, true, JobCategory::FailedProcessed, OutcomeReason::ValidationIssuesRecorded)]
    #[case(JobMode::Artifact, true, JobCategory::Success, OutcomeReason::ArtifactProduced)]
    #[case(JobMode::Artifact, false, JobCategory::FailedProcessed, OutcomeReason::ArtifactMissing)]
    fn test_mode_dependent_success(
        #[case] mode: JobMode,
        #[case] artifact_exists: bool,
        #[case] category: JobCategory,
        #[case] reason: OutcomeReason,
    ) {
        let verdict = run(&outcome(Termination::Exited, &[]), mode, artifact_exists);
        assert_eq!(verdict.category, category);
        assert_eq!(verdict.reason, reason);
    }

    #[test]
    fn test_validation_mode_success_is_inverted() {
        // Validation mode: the artifact is the issues report, so its
        // presence is a processed failure and its absence is success.
        let ran = outcome(Termination::Exited, &[]);
        assert_eq!(run(&ran, JobMode::Validation, false).category, JobCategory::Success);
        assert_eq!(
            run(&ran, JobMode::Validation, true).category,
            JobCategory::FailedProcessed
        );
        assert_ne!(
            run(&ran, JobMode::Validation, true).category,
            run(&ran, JobMode::Artifact, true).category
        );
    }

    #[test]
    fn test_config_unavailable_comes_first() {
        let timed_out = outcome(Termination::DeadlineExceeded, &[OutputMarker::CommandNotFound]);
        let verdict = classify(&ClassifyInput {
            config_resolved: false,
            outcome: Some(&timed_out),
            mode: JobMode::Artifact,
            artifact_exists: true,
        });
        assert_eq!(verdict.reason, OutcomeReason::ConfigUnavailable);
        assert_eq!(verdict.category, JobCategory::NonProcessed);
    }

    #[test]
    fn test_spawn_failure() {
        let failed = outcome(
            Termination::SpawnFailed {
                message: "No such file or directory".to_string(),
            },
            &[],
        );
        let verdict = run(&failed, JobMode::Validation, false);
        assert_eq!(verdict.reason, OutcomeReason::SpawnFailure);
        assert!(verdict.detail.contains("No such file"));
    }

    #[test]
    fn test_missing_outcome_is_spawn_failure() {
        let verdict = classify(&ClassifyInput {
            config_resolved: true,
            outcome: None,
            mode: JobMode::Validation,
            artifact_exists: false,
        });
        assert_eq!(verdict.reason, OutcomeReason::SpawnFailure);
    }

    #[rstest]
    #[case(JobMode::Validation, false)]
    #[case(JobMode::Artifact, true)]
    fn test_command_not_found_overrides_artifact_probe(
        #[case] mode: JobMode,
        #[case] artifact_exists: bool,
    ) {
        let mut ran = outcome(Termination::Exited, &[OutputMarker::CommandNotFound]);
        ran.exit_code = 0;
        let verdict = run(&ran, mode, artifact_exists);
        assert_eq!(verdict.reason, OutcomeReason::CommandNotFound);
        assert_eq!(verdict.category, JobCategory::NonProcessed);
    }

    #[test]
    fn test_command_not_found_before_timeout() {
        let timed_out = outcome(Termination::DeadlineExceeded, &[OutputMarker::CommandNotFound]);
        assert_eq!(
            run(&timed_out, JobMode::Validation, false).reason,
            OutcomeReason::CommandNotFound
        );
    }

    #[test]
    fn test_timeout_ignores_artifact() {
        let timed_out = outcome(Termination::DeadlineExceeded, &[]);
        let verdict = run(&timed_out, JobMode::Validation, false);
        assert_eq!(verdict.reason, OutcomeReason::Timeout);
        assert_eq!(verdict.category, JobCategory::NonProcessed);
    }

    #[test]
    fn test_cancelled() {
        let cancelled = outcome(Termination::Cancelled, &[]);
        assert_eq!(
            run(&cancelled, JobMode::Artifact, true).reason,
            OutcomeReason::Cancelled
        );
    }

    #[test]
    fn test_dependency_failure_is_auxiliary() {
        let ran = outcome(Termination::Exited, &[OutputMarker::DependencyLoadFailure]);
        let verdict = run(&ran, JobMode::Validation, false);
        assert_eq!(verdict.category, JobCategory::Success);
        assert!(verdict.dependency_load_failure);

        let clean = run(&outcome(Termination::Exited, &[]), JobMode::Validation, false);
        assert!(!clean.dependency_load_failure);
    }

    #[test]
    fn test_non_zero_exit_still_processed() {
        let mut ran = outcome(Termination::Exited, &[]);
        ran.exit_code = 1;
        assert_eq!(
            run(&ran, JobMode::Artifact, true).category,
            JobCategory::Success
        );
    }
}
