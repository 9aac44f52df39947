//! Result aggregation
//!
//! Workers append [`JobResult`]s to a shared [`ResultCollector`] in
//! completion order. Once the run ends, [`BatchRun`] pairs them with the
//! discovery-ordered job list and derives the [`RunSummary`] handed to a
//! [`Reporter`].

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use leprocessus::ProcessOutcome;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::classify::{Classification, JobCategory, OutcomeReason};
use crate::error::Result;
use crate::job::Job;

/// Final result of one job. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Job identity
    pub job_id: String,

    /// Discovery index
    pub index: usize,

    /// Category
    pub category: JobCategory,

    /// Reason
    pub reason: OutcomeReason,

    /// Human-readable detail
    pub detail: String,

    /// Time spent on the job, pipeline included
    pub duration_ms: u64,

    /// Raw exit code, `-1` when unknown or never spawned
    pub exit_code: i32,

    /// Whether an engine process was spawned
    pub spawned: bool,

    /// Engine process ID
    pub pid: Option<u32>,

    /// Engine process and its observed descendants
    pub tracked_pids: Vec<u32>,

    /// A dependency failed to load during the run
    pub dependency_load_failure: bool,

    /// The process was confirmed gone before disposal
    pub exit_confirmed: bool,
}

impl JobResult {
    /// Result for a job that never reached the lifecycle manager
    pub fn unspawned(job: &Job, classification: Classification, duration: Duration) -> Self {
        Self {
            job_id: job.id.clone(),
            index: job.index,
            category: classification.category,
            reason: classification.reason,
            detail: classification.detail,
            duration_ms: duration.as_millis() as u64,
            exit_code: leprocessus::UNKNOWN_EXIT_CODE,
            spawned: false,
            pid: None,
            tracked_pids: Vec::new(),
            dependency_load_failure: classification.dependency_load_failure,
            exit_confirmed: true,
        }
    }

    /// Result for a job whose engine process went through the lifecycle manager
    pub fn processed(
        job: &Job,
        classification: Classification,
        outcome: &ProcessOutcome,
        duration: Duration,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            index: job.index,
            category: classification.category,
            reason: classification.reason,
            detail: classification.detail,
            duration_ms: duration.as_millis() as u64,
            exit_code: outcome.exit_code,
            spawned: outcome.pid.is_some(),
            pid: outcome.pid,
            tracked_pids: outcome.tracked_pids(),
            dependency_load_failure: classification.dependency_load_failure,
            exit_confirmed: outcome.exit_confirmed,
        }
    }

    /// Job duration
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Run-wide results collection, append-only under a mutex
#[derive(Debug, Clone, Default)]
pub struct ResultCollector {
    results: Arc<Mutex<Vec<JobResult>>>,
}

impl ResultCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result; returns how many results are now recorded
    pub async fn push(&self, result: JobResult) -> usize {
        let mut results = self.results.lock().await;
        results.push(result);
        results.len()
    }

    /// Number of recorded results
    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    /// Whether nothing has been recorded
    pub async fn is_empty(&self) -> bool {
        self.results.lock().await.is_empty()
    }

    /// Copy of the results, in completion order
    pub async fn snapshot(&self) -> Vec<JobResult> {
        self.results.lock().await.clone()
    }
}

/// One finished run
#[derive(Debug, Clone)]
pub struct BatchRun {
    /// Run timestamp embedded in invocation file names
    pub run_timestamp: String,

    /// Start time
    pub started_at: DateTime<Local>,

    /// End time
    pub finished_at: DateTime<Local>,

    /// Output root
    pub output_root: PathBuf,

    /// Jobs in discovery order, with their results where dispatched
    pub jobs: Vec<Job>,

    /// Results in completion order
    pub results: Vec<JobResult>,

    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl BatchRun {
    /// Result for a job
    pub fn result(&self, job_id: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.job_id == job_id)
    }

    /// Number of results in `category`
    pub fn count(&self, category: JobCategory) -> usize {
        self.results.iter().filter(|r| r.category == category).count()
    }

    /// Derive the run summary
    pub fn summary(&self) -> RunSummary {
        let by_id: HashMap<&str, &JobResult> =
            self.results.iter().map(|r| (r.job_id.as_str(), r)).collect();

        let mut job_durations = Vec::with_capacity(self.results.len());
        let mut not_dispatched = Vec::new();
        for job in &self.jobs {
            match by_id.get(job.id.as_str()) {
                Some(result) => job_durations.push(JobDuration {
                    job_id: job.id.clone(),
                    category: result.category,
                    duration_ms: result.duration_ms,
                }),
                None => not_dispatched.push(job.id.clone()),
            }
        }

        let mut non_processed = BTreeMap::new();
        let mut failed_processed = Vec::new();
        let mut dependency_load_failures = Vec::new();
        for result in &self.results {
            match result.category {
                JobCategory::NonProcessed => {
                    non_processed.insert(
                        result.job_id.clone(),
                        ReasonEntry {
                            reason: result.reason,
                            detail: result.detail.clone(),
                        },
                    );
                }
                JobCategory::FailedProcessed => failed_processed.push(FailedJob {
                    job_id: result.job_id.clone(),
                    reason: result.reason,
                    detail: result.detail.clone(),
                }),
                JobCategory::Success => {}
            }
            if result.dependency_load_failure {
                dependency_load_failures.push(result.job_id.clone());
            }
        }
        failed_processed.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        dependency_load_failures.sort();

        let wall_clock = self.finished_at.signed_duration_since(self.started_at);

        RunSummary {
            run_timestamp: self.run_timestamp.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            wall_clock_ms: wall_clock.num_milliseconds().max(0) as u64,
            output_root: self.output_root.clone(),
            discovered: self.jobs.len(),
            dispatched: self.results.len(),
            success: self.count(JobCategory::Success),
            failed_processed_count: self.count(JobCategory::FailedProcessed),
            non_processed_count: self.count(JobCategory::NonProcessed),
            job_durations,
            non_processed,
            failed_processed,
            not_dispatched,
            dependency_load_failures,
            cancelled: self.cancelled,
        }
    }
}

/// Duration of one job, listed in discovery order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDuration {
    /// Job identity
    pub job_id: String,
    /// Category
    pub category: JobCategory,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// Reason recorded for a non-processed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonEntry {
    /// Reason
    pub reason: OutcomeReason,
    /// Human-readable detail
    pub detail: String,
}

/// A job that ran and reported a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    /// Job identity
    pub job_id: String,
    /// Reason
    pub reason: OutcomeReason,
    /// Human-readable detail
    pub detail: String,
}

/// Structured run summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run timestamp
    pub run_timestamp: String,
    /// Start time
    pub started_at: DateTime<Local>,
    /// End time
    pub finished_at: DateTime<Local>,
    /// Overall wall-clock duration
    pub wall_clock_ms: u64,
    /// Output root
    pub output_root: PathBuf,
    /// Jobs discovered
    pub discovered: usize,
    /// Jobs dispatched (equals the number of results)
    pub dispatched: usize,
    /// Successful jobs
    pub success: usize,
    /// Jobs that ran and failed
    pub failed_processed_count: usize,
    /// Jobs whose operation never ran
    pub non_processed_count: usize,
    /// Per-job durations in discovery order
    pub job_durations: Vec<JobDuration>,
    /// Non-processed jobs and why
    pub non_processed: BTreeMap<String, ReasonEntry>,
    /// Jobs that ran and failed
    pub failed_processed: Vec<FailedJob>,
    /// Jobs never dispatched because the run was cancelled
    pub not_dispatched: Vec<String>,
    /// Jobs where a dependency failed to load
    pub dependency_load_failures: Vec<String>,
    /// Whether the run was cancelled
    pub cancelled: bool,
}

impl RunSummary {
    /// Whether every dispatched job succeeded and nothing was left out
    pub fn all_succeeded(&self) -> bool {
        self.success == self.discovered && !self.cancelled
    }
}

/// Emits a run summary somewhere (file, console, ...)
pub trait Reporter: Send + Sync {
    /// Emit the summary
    fn report(&self, summary: &RunSummary) -> Result<()>;
}
