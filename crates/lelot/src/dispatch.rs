//! Worker pool
//!
//! The [`Dispatcher`] owns a run: pre-flight checks, job discovery, then up
//! to `max_concurrency` workers, each driving one job at a time through
//! resolve, build, execute, classify and record.
//!
//! Each job's pipeline runs in its own task. A pipeline that fails or panics
//! becomes an `UnexpectedPipelineException` result; the worker carries on
//! with the next job.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use leprocessus::{LineClassifier, ProcessLifecycle};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::{BatchRun, JobResult, ResultCollector};
use crate::classify::{classify, Classification, ClassifyInput, OutcomeReason};
use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::invocation::{InvocationBuilder, InvocationError};
use crate::job::{Job, JobState};
use crate::progress::{LogProgress, ProgressEvent, ProgressSink};
use crate::resolver::ParameterResolver;
use crate::source::JobSource;
use crate::RUN_TIMESTAMP_FORMAT;

/// Runs batches
pub struct Dispatcher {
    config: BatchConfig,
    resolver: Arc<dyn ParameterResolver>,
    lifecycle: ProcessLifecycle,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Shared, read-only state for every job pipeline of a run
struct PipelineContext {
    builder: InvocationBuilder,
    resolver: Arc<dyn ParameterResolver>,
    lifecycle: ProcessLifecycle,
}

/// Per-worker handles
#[derive(Clone)]
struct WorkerContext {
    pipeline: Arc<PipelineContext>,
    queue: Arc<Mutex<VecDeque<Job>>>,
    results: ResultCollector,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    total: usize,
}

impl Dispatcher {
    /// Create a dispatcher. The configuration is validated by
    /// [`Dispatcher::preflight`], which every run performs first.
    pub fn new(config: BatchConfig, resolver: Arc<dyn ParameterResolver>) -> Self {
        let lifecycle = ProcessLifecycle::new(config.lifecycle_options())
            .with_classifier(Arc::new(config.classifier()));
        Self {
            config,
            resolver,
            lifecycle,
            progress: Arc::new(LogProgress),
        }
    }

    /// Send progress events to `sink` instead of the log
    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Replace the output-line heuristic
    #[must_use]
    pub fn with_line_classifier(mut self, classifier: Arc<dyn LineClassifier>) -> Self {
        self.lifecycle = self.lifecycle.with_classifier(classifier);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Check static prerequisites before anything is spawned.
    ///
    /// Validates the configuration, locates the engine executable and every
    /// load-time dependency, and loads the fallback template if one is
    /// configured.
    ///
    /// # Returns
    ///
    /// The fallback payload, or `Err(BatchError::PrerequisiteMissing)` naming
    /// the first missing prerequisite
    pub fn preflight(&self) -> Result<Option<Value>> {
        self.config.validate()?;

        if locate_executable(&self.config.engine).is_none() {
            return Err(BatchError::PrerequisiteMissing {
                what: "engine executable".to_string(),
                path: self.config.engine.clone(),
            });
        }

        for dependency in &self.config.dependencies {
            if !dependency.is_file() {
                return Err(BatchError::PrerequisiteMissing {
                    what: "load-time dependency".to_string(),
                    path: dependency.clone(),
                });
            }
        }

        let fallback = match &self.config.fallback_template {
            Some(path) => {
                if !path.is_file() {
                    return Err(BatchError::PrerequisiteMissing {
                        what: "fallback template".to_string(),
                        path: path.clone(),
                    });
                }
                let text = std::fs::read_to_string(path)?;
                let value = serde_json::from_str(&text).map_err(|e| {
                    BatchError::Config(format!(
                        "fallback template {} is not valid JSON: {}",
                        path.display(),
                        e
                    ))
                })?;
                Some(value)
            }
            None => None,
        };

        debug!(engine = %self.config.engine.display(), dependencies = self.config.dependencies.len(), "pre-flight checks passed");
        Ok(fallback)
    }

    /// Run every job from `source` until done or `cancel` fires.
    ///
    /// Fails only on pre-flight or enumeration errors, before any process is
    /// spawned. Otherwise every dispatched job has exactly one result in the
    /// returned [`BatchRun`].
    pub async fn run(&self, source: &dyn JobSource, cancel: CancellationToken) -> Result<BatchRun> {
        let fallback = self.preflight()?;
        let mut jobs = source.jobs(self.config.mode)?;

        let started_at = Local::now();
        let run_timestamp = started_at.format(RUN_TIMESTAMP_FORMAT).to_string();
        let total = jobs.len();
        let workers = self.config.max_concurrency.min(total);

        info!(
            run = %run_timestamp,
            total,
            workers,
            mode = %self.config.mode,
            deadline_secs = self.config.deadline_secs,
            "starting batch run"
        );
        self.progress.emit(ProgressEvent::RunStarted { total, workers });

        let pipeline = Arc::new(PipelineContext {
            builder: InvocationBuilder::new(self.config.clone(), run_timestamp.clone(), fallback),
            resolver: Arc::clone(&self.resolver),
            lifecycle: self.lifecycle.clone(),
        });
        let worker = WorkerContext {
            pipeline,
            queue: Arc::new(Mutex::new(jobs.iter().cloned().collect())),
            results: ResultCollector::new(),
            progress: Arc::clone(&self.progress),
            cancel: cancel.clone(),
            total,
        };

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(worker_loop(worker_id, worker.clone()));
        }
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!("worker task failed: {}", e);
            }
        }

        let results = worker.results.snapshot().await;
        let cancelled = cancel.is_cancelled();
        if cancelled {
            self.progress.emit(ProgressEvent::RunCancelled {
                completed: results.len(),
            });
        }

        let by_id: HashMap<&str, &JobResult> =
            results.iter().map(|r| (r.job_id.as_str(), r)).collect();
        for job in &mut jobs {
            if let Some(result) = by_id.get(job.id.as_str()) {
                job.finish((*result).clone());
            }
        }

        self.progress.emit(ProgressEvent::RunFinished {
            completed: results.len(),
            total,
        });
        info!(run = %run_timestamp, completed = results.len(), total, cancelled, "batch run ended");

        Ok(BatchRun {
            run_timestamp,
            started_at,
            finished_at: Local::now(),
            output_root: self.config.output_root.clone(),
            jobs,
            results,
            cancelled,
        })
    }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) {
    loop {
        if ctx.cancel.is_cancelled() {
            debug!(worker_id, "cancellation observed, worker stopping");
            break;
        }

        let next = ctx.queue.lock().await.pop_front();
        let Some(job) = next else {
            break;
        };

        ctx.progress.emit(ProgressEvent::JobStarted {
            job_id: job.id.clone(),
        });

        let result = if ctx.cancel.is_cancelled() {
            JobResult::unspawned(
                &job,
                Classification::with_detail(OutcomeReason::Cancelled, "run cancelled before spawn"),
                std::time::Duration::ZERO,
            )
        } else {
            run_isolated(&ctx, job).await
        };

        info!(
            worker_id,
            job = %result.job_id,
            category = %result.category,
            reason = %result.reason,
            exit_code = result.exit_code,
            duration_ms = result.duration_ms,
            "job finished"
        );

        let job_id = result.job_id.clone();
        let category = result.category;
        let reason = result.reason;
        let completed = ctx.results.push(result).await;
        ctx.progress.emit(ProgressEvent::JobFinished {
            job_id,
            category,
            reason,
            completed,
            total: ctx.total,
        });
    }
}

/// Run one job's pipeline in its own task so a panic cannot take the
/// worker down with it
async fn run_isolated(ctx: &WorkerContext, job: Job) -> JobResult {
    let started = Instant::now();
    let snapshot = job.clone();
    let pipeline = Arc::clone(&ctx.pipeline);
    let cancel = ctx.cancel.clone();

    let joined = tokio::spawn(async move { run_pipeline(&pipeline, job, &cancel).await }).await;

    let detail = match joined {
        Ok(Ok(result)) => return result,
        Ok(Err(message)) => message,
        Err(e) if e.is_panic() => format!("pipeline panicked: {}", panic_message(e.into_panic())),
        Err(e) => format!("pipeline task failed: {}", e),
    };

    warn!(job = %snapshot.id, "{}", detail);
    JobResult::unspawned(
        &snapshot,
        Classification::with_detail(OutcomeReason::UnexpectedPipelineException, detail),
        started.elapsed(),
    )
}

async fn run_pipeline(
    ctx: &PipelineContext,
    mut job: Job,
    cancel: &CancellationToken,
) -> std::result::Result<JobResult, String> {
    let started = Instant::now();

    job.config = ctx.resolver.resolve(&job.id);
    job.state = JobState::Resolved;

    let invocation = match ctx.builder.build(&job) {
        Ok(invocation) => invocation,
        Err(InvocationError::ConfigUnavailable { .. }) => {
            info!(job = %job.id, "no configuration available, job not spawned");
            let classification = classify(&ClassifyInput {
                config_resolved: false,
                outcome: None,
                mode: job.mode,
                artifact_exists: false,
            });
            return Ok(JobResult::unspawned(&job, classification, started.elapsed()));
        }
        Err(e) => return Err(format!("failed to build invocation: {e}")),
    };

    job.state = JobState::Running;
    let outcome = ctx
        .lifecycle
        .execute(&invocation.spec, cancel)
        .await
        .map_err(|e| e.to_string())?;

    // The process has been disposed; the probe sees the final filesystem state.
    let artifact_exists = invocation.artifact_path.exists();
    let mut classification = classify(&ClassifyInput {
        config_resolved: true,
        outcome: Some(&outcome),
        mode: job.mode,
        artifact_exists,
    });
    if artifact_exists && invocation.stale_artifact {
        classification.detail.push_str(" (artifact predates this run)");
    }
    debug!(
        job = %job.id,
        artifact = %invocation.artifact_path.display(),
        artifact_exists,
        markers = ?outcome.markers,
        "job classified"
    );
    drop(invocation);

    Ok(JobResult::processed(&job, classification, &outcome, started.elapsed()))
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolve an executable path, searching `PATH` for bare names
pub fn locate_executable(program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }

    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| {
            let candidate = dir.join(program);
            #[cfg(windows)]
            let candidates = vec![candidate.with_extension("exe"), candidate];
            #[cfg(not(windows))]
            let candidates = vec![candidate];
            candidates
        })
        .find(|candidate| candidate.is_file())
}
