//! Progress events
//!
//! The dispatcher emits structured events to a [`ProgressSink`]; rendering
//! them is up to the sink.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};

use crate::classify::{JobCategory, OutcomeReason};

/// Event emitted while a run progresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Jobs discovered, dispatch about to start
    RunStarted {
        /// Jobs discovered
        total: usize,
        /// Workers in the pool
        workers: usize,
    },
    /// A worker picked up a job
    JobStarted {
        /// Job identity
        job_id: String,
    },
    /// A job reached its result
    JobFinished {
        /// Job identity
        job_id: String,
        /// Category
        category: JobCategory,
        /// Reason
        reason: OutcomeReason,
        /// Results recorded so far
        completed: usize,
        /// Jobs discovered
        total: usize,
    },
    /// Cancellation observed; no further jobs are dispatched
    RunCancelled {
        /// Results recorded when cancellation was observed
        completed: usize,
    },
    /// All workers stopped
    RunFinished {
        /// Results recorded
        completed: usize,
        /// Jobs discovered
        total: usize,
    },
}

/// Receives progress events
pub trait ProgressSink: Send + Sync {
    /// Handle one event
    fn emit(&self, event: ProgressEvent);
}

/// Logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { total, workers } => {
                info!(total, workers, "batch run started")
            }
            ProgressEvent::JobStarted { job_id } => info!(job = %job_id, "job started"),
            ProgressEvent::JobFinished {
                job_id,
                category,
                reason,
                completed,
                total,
            } => info!(job = %job_id, %category, %reason, "[{}/{}] job finished", completed, total),
            ProgressEvent::RunCancelled { completed } => {
                warn!(completed, "run cancelled, no further jobs will be dispatched")
            }
            ProgressEvent::RunFinished { completed, total } => {
                info!(completed, total, "batch run finished")
            }
        }
    }
}

/// Forwards events to a channel
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    /// Forward to `tx`
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

/// Discards events
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_progress_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ChannelProgress::new(tx);
        sink.emit(ProgressEvent::JobStarted {
            job_id: "a".to_string(),
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::JobStarted {
                job_id: "a".to_string()
            }
        );
    }

    #[test]
    fn test_channel_progress_tolerates_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        ChannelProgress::new(tx).emit(ProgressEvent::RunFinished {
            completed: 0,
            total: 0,
        });
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(ProgressEvent::JobFinished {
            job_id: "a".to_string(),
            category: JobCategory::Success,
            reason: OutcomeReason::NoIssuesRecorded,
            completed: 1,
            total: 3,
        })
        .unwrap();
        assert_eq!(json["event"], "job_finished");
        assert_eq!(json["completed"], 1);
    }
}
