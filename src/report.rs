// Summary Reporters
//
// JSON file and console renderings of a run summary

use lelot::{BatchError, Reporter, RunSummary};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Writes the summary as pretty-printed JSON
#[derive(Debug, Clone)]
pub struct JsonSummaryReporter {
    path: PathBuf,
}

impl JsonSummaryReporter {
    /// Write to `path`, creating parent directories as needed
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter for JsonSummaryReporter {
    fn report(&self, summary: &RunSummary) -> lelot::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(summary)
            .map_err(|e| BatchError::Report(e.to_string()))?;
        fs::write(&self.path, json)?;

        info!(path = %self.path.display(), "run summary written");
        Ok(())
    }
}

/// Prints a human-readable summary to stdout
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report(&self, summary: &RunSummary) -> lelot::Result<()> {
        println!("{}", render_summary(summary));
        Ok(())
    }
}

/// Render a summary as plain text
pub fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Batch run {}", summary.run_timestamp);
    let _ = writeln!(
        out,
        "  Started:  {}",
        summary.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(
        out,
        "  Duration: {:.1}s",
        summary.wall_clock_ms as f64 / 1000.0
    );
    let _ = writeln!(out, "  Output:   {}", summary.output_root.display());
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Jobs: {} discovered, {} dispatched",
        summary.discovered, summary.dispatched
    );
    let _ = writeln!(out, "    Success:          {}", summary.success);
    let _ = writeln!(out, "    Failed processed: {}", summary.failed_processed_count);
    let _ = writeln!(out, "    Non-processed:    {}", summary.non_processed_count);

    if !summary.failed_processed.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Failed (processed):");
        for job in &summary.failed_processed {
            let _ = writeln!(out, "    {}: {}", job.job_id, job.detail);
        }
    }

    if !summary.non_processed.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Non-processed:");
        for (job_id, entry) in &summary.non_processed {
            let _ = writeln!(out, "    {}: {} ({})", job_id, entry.reason, entry.detail);
        }
    }

    if !summary.dependency_load_failures.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  Dependency load failures: {}",
            summary.dependency_load_failures.join(", ")
        );
    }

    if summary.cancelled {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "  Run cancelled; {} job(s) not dispatched: {}",
            summary.not_dispatched.len(),
            summary.not_dispatched.join(", ")
        );
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "  Durations:");
    for job in &summary.job_durations {
        let _ = writeln!(
            out,
            "    {:<32} {:>8.1}s  {}",
            job.job_id,
            job.duration_ms as f64 / 1000.0,
            job.category
        );
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lelot::aggregate::{FailedJob, JobDuration, ReasonEntry};
    use lelot::{JobCategory, OutcomeReason};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn summary() -> RunSummary {
        let now = chrono::Local::now();
        RunSummary {
            run_timestamp: "20260101_120000_000".to_string(),
            started_at: now,
            finished_at: now,
            wall_clock_ms: 2500,
            output_root: PathBuf::from("/out"),
            discovered: 4,
            dispatched: 3,
            success: 1,
            failed_processed_count: 1,
            non_processed_count: 1,
            job_durations: vec![
                JobDuration {
                    job_id: "a".to_string(),
                    category: JobCategory::Success,
                    duration_ms: 1200,
                },
                JobDuration {
                    job_id: "b".to_string(),
                    category: JobCategory::FailedProcessed,
                    duration_ms: 800,
                },
            ],
            non_processed: BTreeMap::from([(
                "c".to_string(),
                ReasonEntry {
                    reason: OutcomeReason::Timeout,
                    detail: "deadline exceeded".to_string(),
                },
            )]),
            failed_processed: vec![FailedJob {
                job_id: "b".to_string(),
                reason: OutcomeReason::ValidationIssuesRecorded,
                detail: "validation issues recorded".to_string(),
            }],
            not_dispatched: vec!["d".to_string()],
            dependency_load_failures: vec!["a".to_string()],
            cancelled: true,
        }
    }

    #[test]
    fn test_render_summary() {
        let text = render_summary(&summary());
        assert!(text.contains("4 discovered, 3 dispatched"));
        assert!(text.contains("c: Timeout (deadline exceeded)"));
        assert!(text.contains("b: validation issues recorded"));
        assert!(text.contains("Dependency load failures: a"));
        assert!(text.contains("1 job(s) not dispatched: d"));
    }

    #[test]
    fn test_json_reporter_writes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports").join("summary.json");

        JsonSummaryReporter::new(&path).report(&summary()).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["discovered"], 4);
        assert_eq!(written["non_processed"]["c"]["reason"], "Timeout");
    }
}
