//! Job discovery
//!
//! Lists eligible input files in one directory (non-recursive) and turns each
//! into a [`Job`]. A missing or unreadable directory is the one failure that
//! aborts the run before anything starts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BatchError, Result};
use crate::job::{Job, JobMode};

/// Produces the jobs of a run, in discovery order
pub trait JobSource: Send + Sync {
    /// Enumerate jobs
    fn jobs(&self, mode: JobMode) -> Result<Vec<Job>>;
}

/// Files with matching extensions in a single directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
}

impl DirectorySource {
    /// Create a source over `root` accepting `extensions` (without dots)
    pub fn new<I, S>(root: impl Into<PathBuf>, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            root: root.into(),
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Directory being scanned
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_eligible(&self, path: &Path) -> bool {
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(true);
        if hidden {
            return false;
        }

        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}

impl JobSource for DirectorySource {
    fn jobs(&self, mode: JobMode) -> Result<Vec<Job>> {
        if !self.root.is_dir() {
            return Err(BatchError::Enumeration {
                path: self.root.clone(),
                reason: "directory does not exist".to_string(),
            });
        }

        let mut jobs = Vec::new();
        let mut assigned: HashSet<String> = HashSet::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                // Unreadable root: fatal. Unreadable entry (dangling link): skipped.
                Err(e) if e.depth() == 0 => {
                    return Err(BatchError::Enumeration {
                        path: self.root.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(e) => {
                    debug!(root = %self.root.display(), "skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_eligible(entry.path()) {
                continue;
            }

            let stem = match entry.path().file_stem().and_then(|s| s.to_str()) {
                Some(stem) if !stem.is_empty() => stem.to_string(),
                _ => {
                    debug!(path = %entry.path().display(), "skipping file without usable name");
                    continue;
                }
            };

            let id = unique_id(&stem, &mut assigned);

            jobs.push(Job::new(id, jobs.len(), entry.path(), mode));
        }

        info!(root = %self.root.display(), jobs = jobs.len(), "discovered jobs");
        Ok(jobs)
    }
}

/// First of `stem`, `stem-2`, `stem-3`, ... not yet assigned (case-insensitive)
fn unique_id(stem: &str, assigned: &mut HashSet<String>) -> String {
    let mut id = stem.to_string();
    let mut n = 1;
    while !assigned.insert(id.to_lowercase()) {
        n += 1;
        id = format!("{}-{}", stem, n);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_missing_directory_is_enumeration_error() {
        let source = DirectorySource::new("/nonexistent/lepilote/input", ["dwg"]);
        let err = source.jobs(JobMode::Validation).unwrap_err();
        assert!(matches!(err, BatchError::Enumeration { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_lists_matching_files_in_name_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.dwg");
        touch(dir.path(), "a.DWG");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), ".hidden.dwg");
        fs::create_dir(dir.path().join("sub.dwg")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "c.dwg");

        let jobs = DirectorySource::new(dir.path(), ["dwg"])
            .jobs(JobMode::Artifact)
            .unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(jobs[0].index, 0);
        assert_eq!(jobs[1].index, 1);
        assert_eq!(jobs[1].mode, JobMode::Artifact);
        assert_eq!(jobs[1].source_path, dir.path().join("b.dwg"));
    }

    #[test]
    fn test_duplicate_stems_get_suffixes() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "plan.dwg");
        touch(dir.path(), "plan.dxf");

        let jobs = DirectorySource::new(dir.path(), ["dwg", ".dxf"])
            .jobs(JobMode::Validation)
            .unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["plan", "plan-2"]);
    }

    #[test]
    fn test_suffix_never_reuses_an_existing_stem() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a-2.dwg");
        touch(dir.path(), "a.DWG");
        touch(dir.path(), "a.dwg");

        let jobs = DirectorySource::new(dir.path(), ["dwg"])
            .jobs(JobMode::Validation)
            .unwrap();

        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a-2", "a", "a-3"]);
    }

    #[test]
    fn test_unique_id_skips_taken_candidates() {
        let mut assigned = HashSet::new();
        assert_eq!(unique_id("plan", &mut assigned), "plan");
        assert_eq!(unique_id("plan-2", &mut assigned), "plan-2");
        assert_eq!(unique_id("PLAN", &mut assigned), "PLAN-3");
        assert_eq!(unique_id("plan-2", &mut assigned), "plan-2-2");
    }

    #[test]
    fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let jobs = DirectorySource::new(dir.path(), ["dwg"])
            .jobs(JobMode::Validation)
            .unwrap();
        assert!(jobs.is_empty());
    }
}
