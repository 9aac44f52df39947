//! Output stream capture
//!
//! Each piped stream gets its own reader task that appends lines to a shared
//! buffer and records markers as the lines arrive. The buffer lives outside
//! the tasks, so aborting a reader never loses what it already read.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::markers::{LineClassifier, OutputMarker};

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
    markers: BTreeSet<OutputMarker>,
}

/// Shared capture buffer for one process
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    inner: Arc<Mutex<Captured>>,
}

/// Snapshot of everything captured
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    /// Captured stdout text
    pub stdout: String,
    /// Captured stderr text
    pub stderr: String,
    /// Markers detected on either stream
    pub markers: BTreeSet<OutputMarker>,
}

impl OutputCapture {
    /// Create an empty capture
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one line and return the marker it carried
    pub fn record_line(
        &self,
        kind: StreamKind,
        line: &str,
        classifier: &dyn LineClassifier,
    ) -> Option<OutputMarker> {
        let marker = classifier.classify_output_line(line);
        let mut captured = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let buffer = match kind {
            StreamKind::Stdout => &mut captured.stdout,
            StreamKind::Stderr => &mut captured.stderr,
        };
        buffer.push_str(line);
        buffer.push('\n');
        if let Some(marker) = marker {
            captured.markers.insert(marker);
        }
        marker
    }

    /// Copy out what has been captured so far
    pub fn snapshot(&self) -> CapturedOutput {
        let captured = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        CapturedOutput {
            stdout: captured.stdout.clone(),
            stderr: captured.stderr.clone(),
            markers: captured.markers.clone(),
        }
    }

    /// Start a reader task for one stream
    pub fn spawn_reader<R>(
        &self,
        label: &str,
        kind: StreamKind,
        stream: R,
        classifier: Arc<dyn LineClassifier>,
    ) -> JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let capture = self.clone();
        let label = label.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        // Engines print in legacy code pages; keep reading to EOF either way.
                        let line = String::from_utf8_lossy(trim_line_end(&buf));
                        if let Some(marker) = capture.record_line(kind, &line, classifier.as_ref()) {
                            warn!(job = %label, ?kind, %marker, "failure marker in engine output: {}", line.trim());
                        }
                    }
                    Err(e) => {
                        debug!(job = %label, ?kind, "stopped reading engine output: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

fn trim_line_end(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

/// Wait for readers to reach end-of-stream, aborting any still running after
/// `timeout`.
///
/// Grandchildren that inherited the pipe can keep a stream open after the
/// engine itself exited; the abort releases our end regardless.
pub async fn drain_readers(label: &str, readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    for mut reader in readers {
        match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(_) => {}
            Err(_) => {
                debug!(job = %label, "aborting output reader still open after {:?}", timeout);
                reader.abort();
                let _ = reader.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::KeywordClassifier;

    #[test]
    fn test_record_line_splits_streams() {
        let capture = OutputCapture::new();
        let classifier = KeywordClassifier::default();

        capture.record_line(StreamKind::Stdout, "Regenerating model.", &classifier);
        capture.record_line(StreamKind::Stderr, "warning: slow", &classifier);

        let out = capture.snapshot();
        assert_eq!(out.stdout, "Regenerating model.\n");
        assert_eq!(out.stderr, "warning: slow\n");
        assert!(out.markers.is_empty());
    }

    #[test]
    fn test_record_line_collects_markers() {
        let capture = OutputCapture::new();
        let classifier = KeywordClassifier::default();

        let marker = capture.record_line(StreamKind::Stdout, "Unknown command \"X\"", &classifier);
        assert_eq!(marker, Some(OutputMarker::CommandNotFound));
        capture.record_line(StreamKind::Stderr, "NETLOAD failed", &classifier);

        let out = capture.snapshot();
        assert_eq!(out.markers.len(), 2);
        assert!(out.markers.contains(&OutputMarker::CommandNotFound));
        assert!(out.markers.contains(&OutputMarker::DependencyLoadFailure));
    }

    #[tokio::test]
    async fn test_reader_consumes_stream() {
        let capture = OutputCapture::new();
        let data: &'static [u8] = b"line one\nUnknown command \"FOO\"\nline three";
        let handle = capture.spawn_reader(
            "test",
            StreamKind::Stdout,
            data,
            Arc::new(KeywordClassifier::default()),
        );

        drain_readers("test", vec![handle], Duration::from_secs(5)).await;

        let out = capture.snapshot();
        assert_eq!(out.stdout, "line one\nUnknown command \"FOO\"\nline three\n");
        assert!(out.markers.contains(&OutputMarker::CommandNotFound));
    }

    #[tokio::test]
    async fn test_reader_survives_non_utf8_output() {
        let capture = OutputCapture::new();
        let data: &'static [u8] = b"Fichier \xe9crit\r\nUnknown command \"CHECK\"\ndone\n";
        let handle = capture.spawn_reader(
            "latin1",
            StreamKind::Stdout,
            data,
            Arc::new(KeywordClassifier::default()),
        );

        drain_readers("latin1", vec![handle], Duration::from_secs(5)).await;

        let out = capture.snapshot();
        assert_eq!(out.stdout, "Fichier \u{FFFD}crit\nUnknown command \"CHECK\"\ndone\n");
        assert!(out.markers.contains(&OutputMarker::CommandNotFound));
    }

    #[tokio::test]
    async fn test_drain_aborts_stuck_reader() {
        let capture = OutputCapture::new();
        let (_writer, reader) = tokio::io::duplex(64);
        let handle = capture.spawn_reader(
            "stuck",
            StreamKind::Stderr,
            reader,
            Arc::new(KeywordClassifier::default()),
        );

        let started = std::time::Instant::now();
        drain_readers("stuck", vec![handle], Duration::from_millis(100)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
