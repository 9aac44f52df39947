//! Output failure markers
//!
//! Engine output is free text. These heuristics recognise the two failure
//! signatures the classifier cares about; they are recorded while the process
//! runs and never stop it.

use serde::{Deserialize, Serialize};

/// Failure signature detected in one output line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMarker {
    /// A load-time dependency (plugin, assembly) failed to load
    DependencyLoadFailure,
    /// The engine did not recognise the command it was asked to run
    CommandNotFound,
}

impl std::fmt::Display for OutputMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependencyLoadFailure => write!(f, "dependency-load-failure"),
            Self::CommandNotFound => write!(f, "command-not-found"),
        }
    }
}

/// Classifies a single line of engine output
pub trait LineClassifier: Send + Sync {
    /// Return the marker this line carries, if any
    fn classify_output_line(&self, line: &str) -> Option<OutputMarker>;
}

impl<F> LineClassifier for F
where
    F: Fn(&str) -> Option<OutputMarker> + Send + Sync,
{
    fn classify_output_line(&self, line: &str) -> Option<OutputMarker> {
        self(line)
    }
}

/// A rule matches when every keyword appears in the line (case-insensitive)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRule {
    /// Marker reported on match
    pub marker: OutputMarker,

    /// Keywords that must all be present
    pub all_of: Vec<String>,
}

impl MarkerRule {
    /// Create a rule from a marker and keywords
    pub fn new<I, S>(marker: OutputMarker, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            marker,
            all_of: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        !self.all_of.is_empty()
            && self
                .all_of
                .iter()
                .all(|k| lowered.contains(k.to_lowercase().as_str()))
    }

    /// Rules used when none are configured
    pub fn defaults() -> Vec<MarkerRule> {
        vec![
            MarkerRule::new(OutputMarker::CommandNotFound, ["unknown command"]),
            MarkerRule::new(OutputMarker::CommandNotFound, ["command not found"]),
            MarkerRule::new(OutputMarker::DependencyLoadFailure, ["netload", "fail"]),
            MarkerRule::new(OutputMarker::DependencyLoadFailure, ["netload", "error"]),
            MarkerRule::new(OutputMarker::DependencyLoadFailure, ["cannot load assembly"]),
            MarkerRule::new(
                OutputMarker::DependencyLoadFailure,
                ["could not load file or assembly"],
            ),
        ]
    }
}

/// Keyword-rule classifier.
///
/// Command-not-found rules are evaluated before dependency rules, so a line
/// matching both is reported as command-not-found.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<MarkerRule>,
}

impl KeywordClassifier {
    /// Create a classifier from explicit rules
    pub fn new(rules: Vec<MarkerRule>) -> Self {
        let mut rules = rules;
        rules.sort_by_key(|r| match r.marker {
            OutputMarker::CommandNotFound => 0,
            OutputMarker::DependencyLoadFailure => 1,
        });
        Self { rules }
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[MarkerRule] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(MarkerRule::defaults())
    }
}

impl LineClassifier for KeywordClassifier {
    fn classify_output_line(&self, line: &str) -> Option<OutputMarker> {
        let lowered = line.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.marker)
    }
}
