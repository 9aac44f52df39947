//! Process specification
//!
//! Everything needed to start one engine process, independent of how the
//! values were produced.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

/// Description of a process to spawn
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Label used in logs (usually the job identity)
    pub name: String,

    /// Executable to run
    pub program: PathBuf,

    /// Command-line arguments
    pub args: Vec<String>,

    /// Extra environment variables, layered on top of the inherited environment
    pub env: BTreeMap<String, String>,

    /// Working directory, if different from the current one
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    /// Create a spec for `program` with no arguments
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add one environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Add several environment variables
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Build the tokio command.
    ///
    /// stdin is closed, both output streams are piped, and the child is
    /// killed if its handle is dropped before it was reaped. On Unix the
    /// child leads a fresh process group so the whole tree can be signalled
    /// at once.
    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);

        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}
