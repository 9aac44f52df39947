//! Invocation builder
//!
//! Turns a job and its resolved payload into everything the engine needs:
//! a control script, a parameter bundle and the expected artifact path.
//!
//! Parameters reach the engine through three channels carrying the same
//! values, because the engine-side command decides which one it reads:
//!
//! - process environment variables (`LEPILOTE_*`);
//! - `(setq LEPILOTE_* "...")` assignments at the top of the script;
//! - a sidecar JSON file, whose path is itself in the other two channels as
//!   `LEPILOTE_PARAMS_FILE`.
//!
//! Script and sidecar names embed the job index, job identity and run
//! timestamp, so concurrent jobs never collide. The artifact path depends
//! only on the output root and job identity, so later runs probe the same
//! name.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use leprocessus::ProcessSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::job::{Job, JobMode};
use crate::VARIABLE_PREFIX;

/// Errors from building an invocation
#[derive(Debug, Error)]
pub enum InvocationError {
    /// No payload from the resolver and no fallback template
    #[error("no configuration available for job '{job_id}'")]
    ConfigUnavailable {
        /// Job identity
        job_id: String,
    },

    /// Writing a generated file failed
    #[error("failed to write {path}: {source}")]
    Io {
        /// File being written
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Sidecar serialization failed
    #[error("failed to serialize parameters: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sidecar parameter document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarParameters {
    /// Job identity
    pub job_id: String,
    /// Input document
    pub input_path: PathBuf,
    /// Folder the engine writes the artifact into
    pub output_folder: PathBuf,
    /// Artifact file name
    pub output_filename: String,
    /// Full artifact path
    pub output_path: PathBuf,
    /// Run timestamp
    pub run_timestamp: String,
    /// Job mode
    pub mode: JobMode,
    /// Resolved configuration payload
    pub parameters: Value,
}

/// Values handed to the engine, identical across channels
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBundle {
    /// Named values used for environment variables and script assignments
    pub variables: BTreeMap<String, String>,

    /// Sidecar document
    pub sidecar: SidecarParameters,

    /// Where the sidecar is written
    pub sidecar_path: PathBuf,
}

impl ParameterBundle {
    /// Environment channel
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Script channel: one `(setq NAME "value")` line per variable
    pub fn setq_lines(&self) -> Vec<String> {
        self.variables
            .iter()
            .map(|(name, value)| format!("(setq {} \"{}\")", name, lisp_escape(value)))
            .collect()
    }
}

/// A built invocation. Owns its generated files and deletes them on drop.
#[derive(Debug)]
pub struct Invocation {
    /// Job identity
    pub job_id: String,

    /// Control script
    pub script_path: PathBuf,

    /// Parameter bundle
    pub bundle: ParameterBundle,

    /// Expected output artifact
    pub artifact_path: PathBuf,

    /// Process to run
    pub spec: ProcessSpec,

    /// The artifact already existed before spawn and was left in place
    pub stale_artifact: bool,

    keep_files: bool,
}

impl Invocation {
    /// Generated files owned by this invocation
    pub fn files(&self) -> [&Path; 2] {
        [self.script_path.as_path(), self.bundle.sidecar_path.as_path()]
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.keep_files {
            return;
        }
        for path in [&self.script_path, &self.bundle.sidecar_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => debug!(path = %path.display(), "failed to remove invocation file: {}", e),
            }
        }
    }
}

/// Builds invocations for one run
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    config: BatchConfig,
    run_timestamp: String,
    fallback: Option<Value>,
}

impl InvocationBuilder {
    /// Create a builder for a run started at `run_timestamp`
    pub fn new(config: BatchConfig, run_timestamp: impl Into<String>, fallback: Option<Value>) -> Self {
        Self {
            config,
            run_timestamp: run_timestamp.into(),
            fallback,
        }
    }

    /// Run timestamp embedded in file names
    pub fn run_timestamp(&self) -> &str {
        &self.run_timestamp
    }

    /// Deterministic artifact path for a job
    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.config
            .output_root
            .join(format!("{}.{}", job_id, self.config.artifact_extension()))
    }

    /// Build the invocation for `job`, writing its script and sidecar.
    ///
    /// Uses the job's resolved payload, else the fallback template, else
    /// fails with [`InvocationError::ConfigUnavailable`] without touching
    /// the filesystem.
    pub fn build(&self, job: &Job) -> Result<Invocation, InvocationError> {
        let parameters = match job.config.as_ref().or(self.fallback.as_ref()) {
            Some(parameters) => parameters.clone(),
            None => {
                return Err(InvocationError::ConfigUnavailable {
                    job_id: job.id.clone(),
                })
            }
        };

        let stem = format!(
            "{:04}_{}_{}",
            job.index,
            sanitize(&job.id),
            self.run_timestamp
        );
        let script_path = self.config.script_dir.join(format!("{stem}.scr"));
        let sidecar_path = self.config.script_dir.join(format!("{stem}.json"));
        let artifact_path = self.artifact_path(&job.id);
        let output_filename = format!("{}.{}", job.id, self.config.artifact_extension());

        let sidecar = SidecarParameters {
            job_id: job.id.clone(),
            input_path: job.source_path.clone(),
            output_folder: self.config.output_root.clone(),
            output_filename: output_filename.clone(),
            output_path: artifact_path.clone(),
            run_timestamp: self.run_timestamp.clone(),
            mode: job.mode,
            parameters,
        };

        let mut variables = BTreeMap::new();
        let mut set = |name: &str, value: String| {
            variables.insert(format!("{VARIABLE_PREFIX}{name}"), value);
        };
        set("JOB_ID", job.id.clone());
        set("INPUT_PATH", display(&job.source_path));
        set("OUTPUT_FOLDER", display(&self.config.output_root));
        set("OUTPUT_FILE", output_filename);
        set("OUTPUT_PATH", display(&artifact_path));
        set("RUN_TIMESTAMP", self.run_timestamp.clone());
        set("MODE", job.mode.to_string());
        set("PARAMS_FILE", display(&sidecar_path));
        if let Value::Object(map) = &sidecar.parameters {
            for (key, value) in map {
                if let Some(text) = scalar_text(value) {
                    set(&format!("PARAM_{}", variable_name(key)), text);
                }
            }
        }

        let bundle = ParameterBundle {
            variables,
            sidecar,
            sidecar_path,
        };

        let placeholders = Placeholders {
            document: display(&job.source_path),
            script: display(&script_path),
            params: display(&bundle.sidecar_path),
            job: job.id.clone(),
            output: display(&artifact_path),
        };

        let spec = ProcessSpec::new(job.id.clone(), self.config.engine.clone())
            .args(self.config.engine_args.iter().map(|a| placeholders.render(a, false)))
            .envs(bundle.env().clone());

        let mut invocation = Invocation {
            job_id: job.id.clone(),
            script_path,
            bundle,
            artifact_path,
            spec,
            stale_artifact: false,
            keep_files: self.config.keep_invocation_files,
        };

        // From here on, a failure drops `invocation` and removes what was written.
        self.write_files(&invocation, &placeholders)?;
        self.prepare_output(&mut invocation)?;

        debug!(job = %job.id, script = %invocation.script_path.display(), "invocation built");
        Ok(invocation)
    }

    fn write_files(&self, invocation: &Invocation, placeholders: &Placeholders) -> Result<(), InvocationError> {
        create_dir(&self.config.script_dir)?;

        let sidecar = serde_json::to_string_pretty(&invocation.bundle.sidecar)?;
        fs::write(&invocation.bundle.sidecar_path, sidecar).map_err(|source| InvocationError::Io {
            path: invocation.bundle.sidecar_path.clone(),
            source,
        })?;

        let script = self.render_script(invocation, placeholders);
        fs::write(&invocation.script_path, script).map_err(|source| InvocationError::Io {
            path: invocation.script_path.clone(),
            source,
        })
    }

    fn prepare_output(&self, invocation: &mut Invocation) -> Result<(), InvocationError> {
        create_dir(&self.config.output_root)?;

        if !invocation.artifact_path.exists() {
            return Ok(());
        }

        if self.config.clear_stale_artifacts {
            warn!(job = %invocation.job_id, path = %invocation.artifact_path.display(), "removing stale artifact");
            fs::remove_file(&invocation.artifact_path).map_err(|source| InvocationError::Io {
                path: invocation.artifact_path.clone(),
                source,
            })?;
        } else {
            warn!(
                job = %invocation.job_id,
                path = %invocation.artifact_path.display(),
                "artifact exists before spawn and will count towards this run"
            );
            invocation.stale_artifact = true;
        }
        Ok(())
    }

    /// Control script text
    fn render_script(&self, invocation: &Invocation, placeholders: &Placeholders) -> String {
        let mut lines = vec![
            "; lepilote control script".to_string(),
            format!("; job: {}", invocation.job_id),
            format!("; run: {}", self.run_timestamp),
        ];

        lines.extend(invocation.bundle.setq_lines());

        for dependency in &self.config.dependencies {
            lines.push(
                self.config
                    .dependency_directive
                    .replace("{path}", &lisp_escape(&display(dependency))),
            );
        }

        for command in &self.config.commands {
            lines.push(placeholders.render(command, true));
        }

        lines.extend(self.config.quit_directives.iter().cloned());

        let mut script = lines.join("\n");
        script.push('\n');
        script
    }
}

struct Placeholders {
    document: String,
    script: String,
    params: String,
    job: String,
    output: String,
}

impl Placeholders {
    fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "document" => Some(self.document.as_str()),
            "script" => Some(self.script.as_str()),
            "params" => Some(self.params.as_str()),
            "job" => Some(self.job.as_str()),
            "output" => Some(self.output.as_str()),
            _ => None,
        }
    }

    /// Substitute placeholders in one left-to-right pass; substituted text is
    /// never rescanned and unknown `{names}` are left as written.
    fn render(&self, template: &str, escape: bool) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let tail = &rest[open..];
            let value = tail
                .find('}')
                .and_then(|close| self.lookup(&tail[1..close]).map(|v| (v, close)));
            match value {
                Some((value, close)) => {
                    if escape {
                        out.push_str(&lisp_escape(value));
                    } else {
                        out.push_str(value);
                    }
                    rest = &tail[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn create_dir(dir: &Path) -> Result<(), InvocationError> {
    fs::create_dir_all(dir).map_err(|source| InvocationError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Escape a value for a double-quoted script string
fn lisp_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            c => out.push(c),
        }
    }
    out
}

/// File-name-safe form of a job identity
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Variable-name form of a payload key
fn variable_name(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
