// Pilot Configuration
//
// *La Configuration* (The Configuration) - Batch, parameter, report and
// logging settings for LePilote

use anyhow::{Context, Result};
use lelot::BatchConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "lepilote.toml";

/// Full application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PiloteConfig {
    /// Batch settings handed to the dispatcher
    pub batch: BatchConfig,

    /// Parameter sources
    pub parameters: ParametersConfig,

    /// Summary output
    pub report: ReportConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Where job parameters come from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametersConfig {
    /// Base template merged under every per-job override
    pub template: Option<PathBuf>,

    /// Directory of `<job_id>.json` override documents
    pub overrides_dir: Option<PathBuf>,
}

/// Summary output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Write the JSON summary here
    pub summary_path: Option<PathBuf>,

    /// Print the summary to stdout
    pub console: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            summary_path: None,
            console: true,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PiloteConfig {
    /// Load configuration from a TOML file
    ///
    /// An explicit `path` must exist. Without one, `lepilote.toml` in the
    /// current directory is used if present, else the defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Explicit configuration file, if any
    ///
    /// # Returns
    ///
    /// `Result<PiloteConfig>` - Loaded or default configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: PiloteConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Environment variables:
    /// - `LEPILOTE_ENGINE` - Engine executable
    /// - `LEPILOTE_CONCURRENCY` - Maximum concurrent jobs
    /// - `LEPILOTE_DEADLINE_SECS` - Per-job deadline
    /// - `LEPILOTE_OUTPUT` - Output root
    /// - `LEPILOTE_LOG_LEVEL` - Log level
    ///
    /// Unparseable numbers are ignored.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(engine) = lookup("LEPILOTE_ENGINE") {
            self.batch.engine = PathBuf::from(engine);
        }

        if let Some(concurrency) = lookup("LEPILOTE_CONCURRENCY") {
            if let Ok(concurrency) = concurrency.parse::<usize>() {
                self.batch.max_concurrency = concurrency;
            }
        }

        if let Some(deadline) = lookup("LEPILOTE_DEADLINE_SECS") {
            if let Ok(deadline) = deadline.parse::<u64>() {
                self.batch.deadline_secs = deadline;
            }
        }

        if let Some(output) = lookup("LEPILOTE_OUTPUT") {
            self.batch.output_root = PathBuf::from(output);
        }

        if let Some(level) = lookup("LEPILOTE_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.batch
            .validate()
            .context("Invalid [batch] configuration")?;

        if let Some(dir) = &self.parameters.overrides_dir {
            anyhow::ensure!(
                dir.is_dir(),
                "Parameter overrides directory does not exist: {:?}",
                dir
            );
        }

        Ok(())
    }
}
