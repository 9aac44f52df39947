// CLI Interface
//
// This module provides the command-line interface for LePilote.

use crate::config::PiloteConfig;
use crate::report::{ConsoleReporter, JsonSummaryReporter};
use crate::resolver::TemplateResolver;
use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use lelot::{DirectorySource, Dispatcher, JobMode, Reporter};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// LePilote - Headless CAD Batch Driver
#[derive(Parser, Debug)]
#[command(name = "lepilote")]
#[command(author = "LePilote Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive a script-controlled CAD engine over a directory of documents", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./lepilote.toml if present)
    #[arg(global = true, long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(global = true, long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process every eligible document in a directory
    Run {
        /// Directory of input documents (not searched recursively)
        #[arg(value_name = "INPUT_DIR")]
        input_dir: PathBuf,

        /// Maximum number of concurrent engine processes
        #[arg(long = "concurrency", short = 'j')]
        concurrency: Option<usize>,

        /// Per-job deadline in seconds
        #[arg(long = "deadline-secs")]
        deadline_secs: Option<u64>,

        /// Output root for expected artifacts
        #[arg(long = "output", short = 'o')]
        output: Option<PathBuf>,

        /// Success semantics (validation or artifact)
        #[arg(long = "mode")]
        mode: Option<JobMode>,

        /// Write the JSON run summary to this file
        #[arg(long = "summary")]
        summary: Option<PathBuf>,
    },

    /// Validate configuration and prerequisites without running anything
    Check,
}

impl Cli {
    /// Run the CLI
    pub async fn run(self) -> AnyhowResult<()> {
        let mut config = PiloteConfig::load(self.config.as_deref())?;
        config.apply_env();

        init_logging_impl(self.verbose, &config.logging.level);

        match self.command {
            Commands::Run {
                input_dir,
                concurrency,
                deadline_secs,
                output,
                mode,
                summary,
            } => {
                if let Some(concurrency) = concurrency {
                    config.batch.max_concurrency = concurrency;
                }
                if let Some(deadline_secs) = deadline_secs {
                    config.batch.deadline_secs = deadline_secs;
                }
                if let Some(output) = output {
                    config.batch.output_root = output;
                }
                if let Some(mode) = mode {
                    config.batch.mode = mode;
                }
                if let Some(summary) = summary {
                    config.report.summary_path = Some(summary);
                }
                cmd_run_impl(config, input_dir).await
            }
            Commands::Check => cmd_check_impl(config),
        }
    }
}

/// Initialize logging implementation
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug, else the
/// configured level.
fn init_logging_impl(verbose: bool, level: &str) {
    let fallback = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_dispatcher(config: &PiloteConfig) -> AnyhowResult<Dispatcher> {
    config.validate()?;

    let resolver = TemplateResolver::load(
        config.parameters.template.as_deref(),
        config.parameters.overrides_dir.as_deref(),
    )
    .context("Failed to load parameter sources")?;

    Ok(Dispatcher::new(config.batch.clone(), Arc::new(resolver)))
}

async fn cmd_run_impl(config: PiloteConfig, input_dir: PathBuf) -> AnyhowResult<()> {
    let dispatcher = build_dispatcher(&config)?;
    let source = DirectorySource::new(&input_dir, &config.batch.input_extensions);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let run = dispatcher
        .run(&source, cancel)
        .await
        .with_context(|| format!("Batch run over {:?} failed", input_dir))?;
    let summary = run.summary();

    if let Some(path) = &config.report.summary_path {
        JsonSummaryReporter::new(path)
            .report(&summary)
            .with_context(|| format!("Failed to write summary: {:?}", path))?;
    }
    if config.report.console {
        ConsoleReporter.report(&summary)?;
    }

    info!(
        success = summary.success,
        failed_processed = summary.failed_processed_count,
        non_processed = summary.non_processed_count,
        "done"
    );
    Ok(())
}

fn cmd_check_impl(config: PiloteConfig) -> AnyhowResult<()> {
    let dispatcher = build_dispatcher(&config)?;
    let fallback = dispatcher.preflight().context("Pre-flight check failed")?;

    println!("Configuration OK");
    println!("  Engine:       {}", config.batch.engine.display());
    println!("  Dependencies: {}", config.batch.dependencies.len());
    println!("  Mode:         {}", config.batch.mode);
    println!("  Concurrency:  {}", config.batch.max_concurrency);
    println!("  Deadline:     {}s", config.batch.deadline_secs);
    println!(
        "  Fallback:     {}",
        if fallback.is_some() { "loaded" } else { "none" }
    );
    Ok(())
}

/// Main entry point for the CLI
pub async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();
    cli.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_parsing() {
        let cli = Cli::try_parse_from([
            "lepilote",
            "run",
            "/data/drawings",
            "--concurrency",
            "2",
            "--deadline-secs",
            "60",
            "--mode",
            "artifact",
            "--summary",
            "out/summary.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                input_dir,
                concurrency,
                deadline_secs,
                mode,
                summary,
                output,
            } => {
                assert_eq!(input_dir, PathBuf::from("/data/drawings"));
                assert_eq!(concurrency, Some(2));
                assert_eq!(deadline_secs, Some(60));
                assert_eq!(mode, Some(JobMode::Artifact));
                assert_eq!(summary, Some(PathBuf::from("out/summary.json")));
                assert_eq!(output, None);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_check_command_with_global_config() {
        let cli = Cli::try_parse_from(["lepilote", "check", "--config", "site.toml", "-v"]).unwrap();
        assert!(matches!(cli.command, Commands::Check));
        assert_eq!(cli.config, Some(PathBuf::from("site.toml")));
        assert!(cli.verbose);
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(Cli::try_parse_from(["lepilote", "run", "in", "--mode", "render"]).is_err());
    }

    #[test]
    fn test_run_requires_input_dir() {
        assert!(Cli::try_parse_from(["lepilote", "run"]).is_err());
    }
}
