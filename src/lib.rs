//! LePilote - Headless CAD Batch Driver
//!
//! *Le Pilote* (The Pilot) - Drives a script-controlled CAD engine over a
//! directory of documents: bounded-parallel dispatch, per-job deadlines,
//! process-tree cleanup and outcome classification.
//!
//! The orchestration core lives in [`lelot`]; this crate adds configuration
//! loading, the template-based parameter resolver, reporters and the CLI.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Configuration file and environment overrides
pub mod config;

/// Template-based parameter resolver
pub mod resolver;

/// Summary reporters
pub mod report;

/// Command-line interface
#[cfg(feature = "cli")]
pub mod cli;

pub use config::{PiloteConfig, DEFAULT_CONFIG_FILE};
pub use lelot;
pub use report::{render_summary, ConsoleReporter, JsonSummaryReporter};
pub use resolver::{merge_json, TemplateResolver};
