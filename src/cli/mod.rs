//! Command-line interface for inspecting and tuning the reliability gates.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::metrics::MetricsArgs;
pub use commands::runs::RunsArgs;
pub use commands::thresholds::ThresholdsArgs;

#[derive(Parser)]
#[command(name = "fixloop")]
#[command(about = "Fixloop - self-tuning repair loop reliability tools", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .fixloop/
    #[arg(short, long, global = true, env = "FIXLOOP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect, analyze and reset adaptive thresholds
    Thresholds(ThresholdsArgs),
    /// Show aggregated reliability metrics for a gate
    Metrics(MetricsArgs),
    /// Inspect persisted run snapshots
    Runs(RunsArgs),
}

/// Print an error in the selected output mode and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({ "error": format!("{err:#}") });
        eprintln!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
