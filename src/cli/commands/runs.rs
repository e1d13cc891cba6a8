//! Run snapshot CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use super::AppContext;
use crate::adapters::sqlite::SqliteRunSnapshotRepository;
use crate::cli::output::{output, CommandOutput};
use crate::domain::errors::DomainError;
use crate::domain::models::RunState;
use crate::domain::ports::RunSnapshotRepository;

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub command: RunsCommands,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// Show the latest snapshot of a run
    Show {
        /// Run ID
        run_id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct RunSnapshotOutput {
    pub state: RunState,
}

impl CommandOutput for RunSnapshotOutput {
    fn to_human(&self) -> String {
        let s = &self.state;
        let mut lines = vec![format!("Run {}", s.run_id)];
        lines.push(format!("  Status:         {}", s.status.as_str()));
        lines.push(format!("  Step:           {}", s.current_step.as_str()));
        lines.push(format!("  Iteration:      {}/{}", s.iteration, s.max_iterations));
        lines.push(format!("  Started:        {}", s.started_at.to_rfc3339()));
        if let Some(diagnosis) = &s.diagnosis {
            lines.push(format!("  Diagnosis:      {}", diagnosis.summary));
        }
        if let Some(cmd) = &s.reproduction_command {
            lines.push(format!("  Reproduction:   {cmd}"));
        }
        if !s.complexity_history.is_empty() {
            let history: Vec<String> = s
                .complexity_history
                .iter()
                .map(|c| format!("{c:.1}"))
                .collect();
            lines.push(format!("  Complexity:     [{}]", history.join(", ")));
        }
        if !s.files_changed.is_empty() {
            lines.push(format!("  Files changed:  {}", s.files_changed.len()));
        }
        if let Some(reason) = &s.failure_reason {
            lines.push(format!("  Failure:        {reason}"));
        }
        if s.reproduction_required {
            lines.push("  Flag:           reproduction required".to_string());
        }
        if s.loop_detected {
            lines.push("  Flag:           strategy loop detected".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.state).unwrap_or_default()
    }
}

pub async fn execute(args: RunsArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let repo = SqliteRunSnapshotRepository::new(ctx.pool.clone());

    match args.command {
        RunsCommands::Show { run_id } => {
            let id = Uuid::parse_str(&run_id)
                .with_context(|| format!("Invalid run ID: {run_id}"))?;
            let state = repo
                .get_snapshot(id)
                .await?
                .ok_or(DomainError::SnapshotNotFound(id))?;
            output(&RunSnapshotOutput { state }, json_mode);
        }
    }

    Ok(())
}
