//! Adaptive threshold CLI commands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::AppContext;
use crate::adapters::sqlite::SqliteThresholdConfigRepository;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{
    ThresholdAdjustment, ThresholdBounds, ThresholdConfig, ThresholdConfigPatch, ThresholdKind,
};
use crate::domain::ports::ThresholdConfigRepository;

#[derive(Args, Debug)]
pub struct ThresholdsArgs {
    #[command(subcommand)]
    pub command: ThresholdsCommands,
}

#[derive(Subcommand, Debug)]
pub enum ThresholdsCommands {
    /// Show the live threshold configuration
    Show,
    /// Analyze recent telemetry and apply confident adjustments
    Analyze {
        /// Events required before a recommendation carries confidence
        #[arg(long)]
        min_data_points: Option<usize>,
    },
    /// Replace the bounds of one threshold
    Set {
        /// Threshold to update (reproduction, complexity, iteration)
        kind: ThresholdKind,
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
        #[arg(long)]
        current: Option<f64>,
        #[arg(long)]
        learning_rate: Option<f64>,
    },
    /// Turn adaptive tuning on or off
    Enable {
        #[arg(action = clap::ArgAction::Set, default_value = "true")]
        enabled: bool,
    },
    /// Restore the default thresholds
    Reset,
    /// List recorded adjustments, newest first
    History {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
pub struct ThresholdConfigOutput {
    pub config: ThresholdConfig,
}

impl CommandOutput for ThresholdConfigOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["kind", "gate", "current", "min", "max", "learning rate"]);
        for kind in ThresholdKind::ALL {
            let b = self.config.bounds(kind);
            table.add_row(vec![
                kind.to_string(),
                kind.layer().to_string(),
                format!("{:.2}", b.current),
                format!("{:.2}", b.min),
                format!("{:.2}", b.max),
                format!("{:.2}", b.learning_rate),
            ]);
        }
        let state = if self.config.enabled { "enabled" } else { "disabled" };
        format!("Adaptive thresholds: {state}\n\n{table}")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct AdjustmentListOutput {
    pub adjustments: Vec<ThresholdAdjustment>,
    /// Set when the list came from an analysis pass that was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CommandOutput for AdjustmentListOutput {
    fn to_human(&self) -> String {
        if let Some(note) = &self.note {
            return note.clone();
        }
        if self.adjustments.is_empty() {
            return "No threshold adjustments recorded.".to_string();
        }

        let mut table = list_table(&[
            "kind", "old", "recommended", "new", "confidence", "applied", "reasoning",
        ]);
        for adj in &self.adjustments {
            table.add_row(vec![
                adj.kind.to_string(),
                format!("{:.2}", adj.old_value),
                format!("{:.2}", adj.recommended_value),
                format!("{:.2}", adj.new_value),
                format!("{:.2}", adj.confidence),
                if adj.applied { "yes" } else { "no" }.to_string(),
                truncate(&adj.reasoning, 60),
            ]);
        }
        let applied = self.adjustments.iter().filter(|a| a.applied).count();
        format!(
            "{table}\n\n{} adjustment(s), {applied} applied",
            self.adjustments.len()
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Patch replacing the bounds of a single threshold.
fn single_threshold_patch(kind: ThresholdKind, bounds: ThresholdBounds) -> ThresholdConfigPatch {
    let mut patch = ThresholdConfigPatch::default();
    match kind {
        ThresholdKind::Reproduction => patch.phase2_reproduction_threshold = Some(bounds),
        ThresholdKind::Complexity => patch.phase3_complexity_threshold = Some(bounds),
        ThresholdKind::Iteration => patch.phase3_iteration_threshold = Some(bounds),
    }
    patch
}

pub async fn execute(args: ThresholdsArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let controller = ctx.controller().await;

    match args.command {
        ThresholdsCommands::Show => {
            let config = controller.get_config().await;
            output(&ThresholdConfigOutput { config }, json_mode);
        }

        ThresholdsCommands::Analyze { min_data_points } => {
            let min_data_points = min_data_points.unwrap_or(ctx.config.analysis.min_data_points);
            if min_data_points == 0 {
                bail!("--min-data-points must be at least 1");
            }
            let adjustments = controller
                .analyze_and_adjust_thresholds(min_data_points)
                .await;
            let note = (adjustments.is_empty() && !controller.get_config().await.enabled)
                .then(|| "Adaptive thresholds are disabled; no analysis performed.".to_string());
            output(&AdjustmentListOutput { adjustments, note }, json_mode);
        }

        ThresholdsCommands::Set {
            kind,
            min,
            max,
            current,
            learning_rate,
        } => {
            let existing = *controller.get_config().await.bounds(kind);
            let bounds = ThresholdBounds {
                min: min.unwrap_or(existing.min),
                max: max.unwrap_or(existing.max),
                current: current.unwrap_or(existing.current),
                learning_rate: learning_rate.unwrap_or(existing.learning_rate),
            };
            let config = controller
                .update_config(single_threshold_patch(kind, bounds))
                .await?;
            output(&ThresholdConfigOutput { config }, json_mode);
        }

        ThresholdsCommands::Enable { enabled } => {
            let config = controller
                .update_config(ThresholdConfigPatch {
                    enabled: Some(enabled),
                    ..ThresholdConfigPatch::default()
                })
                .await?;
            output(&ThresholdConfigOutput { config }, json_mode);
        }

        ThresholdsCommands::Reset => {
            controller.reset_to_defaults().await;
            let config = controller.get_config().await;
            output(&ThresholdConfigOutput { config }, json_mode);
        }

        ThresholdsCommands::History { limit } => {
            let store = SqliteThresholdConfigRepository::new(ctx.pool.clone());
            let adjustments = store.list_adjustments(limit).await?;
            output(
                &AdjustmentListOutput {
                    adjustments,
                    note: None,
                },
                json_mode,
            );
        }
    }

    Ok(())
}
