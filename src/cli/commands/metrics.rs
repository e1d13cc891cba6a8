//! Reliability metrics CLI command.

use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use clap::Args;
use serde::Serialize;

use super::AppContext;
use crate::cli::output::{output, percent, CommandOutput};
use crate::domain::models::{LayerMetrics, ReliabilityLayer};

#[derive(Args, Debug)]
pub struct MetricsArgs {
    /// Gate to report on (reproduction, loop-detection); all gates when omitted
    pub layer: Option<ReliabilityLayer>,

    /// Trailing window in days; defaults to the configured analysis window
    #[arg(long)]
    pub since_days: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LayerReport {
    pub layer: ReliabilityLayer,
    pub metrics: Option<LayerMetrics>,
}

#[derive(Debug, Serialize)]
pub struct MetricsOutput {
    pub window_days: i64,
    pub layers: Vec<LayerReport>,
}

impl CommandOutput for MetricsOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Reliability metrics (last {} days):", self.window_days)];
        for report in &self.layers {
            lines.push(String::new());
            lines.push(format!("{}:", report.layer));
            match &report.metrics {
                None => lines.push("  No events recorded.".to_string()),
                Some(m) => {
                    lines.push(format!("  Events:            {}", m.total_events));
                    lines.push(format!(
                        "  Triggered:         {} ({})",
                        m.triggered_events,
                        percent(m.trigger_rate)
                    ));
                    lines.push(format!(
                        "  Recoveries:        {}/{} ({})",
                        m.recovery_successes,
                        m.recovery_attempts,
                        percent(m.recovery_success_rate)
                    ));
                    lines.push(format!("  Average threshold: {:.2}", m.average_threshold));
                }
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: MetricsArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let window_days = args.since_days.unwrap_or(ctx.config.analysis.window_days);
    if window_days <= 0 {
        bail!("--since-days must be positive");
    }
    let since = Utc::now() - Duration::days(window_days);
    let metrics = ctx.metrics();

    let layers: Vec<ReliabilityLayer> = match args.layer {
        Some(layer) => vec![layer],
        None => ReliabilityLayer::ALL.to_vec(),
    };

    let mut reports = Vec::with_capacity(layers.len());
    for layer in layers {
        reports.push(LayerReport {
            layer,
            metrics: metrics.get_layer_metrics(layer, Some(since)).await?,
        });
    }

    output(
        &MetricsOutput {
            window_days,
            layers: reports,
        },
        json_mode,
    );
    Ok(())
}
