//! CLI command implementations.

pub mod metrics;
pub mod runs;
pub mod thresholds;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::sqlite::{
    initialize_database, SqliteReliabilityEventRepository, SqliteThresholdConfigRepository,
};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::{AdaptiveThresholdController, ReliabilityMetrics};

/// Loaded configuration plus an open, migrated database.
pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
}

/// Load configuration from an explicit file, or from `.fixloop/` plus
/// `FIXLOOP_*` environment overrides.
pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;
        Ok(Self { config, pool })
    }

    pub fn metrics(&self) -> ReliabilityMetrics {
        ReliabilityMetrics::new(Arc::new(SqliteReliabilityEventRepository::new(
            self.pool.clone(),
        )))
        .with_window_days(self.config.analysis.window_days)
    }

    /// Controller seeded from configuration, then from the persisted
    /// learned thresholds when present.
    pub async fn controller(&self) -> AdaptiveThresholdController {
        let controller = AdaptiveThresholdController::new(self.config.adaptive_thresholds.clone())
            .with_metrics(self.metrics())
            .with_store(Arc::new(SqliteThresholdConfigRepository::new(
                self.pool.clone(),
            )));
        controller.load_persisted().await;
        controller
    }
}
