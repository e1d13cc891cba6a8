//! SQLite implementation of the ThresholdConfigRepository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ThresholdAdjustment, ThresholdConfig};
use crate::domain::ports::ThresholdConfigRepository;

/// The live configuration is a single JSON row; adjustments are an
/// append-only audit log.
#[derive(Clone)]
pub struct SqliteThresholdConfigRepository {
    pool: SqlitePool,
}

impl SqliteThresholdConfigRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThresholdConfigRepository for SqliteThresholdConfigRepository {
    async fn load(&self) -> DomainResult<Option<ThresholdConfig>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT config FROM threshold_config WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(json,)| serde_json::from_str(&json).map_err(DomainError::from))
            .transpose()
    }

    async fn save(&self, config: &ThresholdConfig) -> DomainResult<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            r#"INSERT INTO threshold_config (id, config, updated_at) VALUES (1, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   config = excluded.config,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&json)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_adjustment(&self, adjustment: &ThresholdAdjustment) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO threshold_adjustments
                   (id, layer, kind, old_value, new_value, recommended_value,
                    confidence, reasoning, applied, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(adjustment.id.to_string())
        .bind(adjustment.layer.as_str())
        .bind(adjustment.kind.as_str())
        .bind(adjustment.old_value)
        .bind(adjustment.new_value)
        .bind(adjustment.recommended_value)
        .bind(adjustment.confidence)
        .bind(&adjustment.reasoning)
        .bind(adjustment.applied)
        .bind(format_datetime(&adjustment.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_adjustments(&self, limit: usize) -> DomainResult<Vec<ThresholdAdjustment>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<AdjustmentRow> = sqlx::query_as(
            r#"SELECT id, layer, kind, old_value, new_value, recommended_value,
                      confidence, reasoning, applied, created_at
               FROM threshold_adjustments ORDER BY created_at DESC, rowid DESC LIMIT ?"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ThresholdAdjustment::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct AdjustmentRow {
    id: String,
    layer: String,
    kind: String,
    old_value: f64,
    new_value: f64,
    recommended_value: f64,
    confidence: f64,
    reasoning: String,
    applied: bool,
    created_at: String,
}

impl TryFrom<AdjustmentRow> for ThresholdAdjustment {
    type Error = DomainError;

    fn try_from(row: AdjustmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            layer: row
                .layer
                .parse()
                .map_err(|_| {
                    DomainError::SerializationError(format!("Invalid layer: {}", row.layer))
                })?,
            kind: row
                .kind
                .parse()
                .map_err(|_| {
                    DomainError::SerializationError(format!(
                        "Invalid threshold kind: {}",
                        row.kind
                    ))
                })?,
            old_value: row.old_value,
            new_value: row.new_value,
            recommended_value: row.recommended_value,
            confidence: row.confidence,
            reasoning: row.reasoning,
            applied: row.applied,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
