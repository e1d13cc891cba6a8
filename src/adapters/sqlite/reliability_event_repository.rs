//! SQLite implementation of the ReliabilityEventRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ReliabilityEvent, ReliabilityLayer};
use crate::domain::ports::ReliabilityEventRepository;

const SELECT_COLUMNS: &str = "SELECT id, layer, triggered, threshold, context, recovery_attempted, \
     recovery_success, recovery_strategy, created_at FROM reliability_events";

#[derive(Clone)]
pub struct SqliteReliabilityEventRepository {
    pool: SqlitePool,
}

impl SqliteReliabilityEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReliabilityEventRepository for SqliteReliabilityEventRepository {
    async fn insert(&self, event: &ReliabilityEvent) -> DomainResult<()> {
        let context_json = serde_json::to_string(&event.context)?;

        sqlx::query(
            r#"INSERT INTO reliability_events
                   (id, layer, triggered, threshold, context, recovery_attempted,
                    recovery_success, recovery_strategy, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.to_string())
        .bind(event.layer.as_str())
        .bind(event.triggered)
        .bind(event.threshold)
        .bind(&context_json)
        .bind(event.recovery_attempted)
        .bind(event.recovery_success)
        .bind(&event.recovery_strategy)
        .bind(format_datetime(&event.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_recovery_outcome(
        &self,
        id: Uuid,
        success: bool,
        strategy: Option<&str>,
    ) -> DomainResult<bool> {
        // The outcome is written at most once.
        let result = sqlx::query(
            r#"UPDATE reliability_events
               SET recovery_attempted = 1, recovery_success = ?, recovery_strategy = ?
               WHERE id = ? AND recovery_success IS NULL"#,
        )
        .bind(success)
        .bind(strategy)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<(String,)> =
            sqlx::query_as("SELECT id FROM reliability_events WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(DomainError::EventNotFound(id)),
        }
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<ReliabilityEvent>> {
        let row: Option<ReliabilityEventRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(ReliabilityEvent::try_from).transpose()
    }

    async fn list_by_layer(
        &self,
        layer: ReliabilityLayer,
        since: Option<DateTime<Utc>>,
    ) -> DomainResult<Vec<ReliabilityEvent>> {
        let rows: Vec<ReliabilityEventRow> = match since {
            Some(since) => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE layer = ? AND created_at >= ? \
                     ORDER BY created_at ASC, rowid ASC"
                ))
                .bind(layer.as_str())
                .bind(format_datetime(&since))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "{SELECT_COLUMNS} WHERE layer = ? ORDER BY created_at ASC, rowid ASC"
                ))
                .bind(layer.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(ReliabilityEvent::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ReliabilityEventRow {
    id: String,
    layer: String,
    triggered: bool,
    threshold: f64,
    context: String,
    recovery_attempted: bool,
    recovery_success: Option<bool>,
    recovery_strategy: Option<String>,
    created_at: String,
}

impl TryFrom<ReliabilityEventRow> for ReliabilityEvent {
    type Error = DomainError;

    fn try_from(row: ReliabilityEventRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            layer: row
                .layer
                .parse()
                .map_err(|_| {
                    DomainError::SerializationError(format!("Invalid layer: {}", row.layer))
                })?,
            triggered: row.triggered,
            threshold: row.threshold,
            context: serde_json::from_str(&row.context)?,
            recovery_attempted: row.recovery_attempted,
            recovery_success: row.recovery_success,
            recovery_strategy: row.recovery_strategy,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use serde_json::json;

    async fn setup_repo() -> SqliteReliabilityEventRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteReliabilityEventRepository::new(pool)
    }

    fn event_at(layer: ReliabilityLayer, triggered: bool, minutes_ago: i64) -> ReliabilityEvent {
        let mut event = ReliabilityEvent::new(layer, triggered, 1.0, json!({"iteration": 0}));
        event.created_at = Utc::now() - chrono::Duration::minutes(minutes_ago);
        event
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = setup_repo().await;
        let event = ReliabilityEvent::new(
            ReliabilityLayer::ReproductionCheck,
            true,
            1.0,
            json!({"category": "build", "affectedFiles": ["src/lib.rs"]}),
        );
        repo.insert(&event).await.unwrap();

        let loaded = repo.get(event.id).await.unwrap().unwrap();
        assert_eq!(loaded.layer, ReliabilityLayer::ReproductionCheck);
        assert!(loaded.triggered);
        assert_eq!(loaded.context["category"], "build");
        assert!(!loaded.recovery_attempted);
        assert_eq!(loaded.recovery_success, None);
    }

    #[tokio::test]
    async fn test_get_unknown_returns_none() {
        let repo = setup_repo().await;
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recovery_outcome_is_recorded_once() {
        let repo = setup_repo().await;
        let event = event_at(ReliabilityLayer::LoopDetection, true, 0);
        repo.insert(&event).await.unwrap();

        assert!(repo
            .record_recovery_outcome(event.id, true, Some("strategy-reset"))
            .await
            .unwrap());
        assert!(!repo
            .record_recovery_outcome(event.id, false, Some("other"))
            .await
            .unwrap());

        let loaded = repo.get(event.id).await.unwrap().unwrap();
        assert!(loaded.recovery_attempted);
        assert_eq!(loaded.recovery_success, Some(true));
        assert_eq!(loaded.recovery_strategy.as_deref(), Some("strategy-reset"));
    }

    #[tokio::test]
    async fn test_recovery_outcome_for_unknown_event() {
        let repo = setup_repo().await;
        let err = repo
            .record_recovery_outcome(Uuid::new_v4(), true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::EventNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_by_layer_filters_and_orders() {
        let repo = setup_repo().await;
        let old = event_at(ReliabilityLayer::ReproductionCheck, false, 120);
        let recent = event_at(ReliabilityLayer::ReproductionCheck, true, 5);
        let other = event_at(ReliabilityLayer::LoopDetection, true, 5);
        for e in [&recent, &old, &other] {
            repo.insert(e).await.unwrap();
        }

        let all = repo
            .list_by_layer(ReliabilityLayer::ReproductionCheck, None)
            .await
            .unwrap();
        assert_eq!(all.iter().map(|e| e.id).collect::<Vec<_>>(), vec![old.id, recent.id]);

        let since = Utc::now() - chrono::Duration::minutes(60);
        let windowed = repo
            .list_by_layer(ReliabilityLayer::ReproductionCheck, Some(since))
            .await
            .unwrap();
        assert_eq!(windowed.len(), 1);
        assert_eq!(windowed[0].id, recent.id);
    }
}
