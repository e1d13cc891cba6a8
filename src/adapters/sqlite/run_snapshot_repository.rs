//! SQLite write-through store for run state snapshots.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::format_datetime;
use crate::domain::errors::DomainResult;
use crate::domain::models::RunState;
use crate::domain::ports::RunSnapshotRepository;

/// One row per run, holding the full state as JSON plus a few indexed
/// columns for inspection.
#[derive(Clone)]
pub struct SqliteRunSnapshotRepository {
    pool: SqlitePool,
}

impl SqliteRunSnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunSnapshotRepository for SqliteRunSnapshotRepository {
    async fn save_snapshot(&self, state: &RunState) -> DomainResult<()> {
        let state_json = serde_json::to_string(state)?;

        sqlx::query(
            r#"INSERT INTO run_snapshots
                   (run_id, current_step, status, iteration, state, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(run_id) DO UPDATE SET
                   current_step = excluded.current_step,
                   status = excluded.status,
                   iteration = excluded.iteration,
                   state = excluded.state,
                   updated_at = excluded.updated_at"#,
        )
        .bind(state.run_id.to_string())
        .bind(state.current_step.as_str())
        .bind(state.status.as_str())
        .bind(i64::from(state.iteration))
        .bind(&state_json)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_snapshot(&self, run_id: Uuid) -> DomainResult<Option<RunState>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT state FROM run_snapshots WHERE run_id = ?")
                .bind(run_id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(json,)| serde_json::from_str(&json)).transpose()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{RunStatus, StepId};

    #[tokio::test]
    async fn test_snapshot_upsert_keeps_latest() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteRunSnapshotRepository::new(pool);

        let mut state = RunState::new(5);
        repo.save_snapshot(&state).await.unwrap();

        state.current_step = StepId::Verification;
        state.iteration = 2;
        state.complexity_history = vec![9.0, 8.5];
        state.files_changed.insert("src/main.rs".to_string());
        state.status = RunStatus::Success;
        repo.save_snapshot(&state).await.unwrap();

        let loaded = repo.get_snapshot(state.run_id).await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_missing_snapshot() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteRunSnapshotRepository::new(pool);
        assert!(repo.get_snapshot(Uuid::new_v4()).await.unwrap().is_none());
    }
}
