use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::common::{execute_for_ids, placeholders, select_ids_for_ids};
use crate::{
    db::{
        backend::{Backend, ClassifyExt},
        error::DbResult,
        repos::{EventSelector, PurgeBatch, PurgeRepo, StateSelector},
    },
    models::EVENT_STATE_CHANGED,
};

pub struct SqlitePurgeRepo {
    pool: SqlitePool,
}

impl SqlitePurgeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn state_batch(
        &self,
        selector: StateSelector<'_>,
        limit: u32,
    ) -> Result<PurgeBatch, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let rows = match selector {
            StateSelector::UpdatedBefore(cutoff) => {
                sqlx::query(
                    r#"
                    SELECT state_id, event_id FROM states
                    WHERE last_updated < ?
                    LIMIT ?
                    "#,
                )
                .bind(cutoff)
                .bind(i64::from(limit))
                .fetch_all(&mut *tx)
                .await?
            }
            StateSelector::Entities(entity_ids) => {
                if entity_ids.is_empty() {
                    return Ok(PurgeBatch::default());
                }
                let sql = format!(
                    "SELECT state_id, event_id FROM states WHERE entity_id IN ({}) LIMIT ?",
                    placeholders(entity_ids.len())
                );
                let mut query = sqlx::query(&sql);
                for entity_id in entity_ids {
                    query = query.bind(entity_id);
                }
                query.bind(i64::from(limit)).fetch_all(&mut *tx).await?
            }
        };

        let selected = rows.len();
        let state_ids: Vec<i64> = rows.iter().map(|row| row.get("state_id")).collect();
        let event_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get::<Option<i64>, _>("event_id"))
            .collect();

        let mut batch = delete_states(&mut *tx, state_ids).await?;
        // Only state_changed events go with their state. Others stay linked.
        let event_ids = select_ids_for_ids(
            &mut *tx,
            &format!("SELECT event_id FROM events WHERE event_type = '{EVENT_STATE_CHANGED}' AND event_id IN"),
            &event_ids,
        )
        .await?;
        // Another state may share one of these events; keep it and drop the link.
        batch.links_detached += execute_for_ids(
            &mut *tx,
            "UPDATE states SET event_id = NULL WHERE event_id IN",
            &event_ids,
        )
        .await?;
        batch.events_deleted =
            execute_for_ids(&mut *tx, "DELETE FROM events WHERE event_id IN", &event_ids).await?;
        batch.full = selected >= limit as usize;

        tx.commit().await?;
        Ok(batch)
    }

    async fn event_batch(
        &self,
        selector: EventSelector<'_>,
        limit: u32,
    ) -> Result<PurgeBatch, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let event_ids: Vec<i64> = match selector {
            EventSelector::CreatedBefore(cutoff) => {
                sqlx::query_scalar(
                    r#"
                    SELECT event_id FROM events
                    WHERE created < ?
                    LIMIT ?
                    "#,
                )
                .bind(cutoff)
                .bind(i64::from(limit))
                .fetch_all(&mut *tx)
                .await?
            }
            EventSelector::Types(event_types) => {
                if event_types.is_empty() {
                    return Ok(PurgeBatch::default());
                }
                let sql = format!(
                    "SELECT event_id FROM events WHERE event_type IN ({}) LIMIT ?",
                    placeholders(event_types.len())
                );
                let mut query = sqlx::query_scalar(&sql);
                for event_type in event_types {
                    query = query.bind(event_type);
                }
                query.bind(i64::from(limit)).fetch_all(&mut *tx).await?
            }
        };

        let mut batch = PurgeBatch::default();
        if event_ids.is_empty() {
            return Ok(batch);
        }

        if let EventSelector::Types(_) = selector {
            let state_ids = select_ids_for_ids(
                &mut *tx,
                "SELECT state_id FROM states WHERE event_id IN",
                &event_ids,
            )
            .await?;
            batch = delete_states(&mut *tx, state_ids).await?;
        }

        batch.links_detached += execute_for_ids(
            &mut *tx,
            "UPDATE states SET event_id = NULL WHERE event_id IN",
            &event_ids,
        )
        .await?;
        batch.events_deleted =
            execute_for_ids(&mut *tx, "DELETE FROM events WHERE event_id IN", &event_ids).await?;
        batch.full = event_ids.len() >= limit as usize;

        tx.commit().await?;
        Ok(batch)
    }
}

/// Null every `old_state_id` pointing into `state_ids`, then delete them.
async fn delete_states(
    conn: &mut SqliteConnection,
    state_ids: Vec<i64>,
) -> Result<PurgeBatch, sqlx::Error> {
    let mut batch = PurgeBatch::default();
    if state_ids.is_empty() {
        return Ok(batch);
    }

    batch.links_detached = execute_for_ids(
        conn,
        "UPDATE states SET old_state_id = NULL WHERE old_state_id IN",
        &state_ids,
    )
    .await?;
    batch.states_deleted =
        execute_for_ids(conn, "DELETE FROM states WHERE state_id IN", &state_ids).await?;
    batch.purged_state_ids = state_ids;
    Ok(batch)
}

#[async_trait]
impl PurgeRepo for SqlitePurgeRepo {
    async fn purge_state_batch(
        &self,
        selector: StateSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        self.state_batch(selector, limit)
            .await
            .classify(Backend::Sqlite)
    }

    async fn purge_event_batch(
        &self,
        selector: EventSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        self.event_batch(selector, limit)
            .await
            .classify(Backend::Sqlite)
    }

    async fn purge_run_batch(
        &self,
        cutoff: DateTime<Utc>,
        current_run_id: i64,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        // SQLite doesn't support LIMIT in DELETE directly
        let result = sqlx::query(
            r#"
            DELETE FROM recorder_runs
            WHERE run_id IN (
                SELECT run_id FROM recorder_runs
                WHERE "end" IS NOT NULL AND "end" <= ? AND run_id != ?
                LIMIT ?
            )
            "#,
        )
        .bind(cutoff)
        .bind(current_run_id)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await
        .classify(Backend::Sqlite)?;

        let runs_deleted = result.rows_affected();
        Ok(PurgeBatch {
            runs_deleted,
            full: runs_deleted >= u64::from(limit),
            ..Default::default()
        })
    }

    async fn distinct_entity_ids(&self) -> DbResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT entity_id FROM states")
            .fetch_all(&self.pool)
            .await
            .classify(Backend::Sqlite)
    }

    async fn distinct_event_types(&self) -> DbResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT event_type FROM events")
            .fetch_all(&self.pool)
            .await
            .classify(Backend::Sqlite)
    }

    async fn repack(&self) -> DbResult<()> {
        sqlx::raw_sql("VACUUM")
            .execute(&self.pool)
            .await
            .classify(Backend::Sqlite)?;
        Ok(())
    }
}
