use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use crate::{
    db::{
        backend::{Backend, ClassifyExt},
        error::DbResult,
        repos::{EventSelector, PurgeBatch, PurgeRepo, StateSelector},
    },
    models::EVENT_STATE_CHANGED,
};

pub struct PostgresPurgeRepo {
    write_pool: PgPool,
}

impl PostgresPurgeRepo {
    /// Candidate selection and deletion both go through the primary pool.
    pub fn new(write_pool: PgPool) -> Self {
        Self { write_pool }
    }

    async fn state_batch(
        &self,
        selector: StateSelector<'_>,
        limit: u32,
    ) -> Result<PurgeBatch, sqlx::Error> {
        let mut tx = self.write_pool.begin().await?;

        let rows = match selector {
            StateSelector::UpdatedBefore(cutoff) => {
                sqlx::query(
                    r#"
                    SELECT state_id, event_id FROM states
                    WHERE last_updated < $1
                    LIMIT $2
                    FOR UPDATE
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
                sqlx::query(
                    r#"
                    SELECT state_id, event_id FROM states
                    WHERE entity_id = ANY($1)
                    LIMIT $2
                    FOR UPDATE
                    "#,
                )
                .bind(entity_ids)
                .bind(i64::from(limit))
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let selected = rows.len();
        let state_ids: Vec<i64> = rows.iter().map(|row| row.get("state_id")).collect();
        let event_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| row.get::<Option<i64>, _>("event_id"))
            .collect();

        let mut batch = delete_states(&mut *tx, state_ids).await?;
        if !event_ids.is_empty() {
            // Only state_changed events go with their state. Others stay linked.
            let event_ids: Vec<i64> = sqlx::query_scalar(
                "SELECT event_id FROM events WHERE event_type = $1 AND event_id = ANY($2)",
            )
            .bind(EVENT_STATE_CHANGED)
            .bind(&event_ids)
            .fetch_all(&mut *tx)
            .await?;
            // Another state may share one of these events; keep it and drop the link.
            batch.links_detached +=
                sqlx::query("UPDATE states SET event_id = NULL WHERE event_id = ANY($1)")
                    .bind(&event_ids)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            batch.events_deleted = sqlx::query("DELETE FROM events WHERE event_id = ANY($1)")
                .bind(&event_ids)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        batch.full = selected >= limit as usize;

        tx.commit().await?;
        Ok(batch)
    }

    async fn event_batch(
        &self,
        selector: EventSelector<'_>,
        limit: u32,
    ) -> Result<PurgeBatch, sqlx::Error> {
        let mut tx = self.write_pool.begin().await?;

        let event_ids: Vec<i64> = match selector {
            EventSelector::CreatedBefore(cutoff) => {
                sqlx::query_scalar(
                    r#"
                    SELECT event_id FROM events
                    WHERE created < $1
                    LIMIT $2
                    FOR UPDATE
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
                sqlx::query_scalar(
                    r#"
                    SELECT event_id FROM events
                    WHERE event_type = ANY($1)
                    LIMIT $2
                    FOR UPDATE
                    "#,
                )
                .bind(event_types)
                .bind(i64::from(limit))
                .fetch_all(&mut *tx)
                .await?
            }
        };

        let mut batch = PurgeBatch::default();
        if event_ids.is_empty() {
            return Ok(batch);
        }

        if let EventSelector::Types(_) = selector {
            let state_ids: Vec<i64> =
                sqlx::query_scalar("SELECT state_id FROM states WHERE event_id = ANY($1)")
                    .bind(&event_ids)
                    .fetch_all(&mut *tx)
                    .await?;
            batch = delete_states(&mut *tx, state_ids).await?;
        }

        batch.links_detached +=
            sqlx::query("UPDATE states SET event_id = NULL WHERE event_id = ANY($1)")
                .bind(&event_ids)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        batch.events_deleted = sqlx::query("DELETE FROM events WHERE event_id = ANY($1)")
            .bind(&event_ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        batch.full = event_ids.len() >= limit as usize;

        tx.commit().await?;
        Ok(batch)
    }
}

/// Null every `old_state_id` pointing into `state_ids`, then delete them.
async fn delete_states(
    conn: &mut PgConnection,
    state_ids: Vec<i64>,
) -> Result<PurgeBatch, sqlx::Error> {
    let mut batch = PurgeBatch::default();
    if state_ids.is_empty() {
        return Ok(batch);
    }

    batch.links_detached =
        sqlx::query("UPDATE states SET old_state_id = NULL WHERE old_state_id = ANY($1)")
            .bind(&state_ids)
            .execute(&mut *conn)
            .await?
            .rows_affected();
    batch.states_deleted = sqlx::query("DELETE FROM states WHERE state_id = ANY($1)")
        .bind(&state_ids)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    batch.purged_state_ids = state_ids;
    Ok(batch)
}

#[async_trait]
impl PurgeRepo for PostgresPurgeRepo {
    async fn purge_state_batch(
        &self,
        selector: StateSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        self.state_batch(selector, limit)
            .await
            .classify(Backend::Postgres)
    }

    async fn purge_event_batch(
        &self,
        selector: EventSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        self.event_batch(selector, limit)
            .await
            .classify(Backend::Postgres)
    }

    async fn purge_run_batch(
        &self,
        cutoff: DateTime<Utc>,
        current_run_id: i64,
        limit: u32,
    ) -> DbResult<PurgeBatch> {
        // PostgreSQL efficient batched deletion using ctid
        let result = sqlx::query(
            r#"
            DELETE FROM recorder_runs
            WHERE ctid IN (
                SELECT ctid FROM recorder_runs
                WHERE "end" IS NOT NULL AND "end" <= $1 AND run_id != $2
                LIMIT $3
            )
            "#,
        )
        .bind(cutoff)
        .bind(current_run_id)
        .bind(i64::from(limit))
        .execute(&self.write_pool)
        .await
        .classify(Backend::Postgres)?;

        let runs_deleted = result.rows_affected();
        Ok(PurgeBatch {
            runs_deleted,
            full: runs_deleted >= u64::from(limit),
            ..Default::default()
        })
    }

    async fn distinct_entity_ids(&self) -> DbResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT entity_id FROM states")
            .fetch_all(&self.write_pool)
            .await
            .classify(Backend::Postgres)
    }

    async fn distinct_event_types(&self) -> DbResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT event_type FROM events")
            .fetch_all(&self.write_pool)
            .await
            .classify(Backend::Postgres)
    }

    async fn repack(&self) -> DbResult<()> {
        // VACUUM refuses to run inside a transaction block, so it goes over
        // the simple query protocol.
        sqlx::raw_sql("VACUUM ANALYZE")
            .execute(&self.write_pool)
            .await
            .classify(Backend::Postgres)?;
        Ok(())
    }
}
