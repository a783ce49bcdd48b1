use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::{
    db::{
        backend::{Backend, ClassifyExt},
        error::{DbError, DbResult},
        repos::RecorderRepo,
    },
    models::{Event, EventOrigin, NewEvent, NewRecorderRun, NewState, Recorded, RecorderRun, State},
};

const STATE_COLUMNS: &str = "state_id, entity_id, domain, state, attributes, event_id, \
    last_changed, last_updated, created, old_state_id";

const RUN_COLUMNS: &str = r#"run_id, start, "end", closed_incorrect, created"#;

pub struct SqliteRecorderRepo {
    pool: SqlitePool,
}

impl SqliteRecorderRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn parse_state(row: &sqlx::sqlite::SqliteRow) -> State {
        State {
            state_id: row.get("state_id"),
            entity_id: row.get("entity_id"),
            domain: row.get("domain"),
            state: row.get("state"),
            attributes: row.get("attributes"),
            event_id: row.get("event_id"),
            last_changed: row.get("last_changed"),
            last_updated: row.get("last_updated"),
            created: row.get("created"),
            old_state_id: row.get("old_state_id"),
        }
    }

    fn parse_run(row: &sqlx::sqlite::SqliteRow) -> RecorderRun {
        RecorderRun {
            run_id: row.get("run_id"),
            start: row.get("start"),
            end: row.get("end"),
            closed_incorrect: row.get("closed_incorrect"),
            created: row.get("created"),
        }
    }

    async fn record_in_tx(
        &self,
        event: NewEvent,
        state: Option<NewState>,
    ) -> Result<Recorded, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let event_id = sqlx::query(
            r#"
            INSERT INTO events (event_type, event_data, origin, time_fired, created)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.event_type)
        .bind(&event.event_data)
        .bind(event.origin.as_str())
        .bind(event.time_fired)
        .bind(event.created)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        let state_id = match state {
            Some(state) => Some(insert_state(&mut *tx, &state, event_id).await?),
            None => None,
        };

        tx.commit().await?;
        Ok(Recorded { event_id, state_id })
    }
}

async fn insert_state(
    conn: &mut SqliteConnection,
    state: &NewState,
    event_id: i64,
) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO states (
            entity_id, domain, state, attributes, event_id,
            last_changed, last_updated, created, old_state_id
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&state.entity_id)
    .bind(&state.domain)
    .bind(&state.state)
    .bind(&state.attributes)
    .bind(event_id)
    .bind(state.last_changed)
    .bind(state.last_updated)
    .bind(state.created)
    .bind(state.old_state_id)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

#[async_trait]
impl RecorderRepo for SqliteRecorderRepo {
    async fn record(&self, event: NewEvent, state: Option<NewState>) -> DbResult<Recorded> {
        self.record_in_tx(event, state)
            .await
            .classify(Backend::Sqlite)
    }

    async fn start_run(&self, start: DateTime<Utc>) -> DbResult<RecorderRun> {
        self.insert_run(NewRecorderRun {
            start,
            end: None,
            closed_incorrect: false,
            created: start,
        })
        .await
    }

    async fn end_run(&self, run_id: i64, end: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(r#"UPDATE recorder_runs SET "end" = ? WHERE run_id = ?"#)
            .bind(end)
            .bind(run_id)
            .execute(&self.pool)
            .await
            .classify(Backend::Sqlite)?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn close_open_runs(&self, end: DateTime<Utc>) -> DbResult<u64> {
        let result = sqlx::query(
            r#"UPDATE recorder_runs SET "end" = ?, closed_incorrect = 1 WHERE "end" IS NULL"#,
        )
        .bind(end)
        .execute(&self.pool)
        .await
        .classify(Backend::Sqlite)?;
        Ok(result.rows_affected())
    }

    async fn insert_run(&self, run: NewRecorderRun) -> DbResult<RecorderRun> {
        let run_id = sqlx::query(
            r#"
            INSERT INTO recorder_runs (start, "end", closed_incorrect, created)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(run.start)
        .bind(run.end)
        .bind(run.closed_incorrect)
        .bind(run.created)
        .execute(&self.pool)
        .await
        .classify(Backend::Sqlite)?
        .last_insert_rowid();

        Ok(RecorderRun {
            run_id,
            start: run.start,
            end: run.end,
            closed_incorrect: run.closed_incorrect,
            created: run.created,
        })
    }

    async fn list_runs(&self) -> DbResult<Vec<RecorderRun>> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM recorder_runs ORDER BY start, run_id"
        ))
        .fetch_all(&self.pool)
        .await
        .classify(Backend::Sqlite)?;

        Ok(rows.iter().map(Self::parse_run).collect())
    }

    async fn get_state(&self, state_id: i64) -> DbResult<Option<State>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM states WHERE state_id = ?"
        ))
        .bind(state_id)
        .fetch_optional(&self.pool)
        .await
        .classify(Backend::Sqlite)?;

        Ok(row.as_ref().map(Self::parse_state))
    }

    async fn list_states(&self, entity_id: Option<&str>) -> DbResult<Vec<State>> {
        let rows = match entity_id {
            Some(entity_id) => {
                sqlx::query(&format!(
                    "SELECT {STATE_COLUMNS} FROM states WHERE entity_id = ? ORDER BY state_id"
                ))
                .bind(entity_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {STATE_COLUMNS} FROM states ORDER BY state_id"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .classify(Backend::Sqlite)?;

        Ok(rows.iter().map(Self::parse_state).collect())
    }

    async fn list_events(&self, event_type: Option<&str>) -> DbResult<Vec<Event>> {
        let sql = "SELECT event_id, event_type, event_data, origin, time_fired, created FROM events";
        let rows = match event_type {
            Some(event_type) => {
                sqlx::query(&format!("{sql} WHERE event_type = ? ORDER BY event_id"))
                    .bind(event_type)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query(&format!("{sql} ORDER BY event_id"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .classify(Backend::Sqlite)?;

        Ok(rows
            .iter()
            .map(|row| Event {
                event_id: row.get("event_id"),
                event_type: row.get("event_type"),
                event_data: row.get("event_data"),
                origin: EventOrigin::parse(row.get("origin")),
                time_fired: row.get("time_fired"),
                created: row.get("created"),
            })
            .collect())
    }

    async fn count_states(&self) -> DbResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM states")
            .fetch_one(&self.pool)
            .await
            .classify(Backend::Sqlite)
    }

    async fn count_events(&self, event_type: Option<&str>) -> DbResult<i64> {
        match event_type {
            Some(event_type) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE event_type = ?")
                    .bind(event_type)
                    .fetch_one(&self.pool)
                    .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM events")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .classify(Backend::Sqlite)
    }

    async fn count_runs(&self) -> DbResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM recorder_runs")
            .fetch_one(&self.pool)
            .await
            .classify(Backend::Sqlite)
    }

    async fn count_dangling_old_state_ids(&self) -> DbResult<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM states s
            WHERE s.old_state_id IS NOT NULL
              AND NOT EXISTS (SELECT 1 FROM states p WHERE p.state_id = s.old_state_id)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .classify(Backend::Sqlite)
    }
}
