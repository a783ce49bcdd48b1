use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{Event, NewEvent, NewRecorderRun, NewState, Recorded, RecorderRun, State},
};

/// Write and inspection surface used by the ingestion path.
#[async_trait]
pub trait RecorderRepo: Send + Sync {
    /// Insert an event and, when given, the state it carries, in one
    /// transaction. The state row is linked to the new event.
    async fn record(&self, event: NewEvent, state: Option<NewState>) -> DbResult<Recorded>;

    /// Open a new run starting at `start`.
    async fn start_run(&self, start: DateTime<Utc>) -> DbResult<RecorderRun>;

    /// Close a run cleanly.
    async fn end_run(&self, run_id: i64, end: DateTime<Utc>) -> DbResult<()>;

    /// Close every run still open, marking it `closed_incorrect`.
    ///
    /// Called at startup: an open run at that point belongs to a process that
    /// did not shut down cleanly.
    async fn close_open_runs(&self, end: DateTime<Utc>) -> DbResult<u64>;

    /// Insert a run row verbatim.
    async fn insert_run(&self, run: NewRecorderRun) -> DbResult<RecorderRun>;

    /// All runs ordered by start.
    async fn list_runs(&self) -> DbResult<Vec<RecorderRun>>;

    async fn get_state(&self, state_id: i64) -> DbResult<Option<State>>;

    /// States ordered by id, optionally for one entity.
    async fn list_states(&self, entity_id: Option<&str>) -> DbResult<Vec<State>>;

    /// Events ordered by id, optionally of one type.
    async fn list_events(&self, event_type: Option<&str>) -> DbResult<Vec<Event>>;

    async fn count_states(&self) -> DbResult<i64>;

    /// Event count, optionally of one type.
    async fn count_events(&self, event_type: Option<&str>) -> DbResult<i64>;

    async fn count_runs(&self) -> DbResult<i64>;

    /// States whose `old_state_id` points at a row that no longer exists.
    async fn count_dangling_old_state_ids(&self) -> DbResult<i64>;
}
