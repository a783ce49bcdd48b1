use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::error::DbResult;

/// Which state rows a state batch targets.
#[derive(Debug, Clone, Copy)]
pub enum StateSelector<'a> {
    /// Rows with `last_updated` strictly before the cutoff.
    UpdatedBefore(DateTime<Utc>),
    /// Every row of the given entities, regardless of age.
    Entities(&'a [String]),
}

/// Which event rows an event batch targets.
#[derive(Debug, Clone, Copy)]
pub enum EventSelector<'a> {
    /// Rows with `created` strictly before the cutoff. States still pointing
    /// at them keep their row and lose the link.
    CreatedBefore(DateTime<Utc>),
    /// Every row of the given event types. States linked to them are deleted
    /// with them.
    Types(&'a [String]),
}

/// Result of one bounded deletion transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeBatch {
    pub states_deleted: u64,
    pub events_deleted: u64,
    pub runs_deleted: u64,
    /// `old_state_id` and `event_id` links nulled before the deletion.
    pub links_detached: u64,
    /// Ids of every state row removed, for evicting cached references.
    pub purged_state_ids: Vec<i64>,
    /// The batch hit its row cap, so more candidates may remain.
    pub full: bool,
}

impl PurgeBatch {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.states_deleted == 0 && self.events_deleted == 0 && self.runs_deleted == 0
    }
}

/// Bounded deletions used by the purge engine.
///
/// Every method runs in its own transaction: a batch either commits as a
/// whole or rolls back as a whole. `limit` caps the number of primary rows
/// selected and must stay below the backend's bind-parameter limit.
#[async_trait]
pub trait PurgeRepo: Send + Sync {
    /// Delete up to `limit` state rows together with their `state_changed`
    /// events, nulling any `old_state_id` that pointed at them first.
    async fn purge_state_batch(
        &self,
        selector: StateSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch>;

    /// Delete up to `limit` event rows, resolving state rows that reference
    /// them according to the selector.
    async fn purge_event_batch(
        &self,
        selector: EventSelector<'_>,
        limit: u32,
    ) -> DbResult<PurgeBatch>;

    /// Delete up to `limit` closed recorder runs whose `end` is at or before
    /// the cutoff. The current run and runs with no end are never touched.
    async fn purge_run_batch(
        &self,
        cutoff: DateTime<Utc>,
        current_run_id: i64,
        limit: u32,
    ) -> DbResult<PurgeBatch>;

    /// Distinct entity ids that still have state rows.
    async fn distinct_entity_ids(&self) -> DbResult<Vec<String>>;

    /// Distinct event types that still have event rows.
    async fn distinct_event_types(&self) -> DbResult<Vec<String>>;

    /// Reclaim free pages after a large deletion.
    async fn repack(&self) -> DbResult<()>;
}
