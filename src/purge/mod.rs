//! Retention and purge engine.
//!
//! A purge invocation runs a bounded number of passes. Each pass deletes at
//! most one batch per table:
//!
//! 1. States with `last_updated` before the cutoff, with their
//!    `state_changed` events
//! 2. Events created before the cutoff
//! 3. Closed recorder runs that ended at or before the cutoff
//! 4. With `apply_filter`, once the age passes are drained: states of
//!    entities rejected by the filter, then events of rejected types
//!
//! Every batch is its own transaction. When any batch comes back full the
//! invocation reports "not finished" and the recorder worker enqueues it
//! again, so ingestion writes can interleave between invocations.

mod repack;
mod retry;

use chrono::{DateTime, Utc};
pub use repack::repack_database;
pub use retry::{AttemptOutcome, RetryPolicy, run_attempt};

pub use crate::config::MAX_ROWS_TO_PURGE;
use crate::{
    config::PurgeConfig,
    db::{DbResult, EventSelector, PurgeBatch, PurgeRepo, StateSelector},
    filter::{EntitySelection, PurgeFilter},
    observability::metrics,
    recorder::RecorderContext,
};

/// Work bounds of one purge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeLimits {
    /// Rows per table per transaction, at most [`MAX_ROWS_TO_PURGE`].
    pub max_rows_per_batch: u32,
    /// Passes over all tables before yielding.
    pub max_batches_per_run: u32,
}

impl PurgeLimits {
    pub fn from_config(config: &PurgeConfig) -> Self {
        Self {
            max_rows_per_batch: config.max_rows_per_batch,
            max_batches_per_run: config.max_batches_per_run,
        }
    }

    fn rows(&self) -> u32 {
        self.max_rows_per_batch.clamp(1, MAX_ROWS_TO_PURGE)
    }

    fn passes(&self) -> u32 {
        self.max_batches_per_run.max(1)
    }
}

impl Default for PurgeLimits {
    fn default() -> Self {
        Self {
            max_rows_per_batch: MAX_ROWS_TO_PURGE,
            max_batches_per_run: 1,
        }
    }
}

/// Totals of one purge invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    pub states_deleted: u64,
    pub events_deleted: u64,
    pub runs_deleted: u64,
    pub links_detached: u64,
    /// Passes executed.
    pub passes: u32,
    /// No batch of the last pass was full; nothing eligible remains.
    pub finished: bool,
}

impl PurgeOutcome {
    pub fn total(&self) -> u64 {
        self.states_deleted + self.events_deleted + self.runs_deleted
    }

    /// Add a batch and return whether it was full.
    fn absorb(&mut self, batch: &PurgeBatch, ctx: &mut RecorderContext) -> bool {
        self.states_deleted += batch.states_deleted;
        self.events_deleted += batch.events_deleted;
        self.runs_deleted += batch.runs_deleted;
        self.links_detached += batch.links_detached;
        ctx.evict_purged_states(&batch.purged_state_ids);
        batch.full
    }

    fn record_metrics(&self) {
        metrics::record_purge_deletion("states", self.states_deleted);
        metrics::record_purge_deletion("events", self.events_deleted);
        metrics::record_purge_deletion("recorder_runs", self.runs_deleted);
    }
}

/// Purge rows older than `cutoff`.
///
/// Rows stamped exactly at `cutoff` are kept. The current run in `ctx` is
/// never deleted. With `apply_filter`, rows rejected by `filter` are removed
/// regardless of age once no aged rows remain.
pub async fn purge_old_data(
    repo: &dyn PurgeRepo,
    ctx: &mut RecorderContext,
    filter: &dyn PurgeFilter,
    cutoff: DateTime<Utc>,
    apply_filter: bool,
    limits: PurgeLimits,
) -> DbResult<PurgeOutcome> {
    let rows = limits.rows();
    let mut outcome = PurgeOutcome::default();

    tracing::debug!(%cutoff, apply_filter, rows, "Purging old data");

    for _ in 0..limits.passes() {
        outcome.passes += 1;

        let states = repo
            .purge_state_batch(StateSelector::UpdatedBefore(cutoff), rows)
            .await?;
        let mut more = outcome.absorb(&states, ctx);

        let events = repo
            .purge_event_batch(EventSelector::CreatedBefore(cutoff), rows)
            .await?;
        more |= outcome.absorb(&events, ctx);

        let runs = repo.purge_run_batch(cutoff, ctx.run_id(), rows).await?;
        more |= outcome.absorb(&runs, ctx);

        if !more && apply_filter {
            more = purge_filtered_data(repo, ctx, filter, rows, &mut outcome).await?;
        }

        if !more {
            outcome.finished = true;
            break;
        }
        tracing::debug!(pass = outcome.passes, "Purging hasn't fully completed yet");
    }

    outcome.record_metrics();
    Ok(outcome)
}

/// One batch per excluded entity chunk, then one per excluded event-type
/// chunk. Returns whether any batch was full.
async fn purge_filtered_data(
    repo: &dyn PurgeRepo,
    ctx: &mut RecorderContext,
    filter: &dyn PurgeFilter,
    rows: u32,
    outcome: &mut PurgeOutcome,
) -> DbResult<bool> {
    let mut more = false;

    if filter.has_entity_rules() {
        let excluded: Vec<String> = repo
            .distinct_entity_ids()
            .await?
            .into_iter()
            .filter(|entity_id| !filter.include_entity(entity_id))
            .collect();
        if !excluded.is_empty() {
            tracing::debug!(entities = excluded.len(), "Purging filtered entities");
            more |= purge_entity_chunks(repo, ctx, &excluded, rows, outcome).await?;
        }
    }

    let excluded_types: Vec<String> = repo
        .distinct_event_types()
        .await?
        .into_iter()
        .filter(|event_type| !filter.include_event_type(event_type))
        .collect();
    for chunk in excluded_types.chunks(MAX_ROWS_TO_PURGE as usize) {
        tracing::debug!(event_types = ?chunk, "Purging filtered event types");
        let batch = repo
            .purge_event_batch(EventSelector::Types(chunk), rows)
            .await?;
        more |= outcome.absorb(&batch, ctx);
    }

    Ok(more)
}

async fn purge_entity_chunks(
    repo: &dyn PurgeRepo,
    ctx: &mut RecorderContext,
    entity_ids: &[String],
    rows: u32,
    outcome: &mut PurgeOutcome,
) -> DbResult<bool> {
    let mut more = false;
    // The id list and the limit share one statement's bind parameters.
    for chunk in entity_ids.chunks(MAX_ROWS_TO_PURGE as usize) {
        let batch = repo
            .purge_state_batch(StateSelector::Entities(chunk), rows)
            .await?;
        more |= outcome.absorb(&batch, ctx);
    }
    Ok(more)
}

/// Purge every state and `state_changed` event of the selected entities,
/// regardless of age.
///
/// An empty selection matches every entity.
pub async fn purge_entity_data(
    repo: &dyn PurgeRepo,
    ctx: &mut RecorderContext,
    selection: &EntitySelection,
    limits: PurgeLimits,
) -> DbResult<PurgeOutcome> {
    let rows = limits.rows();
    let mut outcome = PurgeOutcome::default();

    for _ in 0..limits.passes() {
        outcome.passes += 1;

        let selected: Vec<String> = repo
            .distinct_entity_ids()
            .await?
            .into_iter()
            .filter(|entity_id| selection.matches(entity_id))
            .collect();
        if selected.is_empty() {
            outcome.finished = true;
            break;
        }

        tracing::debug!(entities = selected.len(), "Purging entity data");
        if !purge_entity_chunks(repo, ctx, &selected, rows, &mut outcome).await? {
            outcome.finished = true;
            break;
        }
    }

    outcome.record_metrics();
    Ok(outcome)
}
