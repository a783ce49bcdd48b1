//! Shared tests for PurgeRepo implementations
//!
//! Tests are written as async functions that take a test context containing
//! the purge repo and a recorder repo for seeding rows.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::{
    db::repos::{EventSelector, PurgeRepo, RecorderRepo, StateSelector},
    models::{EVENT_STATE_CHANGED, NewEvent, NewRecorderRun, NewState, Recorded},
};

// ============================================================================
// Test Input Helpers
// ============================================================================

/// Fixed reference time with whole-second precision so every backend
/// round-trips it exactly.
fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Test context containing repos needed for purge tests
pub struct PurgeTestContext<'a> {
    pub purge_repo: &'a dyn PurgeRepo,
    pub recorder_repo: &'a dyn RecorderRepo,
}

impl<'a> PurgeTestContext<'a> {
    /// Record one state change at `at`, linked to `old_state_id`.
    pub async fn record_state(
        &self,
        entity_id: &str,
        at: DateTime<Utc>,
        old_state_id: Option<i64>,
    ) -> Recorded {
        let mut state = NewState::new(entity_id, "on", at);
        state.old_state_id = old_state_id;
        self.recorder_repo
            .record(NewEvent::state_changed(at), Some(state))
            .await
            .expect("Failed to record state")
    }

    /// Record a chain of states for one entity, each linked to the previous.
    pub async fn record_chain(&self, entity_id: &str, times: &[DateTime<Utc>]) -> Vec<i64> {
        let mut ids = Vec::with_capacity(times.len());
        let mut previous = None;
        for at in times {
            let recorded = self.record_state(entity_id, *at, previous).await;
            let state_id = recorded.state_id.expect("State id missing");
            ids.push(state_id);
            previous = Some(state_id);
        }
        ids
    }

    pub async fn record_event(&self, event_type: &str, at: DateTime<Utc>) -> i64 {
        self.recorder_repo
            .record(NewEvent::new(event_type, at), None)
            .await
            .expect("Failed to record event")
            .event_id
    }

    pub async fn state_count(&self) -> i64 {
        self.recorder_repo.count_states().await.unwrap()
    }

    pub async fn event_count(&self, event_type: Option<&str>) -> i64 {
        self.recorder_repo.count_events(event_type).await.unwrap()
    }

    pub async fn dangling_count(&self) -> i64 {
        self.recorder_repo
            .count_dangling_old_state_ids()
            .await
            .unwrap()
    }
}

// ============================================================================
// State Batch Tests
// ============================================================================

pub async fn test_state_batch_on_empty_store(ctx: &PurgeTestContext<'_>) {
    let batch = ctx
        .purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(base_time()), 998)
        .await
        .expect("Failed to purge");

    assert!(batch.is_empty());
    assert!(!batch.full);
    assert!(batch.purged_state_ids.is_empty());
}

pub async fn test_state_batch_keeps_row_at_cutoff(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    let older = ctx
        .record_state("sensor.before", cutoff - Duration::seconds(1), None)
        .await;
    ctx.record_state("sensor.exact", cutoff, None).await;
    ctx.record_state("sensor.after", cutoff + Duration::seconds(1), None)
        .await;

    let batch = ctx
        .purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
        .await
        .expect("Failed to purge");

    assert_eq!(batch.states_deleted, 1);
    assert_eq!(batch.events_deleted, 1);
    assert_eq!(batch.purged_state_ids, vec![older.state_id.unwrap()]);
    assert!(!batch.full);

    let remaining: Vec<String> = ctx
        .recorder_repo
        .list_states(None)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.entity_id)
        .collect();
    assert_eq!(remaining, vec!["sensor.exact", "sensor.after"]);
    assert_eq!(ctx.event_count(Some(EVENT_STATE_CHANGED)).await, 2);
}

pub async fn test_state_batch_repairs_old_state_links(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    let ids = ctx
        .record_chain(
            "sensor.chain",
            &[
                cutoff - Duration::days(3),
                cutoff - Duration::days(2),
                cutoff + Duration::hours(1),
            ],
        )
        .await;

    let batch = ctx
        .purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
        .await
        .expect("Failed to purge");

    assert_eq!(batch.states_deleted, 2);
    assert_eq!(ctx.dangling_count().await, 0);

    let survivor = ctx
        .recorder_repo
        .get_state(ids[2])
        .await
        .unwrap()
        .expect("Newest state should survive");
    assert_eq!(survivor.old_state_id, None);
}

pub async fn test_state_batch_reports_full_at_cap(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    for i in 0..5 {
        ctx.record_state("sensor.many", cutoff - Duration::minutes(10 + i), None)
            .await;
    }

    let first = ctx
        .purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 2)
        .await
        .unwrap();
    assert_eq!(first.states_deleted, 2);
    assert!(first.full);

    let mut total = first.states_deleted;
    let mut batches = 1;
    loop {
        let batch = ctx
            .purge_repo
            .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 2)
            .await
            .unwrap();
        total += batch.states_deleted;
        batches += 1;
        if !batch.full {
            break;
        }
    }

    assert_eq!(total, 5);
    assert_eq!(batches, 3);
    assert_eq!(ctx.state_count().await, 0);
    assert_eq!(ctx.event_count(None).await, 0);
}

pub async fn test_state_batch_by_entity_ignores_age(ctx: &PurgeTestContext<'_>) {
    let now = base_time();
    ctx.record_chain("sensor.doomed", &[now, now + Duration::seconds(1)])
        .await;
    let kept = ctx.record_chain("sensor.kept", &[now]).await;

    let entities = vec!["sensor.doomed".to_string()];
    let batch = ctx
        .purge_repo
        .purge_state_batch(StateSelector::Entities(&entities), 998)
        .await
        .unwrap();

    assert_eq!(batch.states_deleted, 2);
    assert_eq!(batch.events_deleted, 2);
    let remaining = ctx.recorder_repo.list_states(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].state_id, kept[0]);
    assert_eq!(ctx.dangling_count().await, 0);
}

pub async fn test_state_batch_leaves_other_event_types(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    ctx.record_state("sensor.old", cutoff - Duration::days(1), None)
        .await;
    ctx.record_event("call_service", cutoff - Duration::days(1))
        .await;

    ctx.purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
        .await
        .unwrap();

    assert_eq!(ctx.state_count().await, 0);
    assert_eq!(ctx.event_count(Some(EVENT_STATE_CHANGED)).await, 0);
    assert_eq!(ctx.event_count(Some("call_service")).await, 1);
}

pub async fn test_state_batch_keeps_other_event_types_linked(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    let state = NewState::new("sensor.old", "on", cutoff - Duration::days(1));
    ctx.recorder_repo
        .record(NewEvent::new("call_service", cutoff + Duration::hours(1)), Some(state))
        .await
        .unwrap();

    let batch = ctx
        .purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
        .await
        .unwrap();

    assert_eq!(batch.states_deleted, 1);
    assert_eq!(batch.events_deleted, 0);
    assert_eq!(batch.links_detached, 0);
    assert_eq!(ctx.event_count(Some("call_service")).await, 1);
}

// ============================================================================
// Event Batch Tests
// ============================================================================

pub async fn test_event_batch_detaches_surviving_states(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    // A state that was updated after its event was created.
    let mut state = NewState::new("sensor.late", "on", cutoff + Duration::minutes(5));
    state.created = cutoff - Duration::days(1);
    let recorded = ctx
        .recorder_repo
        .record(NewEvent::state_changed(cutoff - Duration::days(1)), Some(state))
        .await
        .unwrap();
    ctx.record_event("call_service", cutoff - Duration::hours(1))
        .await;
    ctx.record_event("call_service", cutoff).await;

    let batch = ctx
        .purge_repo
        .purge_event_batch(EventSelector::CreatedBefore(cutoff), 998)
        .await
        .unwrap();

    assert_eq!(batch.events_deleted, 2);
    assert_eq!(batch.states_deleted, 0);
    assert_eq!(batch.links_detached, 1);
    assert!(!batch.full);

    let state = ctx
        .recorder_repo
        .get_state(recorded.state_id.unwrap())
        .await
        .unwrap()
        .expect("State should survive");
    assert_eq!(state.event_id, None);
    assert_eq!(ctx.event_count(None).await, 1);
}

pub async fn test_event_batch_by_type_deletes_linked_states(ctx: &PurgeTestContext<'_>) {
    let now = base_time();
    let ids = ctx
        .record_chain("sensor.typed", &[now, now + Duration::seconds(1)])
        .await;
    ctx.record_event("call_service", now).await;
    ctx.record_event("automation_triggered", now).await;

    let types = vec!["call_service".to_string()];
    let batch = ctx
        .purge_repo
        .purge_event_batch(EventSelector::Types(&types), 998)
        .await
        .unwrap();
    assert_eq!(batch.events_deleted, 1);
    assert_eq!(batch.states_deleted, 0);
    assert_eq!(ctx.state_count().await, 2);

    let types = vec![EVENT_STATE_CHANGED.to_string()];
    let batch = ctx
        .purge_repo
        .purge_event_batch(EventSelector::Types(&types), 998)
        .await
        .unwrap();
    assert_eq!(batch.events_deleted, 2);
    assert_eq!(batch.states_deleted, 2);
    let mut purged = batch.purged_state_ids.clone();
    purged.sort_unstable();
    assert_eq!(purged, ids);
    assert_eq!(ctx.state_count().await, 0);
    assert_eq!(ctx.event_count(None).await, 1);
    assert_eq!(ctx.dangling_count().await, 0);
}

pub async fn test_event_batch_with_no_types_is_noop(ctx: &PurgeTestContext<'_>) {
    ctx.record_event("call_service", base_time()).await;

    let batch = ctx
        .purge_repo
        .purge_event_batch(EventSelector::Types(&[]), 998)
        .await
        .unwrap();

    assert!(batch.is_empty());
    assert_eq!(ctx.event_count(None).await, 1);
}

// ============================================================================
// Run Batch Tests
// ============================================================================

async fn insert_run(
    repo: &dyn RecorderRepo,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> i64 {
    repo.insert_run(NewRecorderRun {
        start,
        end,
        closed_incorrect: false,
        created: start,
    })
    .await
    .expect("Failed to insert run")
    .run_id
}

pub async fn test_run_batch_keeps_current_and_open_runs(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    let repo = ctx.recorder_repo;

    let old = insert_run(repo, cutoff - Duration::days(2), Some(cutoff - Duration::days(1))).await;
    let exact = insert_run(repo, cutoff - Duration::days(1), Some(cutoff)).await;
    let later = insert_run(
        repo,
        cutoff - Duration::hours(1),
        Some(cutoff + Duration::hours(1)),
    )
    .await;
    let open = insert_run(repo, cutoff - Duration::days(5), None).await;
    // The live run survives even when its row already carries an end.
    let current = insert_run(
        repo,
        cutoff - Duration::days(3),
        Some(cutoff - Duration::days(2)),
    )
    .await;

    let batch = ctx
        .purge_repo
        .purge_run_batch(cutoff, current, 998)
        .await
        .unwrap();
    assert_eq!(batch.runs_deleted, 2);
    assert!(!batch.full);

    let mut remaining: Vec<i64> = repo
        .list_runs()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.run_id)
        .collect();
    remaining.sort_unstable();
    let mut expected = vec![later, open, current];
    expected.sort_unstable();
    assert_eq!(remaining, expected);
    assert!(!remaining.contains(&old));
    assert!(!remaining.contains(&exact));
}

pub async fn test_run_batch_reports_full_at_cap(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    for i in 0..3 {
        let start = cutoff - Duration::days(10 + i);
        ctx.recorder_repo
            .insert_run(NewRecorderRun::closed(start, start + Duration::hours(1)))
            .await
            .unwrap();
    }
    let current = ctx.recorder_repo.start_run(cutoff).await.unwrap();

    let batch = ctx
        .purge_repo
        .purge_run_batch(cutoff, current.run_id, 2)
        .await
        .unwrap();
    assert_eq!(batch.runs_deleted, 2);
    assert!(batch.full);

    let batch = ctx
        .purge_repo
        .purge_run_batch(cutoff, current.run_id, 2)
        .await
        .unwrap();
    assert_eq!(batch.runs_deleted, 1);
    assert!(!batch.full);
    assert_eq!(ctx.recorder_repo.count_runs().await.unwrap(), 1);
}

// ============================================================================
// Discovery and Maintenance Tests
// ============================================================================

pub async fn test_distinct_entities_and_event_types(ctx: &PurgeTestContext<'_>) {
    let now = base_time();
    ctx.record_chain("sensor.a", &[now, now + Duration::seconds(1)])
        .await;
    ctx.record_chain("light.b", &[now]).await;
    ctx.record_event("call_service", now).await;

    let mut entities = ctx.purge_repo.distinct_entity_ids().await.unwrap();
    entities.sort();
    assert_eq!(entities, vec!["light.b", "sensor.a"]);

    let mut types = ctx.purge_repo.distinct_event_types().await.unwrap();
    types.sort();
    assert_eq!(types, vec!["call_service", EVENT_STATE_CHANGED]);
}

pub async fn test_repack_after_purge(ctx: &PurgeTestContext<'_>) {
    let cutoff = base_time();
    ctx.record_state("sensor.old", cutoff - Duration::days(1), None)
        .await;
    ctx.purge_repo
        .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
        .await
        .unwrap();

    ctx.purge_repo.repack().await.expect("Repack failed");
    assert_eq!(ctx.state_count().await, 0);
}

// ============================================================================
// SQLite Tests
// ============================================================================

#[cfg(all(test, feature = "database-sqlite"))]
mod sqlite_tests {
    use super::*;
    use crate::db::{
        sqlite::{SqlitePurgeRepo, SqliteRecorderRepo},
        tests::harness::{create_sqlite_pool, run_sqlite_migrations},
    };

    async fn create_repos() -> (SqlitePurgeRepo, SqliteRecorderRepo) {
        let pool = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        (
            SqlitePurgeRepo::new(pool.clone()),
            SqliteRecorderRepo::new(pool),
        )
    }

    macro_rules! sqlite_test {
        ($name:ident) => {
            #[tokio::test]
            async fn $name() {
                let (purge_repo, recorder_repo) = create_repos().await;
                let ctx = PurgeTestContext {
                    purge_repo: &purge_repo,
                    recorder_repo: &recorder_repo,
                };
                super::$name(&ctx).await;
            }
        };
    }

    // State batches
    sqlite_test!(test_state_batch_on_empty_store);
    sqlite_test!(test_state_batch_keeps_row_at_cutoff);
    sqlite_test!(test_state_batch_repairs_old_state_links);
    sqlite_test!(test_state_batch_reports_full_at_cap);
    sqlite_test!(test_state_batch_by_entity_ignores_age);
    sqlite_test!(test_state_batch_leaves_other_event_types);
    sqlite_test!(test_state_batch_keeps_other_event_types_linked);

    // Event batches
    sqlite_test!(test_event_batch_detaches_surviving_states);
    sqlite_test!(test_event_batch_by_type_deletes_linked_states);
    sqlite_test!(test_event_batch_with_no_types_is_noop);

    // Run batches
    sqlite_test!(test_run_batch_keeps_current_and_open_runs);
    sqlite_test!(test_run_batch_reports_full_at_cap);

    // Discovery and maintenance
    sqlite_test!(test_distinct_entities_and_event_types);
    sqlite_test!(test_repack_after_purge);

    #[tokio::test]
    async fn test_state_batch_keeps_shared_event_link() {
        let pool = create_sqlite_pool().await;
        run_sqlite_migrations(&pool).await;
        let purge_repo = SqlitePurgeRepo::new(pool.clone());
        let recorder_repo = SqliteRecorderRepo::new(pool.clone());
        let cutoff = base_time();

        let old = recorder_repo
            .record(
                NewEvent::new("call_service", cutoff),
                Some(NewState::new("sensor.a", "on", cutoff - Duration::days(10))),
            )
            .await
            .unwrap();
        let new_state_id = recorder_repo
            .record(
                NewEvent::state_changed(cutoff),
                Some(NewState::new("sensor.b", "on", cutoff)),
            )
            .await
            .unwrap()
            .state_id
            .unwrap();
        sqlx::query("UPDATE states SET event_id = ? WHERE state_id = ?")
            .bind(old.event_id)
            .bind(new_state_id)
            .execute(&pool)
            .await
            .unwrap();

        let batch = purge_repo
            .purge_state_batch(StateSelector::UpdatedBefore(cutoff - Duration::days(5)), 998)
            .await
            .unwrap();
        assert_eq!(batch.states_deleted, 1);
        assert_eq!(batch.events_deleted, 0);
        assert_eq!(batch.links_detached, 0);

        let survivor = recorder_repo
            .get_state(new_state_id)
            .await
            .unwrap()
            .expect("State should survive");
        assert_eq!(survivor.event_id, Some(old.event_id));
        assert_eq!(
            recorder_repo.count_events(Some("call_service")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_state_batch_beyond_parameter_limit() {
        let (purge_repo, recorder_repo) = create_repos().await;
        let ctx = PurgeTestContext {
            purge_repo: &purge_repo,
            recorder_repo: &recorder_repo,
        };
        let cutoff = base_time();
        let times: Vec<_> = (0..1200)
            .map(|i| cutoff - Duration::seconds(2000 - i))
            .collect();
        ctx.record_chain("sensor.busy", &times).await;

        let first = purge_repo
            .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
            .await
            .unwrap();
        assert_eq!(first.states_deleted, 998);
        assert!(first.full);

        let second = purge_repo
            .purge_state_batch(StateSelector::UpdatedBefore(cutoff), 998)
            .await
            .unwrap();
        assert_eq!(second.states_deleted, 202);
        assert!(!second.full);
        assert_eq!(ctx.dangling_count().await, 0);
    }
}

// ============================================================================
// PostgreSQL Tests - Require Docker, run with `cargo test -- --ignored`
// ============================================================================

#[cfg(all(test, feature = "database-postgres"))]
mod postgres_tests {
    use super::*;
    use crate::db::{
        postgres::{PostgresPurgeRepo, PostgresRecorderRepo},
        tests::harness::postgres::{create_isolated_postgres_pool, run_postgres_migrations},
    };

    macro_rules! postgres_test {
        ($name:ident) => {
            #[tokio::test]
            #[ignore = "Requires Docker - run with `cargo test -- --ignored`"]
            async fn $name() {
                let pool = create_isolated_postgres_pool().await;
                run_postgres_migrations(&pool).await;
                let purge_repo = PostgresPurgeRepo::new(pool.clone());
                let recorder_repo = PostgresRecorderRepo::new(pool, None);
                let ctx = PurgeTestContext {
                    purge_repo: &purge_repo,
                    recorder_repo: &recorder_repo,
                };
                super::$name(&ctx).await;
            }
        };
    }

    // State batches
    postgres_test!(test_state_batch_on_empty_store);
    postgres_test!(test_state_batch_keeps_row_at_cutoff);
    postgres_test!(test_state_batch_repairs_old_state_links);
    postgres_test!(test_state_batch_reports_full_at_cap);
    postgres_test!(test_state_batch_by_entity_ignores_age);
    postgres_test!(test_state_batch_leaves_other_event_types);
    postgres_test!(test_state_batch_keeps_other_event_types_linked);

    // Event batches
    postgres_test!(test_event_batch_detaches_surviving_states);
    postgres_test!(test_event_batch_by_type_deletes_linked_states);
    postgres_test!(test_event_batch_with_no_types_is_noop);

    // Run batches
    postgres_test!(test_run_batch_keeps_current_and_open_runs);
    postgres_test!(test_run_batch_reports_full_at_cap);

    // Discovery and maintenance
    postgres_test!(test_distinct_entities_and_event_types);
    postgres_test!(test_repack_after_purge);
}
