use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use super::{
    RecorderContext, StoreHandle, run,
    task::{PurgeEntitiesTask, PurgeTask, RecorderTask, Recording, Requeue},
};
use crate::{
    config::RecorderConfig,
    db::{DbError, DbPool},
    events::{EventBus, PurgeEvent, PurgeKind},
    filter::EntityFilter,
    observability::metrics,
    purge::{
        self, AttemptOutcome, PurgeLimits, PurgeOutcome, RetryPolicy, repack_database, run_attempt,
    },
};

/// The single consumer of the recorder queue.
///
/// Owns the write path: ingestion writes, purges and store rebuilds all run
/// here, one task at a time.
pub(crate) struct Worker {
    pub store: StoreHandle,
    pub ctx: RecorderContext,
    pub config: Arc<RecorderConfig>,
    pub filter: Arc<EntityFilter>,
    pub limits: PurgeLimits,
    pub retry: RetryPolicy,
    pub rx: mpsc::UnboundedReceiver<RecorderTask>,
    pub requeue: Requeue,
    pub events: EventBus,
}

impl Worker {
    pub async fn run(mut self) {
        tracing::debug!(run_id = self.ctx.run_id(), "Recorder worker started");

        while let Some(task) = self.rx.recv().await {
            match task {
                RecorderTask::Record(recording) => self.record(recording).await,
                RecorderTask::Purge(task) => self.purge(task).await,
                RecorderTask::PurgeEntities(task) => self.purge_entities(task).await,
                RecorderTask::Barrier(done) => {
                    let _ = done.send(());
                }
                RecorderTask::Stop => break,
            }
        }

        let db = self.store.current();
        if let Err(e) = run::finish_run(db.recorder().as_ref(), self.ctx.run(), Utc::now()).await {
            tracing::error!(error = %e, "Failed to close recorder run");
        }
        tracing::debug!("Recorder worker stopped");
    }

    async fn record(&mut self, recording: Recording) {
        let Recording { event, mut state } = recording;
        if let Some(state) = state.as_mut()
            && state.old_state_id.is_none()
        {
            state.old_state_id = self.ctx.old_state_id(&state.entity_id);
        }
        let entity_id = state.as_ref().map(|s| s.entity_id.clone());

        let db = self.store.current();
        match db.recorder().record(event, state).await {
            Ok(recorded) => {
                if let (Some(entity_id), Some(state_id)) = (entity_id, recorded.state_id) {
                    self.ctx.remember_state(&entity_id, state_id);
                }
            }
            Err(e) if e.is_corruption() => self.rebuild_store(e).await,
            Err(e) => tracing::error!(error = %e, "Error saving event"),
        }
    }

    async fn purge(&mut self, task: PurgeTask) {
        let db = self.store.current();
        let repo = db.purge();

        let attempt = run_attempt(
            PurgeKind::OldData,
            task.attempt,
            &self.retry,
            purge::purge_old_data(
                repo.as_ref(),
                &mut self.ctx,
                self.filter.as_ref(),
                task.cutoff,
                task.apply_filter,
                self.limits,
            ),
        )
        .await;

        match attempt {
            AttemptOutcome::Success(outcome) => {
                self.progress(PurgeKind::OldData, &outcome);
                if !outcome.finished {
                    self.requeue
                        .requeue(RecorderTask::Purge(PurgeTask { attempt: 0, ..task }));
                    return;
                }
                if task.repack {
                    let success = repack_database(repo.as_ref(), db.backend()).await;
                    self.events.publish(PurgeEvent::Repacked {
                        timestamp: Utc::now(),
                        success,
                    });
                }
                self.requeue.purge_done();
            }
            AttemptOutcome::Retry(e) => {
                self.retrying(PurgeKind::OldData, task.attempt + 1, &e);
                self.requeue.requeue_after(
                    RecorderTask::Purge(PurgeTask {
                        attempt: task.attempt + 1,
                        ..task
                    }),
                    self.retry.wait,
                );
            }
            AttemptOutcome::Fatal(e) => {
                self.failed(PurgeKind::OldData, &e);
                self.requeue.purge_done();
            }
            AttemptOutcome::Corruption(e) => {
                self.rebuild_store(e).await;
                self.requeue.purge_done();
            }
        }
    }

    async fn purge_entities(&mut self, task: PurgeEntitiesTask) {
        let selection = match task.selection() {
            Ok(selection) => selection,
            Err(e) => {
                tracing::error!(error = %e, "Invalid entity selection, dropping purge");
                self.failed(PurgeKind::Entities, &e);
                self.requeue.purge_done();
                return;
            }
        };

        let db = self.store.current();
        let repo = db.purge();
        let attempt = run_attempt(
            PurgeKind::Entities,
            task.attempt,
            &self.retry,
            purge::purge_entity_data(repo.as_ref(), &mut self.ctx, &selection, self.limits),
        )
        .await;

        match attempt {
            AttemptOutcome::Success(outcome) => {
                self.progress(PurgeKind::Entities, &outcome);
                if outcome.finished {
                    self.requeue.purge_done();
                } else {
                    self.requeue
                        .requeue(RecorderTask::PurgeEntities(PurgeEntitiesTask { attempt: 0, ..task }));
                }
            }
            AttemptOutcome::Retry(e) => {
                let attempt = task.attempt + 1;
                self.retrying(PurgeKind::Entities, attempt, &e);
                self.requeue.requeue_after(
                    RecorderTask::PurgeEntities(PurgeEntitiesTask { attempt, ..task }),
                    self.retry.wait,
                );
            }
            AttemptOutcome::Fatal(e) => {
                self.failed(PurgeKind::Entities, &e);
                self.requeue.purge_done();
            }
            AttemptOutcome::Corruption(e) => {
                self.rebuild_store(e).await;
                self.requeue.purge_done();
            }
        }
    }

    /// Move the corrupt store aside and continue on an empty one.
    async fn rebuild_store(&mut self, error: DbError) {
        tracing::error!(error = %error, "Database is corrupt, rebuilding");
        let old = self.store.current();

        let (db, quarantined) = match old.rebuild(&self.config.database).await {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                tracing::error!(error = %e, "Failed to rebuild corrupt database");
                if old.is_closed() {
                    self.reopen_store().await;
                }
                return;
            }
        };

        let run = match run::begin_run(db.recorder().as_ref(), Utc::now()).await {
            Ok(run) => run,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start recorder run on rebuilt database");
                return;
            }
        };

        self.ctx.set_run(run);
        self.ctx.clear_cache();
        self.store.replace(Arc::new(db));

        self.events.publish(PurgeEvent::DatabaseRebuilt {
            timestamp: Utc::now(),
            error: error.to_string(),
            quarantined_path: quarantined.map(|p| p.display().to_string()),
        });
    }

    /// Reopen the configured store after a rebuild failed past closing it.
    async fn reopen_store(&mut self) {
        match DbPool::from_config(&self.config.database).await {
            Ok(db) => {
                tracing::warn!("Reopened database after failed rebuild");
                self.ctx.clear_cache();
                self.store.replace(Arc::new(db));
            }
            Err(e) => tracing::error!(error = %e, "Failed to reopen database"),
        }
    }

    fn progress(&self, kind: PurgeKind, outcome: &PurgeOutcome) {
        let result = if outcome.finished { "finished" } else { "incomplete" };
        metrics::record_purge_run(kind.as_str(), result);
        tracing::debug!(
            kind = kind.as_str(),
            states = outcome.states_deleted,
            events = outcome.events_deleted,
            runs = outcome.runs_deleted,
            passes = outcome.passes,
            finished = outcome.finished,
            "Purge invocation complete"
        );
        self.events.publish(PurgeEvent::PurgeProgress {
            kind,
            timestamp: Utc::now(),
            finished: outcome.finished,
            states_deleted: outcome.states_deleted,
            events_deleted: outcome.events_deleted,
            runs_deleted: outcome.runs_deleted,
        });
    }

    fn retrying(&self, kind: PurgeKind, attempt: u32, error: &DbError) {
        self.events.publish(PurgeEvent::PurgeRetrying {
            kind,
            timestamp: Utc::now(),
            attempt,
            error: error.to_string(),
        });
    }

    fn failed(&self, kind: PurgeKind, error: &dyn std::fmt::Display) {
        self.events.publish(PurgeEvent::PurgeFailed {
            kind,
            timestamp: Utc::now(),
            error: error.to_string(),
        });
    }
}
