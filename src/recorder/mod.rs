//! The recorder: a single background worker that owns every write to the
//! history store, plus the handle used to feed it.
//!
//! Ingestion writes and purge requests share one ordered queue. Service calls
//! validate their payload, enqueue a task and return; completion is observed
//! through [`Recorder::wait_purge_done`] or the [`PurgeEvent`] bus.

mod context;
mod run;
mod schedule;
pub mod services;
mod task;
mod worker;


use std::sync::Arc;

use chrono::Utc;
pub use context::RecorderContext;
use parking_lot::RwLock;
pub use run::{begin_run, finish_run};
pub use services::{PurgeEntitiesServiceData, PurgeServiceData, ServiceError};
pub use task::{PurgeEntitiesTask, PurgeTask, QueueClosed, RecorderTask, Recording, TaskQueue};
use thiserror::Error;
use tokio::{
    sync::{broadcast, oneshot},
    task::JoinHandle,
};

use crate::{
    config::RecorderConfig,
    db::{DbError, DbPool},
    events::{EventBus, PurgeEvent},
    filter::{EntityFilter, FilterError},
    models::{NewEvent, NewState},
    purge::{PurgeLimits, RetryPolicy},
};

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// The store currently in use. Swapped by the worker after a rebuild.
#[derive(Clone)]
pub(crate) struct StoreHandle(Arc<RwLock<Arc<DbPool>>>);

impl StoreHandle {
    fn new(db: DbPool) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(db))))
    }

    pub fn current(&self) -> Arc<DbPool> {
        Arc::clone(&self.0.read())
    }

    pub fn replace(&self, db: Arc<DbPool>) {
        *self.0.write() = db;
    }
}

/// Handle to a running recorder.
pub struct Recorder {
    queue: TaskQueue,
    store: StoreHandle,
    events: EventBus,
    config: Arc<RecorderConfig>,
    worker: Option<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Connect to the configured store, migrate it if enabled, and start the
    /// worker.
    pub async fn start(config: RecorderConfig) -> Result<Self, RecorderError> {
        let db = DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }
        Self::start_with_pool(config, db).await
    }

    /// Start the worker on an already connected and migrated store.
    pub async fn start_with_pool(config: RecorderConfig, db: DbPool) -> Result<Self, RecorderError> {
        let filter = Arc::new(EntityFilter::from_config(&config.filter)?);
        let run = begin_run(db.recorder().as_ref(), Utc::now()).await?;

        let config = Arc::new(config);
        let store = StoreHandle::new(db);
        let events = EventBus::new();
        let (queue, rx) = TaskQueue::new();

        let worker = worker::Worker {
            store: store.clone(),
            ctx: RecorderContext::new(run),
            config: Arc::clone(&config),
            filter,
            limits: PurgeLimits::from_config(&config.purge),
            retry: RetryPolicy::from_config(&config.purge),
            rx,
            requeue: queue.requeue_handle(),
            events: events.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            queue,
            store,
            events,
            config,
            worker: Some(worker),
            scheduler: None,
        })
    }

    /// Start queueing purges on the configured interval.
    pub fn start_auto_purge(&mut self) {
        if self.scheduler.is_some() {
            return;
        }
        self.scheduler = Some(tokio::spawn(schedule::run_auto_purge(
            self.queue.clone(),
            self.config.purge.clone(),
        )));
    }

    /// Queue an ingestion write.
    pub fn record(&self, event: NewEvent, state: Option<NewState>) -> Result<(), ServiceError> {
        self.enqueue(RecorderTask::Record(Recording { event, state }))
    }

    /// `recorder.purge`
    pub fn purge(&self, data: PurgeServiceData) -> Result<(), ServiceError> {
        let task = data.into_task(self.config.purge.keep_days, Utc::now())?;
        self.queue_purge(task)
    }

    /// `recorder.purge_entities`
    pub fn purge_entities(&self, data: PurgeEntitiesServiceData) -> Result<(), ServiceError> {
        let task = data.into_task()?;
        self.enqueue(RecorderTask::PurgeEntities(task))
    }

    /// Dispatch a service call by name with a JSON payload.
    pub fn call_service(&self, service: &str, data: serde_json::Value) -> Result<(), ServiceError> {
        match service {
            services::SERVICE_PURGE => self.purge(serde_json::from_value(data)?),
            services::SERVICE_PURGE_ENTITIES => self.purge_entities(serde_json::from_value(data)?),
            other => Err(ServiceError::UnknownService(other.to_string())),
        }
    }

    /// Queue an already built purge task.
    pub fn queue_purge(&self, task: PurgeTask) -> Result<(), ServiceError> {
        tracing::debug!(
            cutoff = %task.cutoff,
            repack = task.repack,
            apply_filter = task.apply_filter,
            "Queueing purge"
        );
        self.enqueue(RecorderTask::Purge(task))
    }

    fn enqueue(&self, task: RecorderTask) -> Result<(), ServiceError> {
        self.queue
            .enqueue(task)
            .map_err(|QueueClosed| ServiceError::RecorderStopped)
    }

    /// Wait until every task queued so far has been handled.
    ///
    /// Unfinished purges re-enqueue themselves behind the barrier; use
    /// [`wait_purge_done`](Self::wait_purge_done) to wait for those.
    pub async fn block_till_done(&self) {
        let (tx, rx) = oneshot::channel();
        if self.queue.enqueue(RecorderTask::Barrier(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Wait until no accepted purge is pending.
    pub async fn wait_purge_done(&self) {
        let mut pending = self.queue.watch_pending();
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    pub fn pending_purges(&self) -> usize {
        self.queue.pending_purges()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PurgeEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The store in use. Changes after a corruption rebuild.
    pub fn db(&self) -> Arc<DbPool> {
        self.store.current()
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Stop the scheduler, drain the queue, close the run and the store.
    pub async fn shutdown(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
        let _ = self.queue.enqueue(RecorderTask::Stop);
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            tracing::error!(error = %e, "Recorder worker panicked");
        }
        self.store.current().close().await;
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.abort();
        }
    }
}
