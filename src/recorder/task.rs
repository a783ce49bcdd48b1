use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    filter::{EntitySelection, FilterError},
    models::{NewEvent, NewState},
};

/// Delete history older than `cutoff`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeTask {
    pub cutoff: DateTime<Utc>,
    /// Compact the database once the purge has finished.
    pub repack: bool,
    /// Also delete rows rejected by the recorder filter, regardless of age.
    pub apply_filter: bool,
    /// Consecutive transient failures so far.
    pub attempt: u32,
}

impl PurgeTask {
    pub fn new(cutoff: DateTime<Utc>, repack: bool, apply_filter: bool) -> Self {
        Self {
            cutoff,
            repack,
            apply_filter,
            attempt: 0,
        }
    }
}

/// Delete all history of the selected entities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeEntitiesTask {
    pub entity_ids: Vec<String>,
    pub domains: Vec<String>,
    pub entity_globs: Vec<String>,
    pub attempt: u32,
}

impl PurgeEntitiesTask {
    pub fn selection(&self) -> Result<EntitySelection, FilterError> {
        EntitySelection::new(&self.entity_ids, &self.domains, &self.entity_globs)
    }

    pub fn is_unfiltered(&self) -> bool {
        self.entity_ids.is_empty() && self.domains.is_empty() && self.entity_globs.is_empty()
    }
}

/// An event, and optionally the state it carries, waiting to be written.
#[derive(Debug, Clone)]
pub struct Recording {
    pub event: NewEvent,
    pub state: Option<NewState>,
}

/// Work items consumed in order by the recorder worker.
#[derive(Debug)]
pub enum RecorderTask {
    Record(Recording),
    Purge(PurgeTask),
    PurgeEntities(PurgeEntitiesTask),
    /// Completed once every task queued before it has been handled.
    Barrier(oneshot::Sender<()>),
    Stop,
}

impl RecorderTask {
    fn is_purge(&self) -> bool {
        matches!(self, RecorderTask::Purge(_) | RecorderTask::PurgeEntities(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Recorder queue is closed")]
pub struct QueueClosed;

/// Sending side of the recorder queue.
///
/// Tracks purge requests that have been accepted but not yet finished,
/// failed or abandoned. Re-enqueues of an unfinished purge do not count again.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<RecorderTask>,
    pending: Arc<watch::Sender<usize>>,
}

impl TaskQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RecorderTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (pending, _) = watch::channel(0);
        (
            Self {
                tx,
                pending: Arc::new(pending),
            },
            rx,
        )
    }

    /// Queue a new task. Never blocks.
    pub fn enqueue(&self, task: RecorderTask) -> Result<(), QueueClosed> {
        let is_purge = task.is_purge();
        if is_purge {
            self.pending.send_modify(|n| *n += 1);
        }
        self.tx.send(task).map_err(|_| {
            if is_purge {
                self.purge_done();
            }
            QueueClosed
        })
    }

    /// Mark one accepted purge as done.
    pub fn purge_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn pending_purges(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn watch_pending(&self) -> watch::Receiver<usize> {
        self.pending.subscribe()
    }

    /// A sender that does not keep the queue open, for the worker's own
    /// re-enqueues.
    pub(crate) fn requeue_handle(&self) -> Requeue {
        Requeue {
            tx: self.tx.downgrade(),
            pending: Arc::clone(&self.pending),
        }
    }
}

/// Re-enqueue side held by the worker.
#[derive(Debug, Clone)]
pub(crate) struct Requeue {
    tx: mpsc::WeakUnboundedSender<RecorderTask>,
    pending: Arc<watch::Sender<usize>>,
}

impl Requeue {
    /// Put an unfinished purge back at the end of the queue. If the queue is
    /// gone the purge is dropped and no longer counted as pending.
    pub fn requeue(&self, task: RecorderTask) {
        let sent = self
            .tx
            .upgrade()
            .is_some_and(|tx| tx.send(task).is_ok());
        if !sent {
            tracing::debug!("Recorder queue closed, dropping unfinished purge");
            self.purge_done();
        }
    }

    /// [`requeue`](Self::requeue) once `wait` has elapsed, without blocking
    /// the caller.
    pub fn requeue_after(&self, task: RecorderTask, wait: Duration) {
        let requeue = self.clone();
        let sleep = tokio::time::sleep(wait);
        tokio::spawn(async move {
            sleep.await;
            requeue.requeue(task);
        });
    }

    pub fn purge_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}
