//! Broadcast bus for purge lifecycle notifications.
//!
//! The recorder worker publishes a [`PurgeEvent`] after every purge
//! invocation, and when a purge is retried, abandoned or replaced by a store
//! rebuild. Tests and the CLI subscribe to observe outcomes that never surface
//! as errors.
//!
//! # Example
//!
//! ```ignore
//! let mut rx = recorder.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default channel capacity for the event bus.
/// Slow receivers start lagging once this many events are buffered.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Which purge operation an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurgeKind {
    /// Age based purge, optionally with the recorder filter applied.
    OldData,
    /// Purge of selected entities regardless of age.
    Entities,
}

impl PurgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurgeKind::OldData => "old_data",
            PurgeKind::Entities => "entities",
        }
    }
}

/// Purge lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum PurgeEvent {
    /// One invocation of the purge engine ended without error.
    ///
    /// `finished = false` means the task was re-enqueued to continue.
    PurgeProgress {
        kind: PurgeKind,
        timestamp: DateTime<Utc>,
        finished: bool,
        states_deleted: u64,
        events_deleted: u64,
        runs_deleted: u64,
    },

    /// A transient database error; the task will run again after a delay.
    PurgeRetrying {
        kind: PurgeKind,
        timestamp: DateTime<Utc>,
        attempt: u32,
        error: String,
    },

    /// The purge was abandoned.
    PurgeFailed {
        kind: PurgeKind,
        timestamp: DateTime<Utc>,
        error: String,
    },

    /// The database reported corruption and was replaced by an empty one.
    DatabaseRebuilt {
        timestamp: DateTime<Utc>,
        error: String,
        quarantined_path: Option<String>,
    },

    /// Repack ran after a finished purge.
    Repacked {
        timestamp: DateTime<Utc>,
        success: bool,
    },
}

impl PurgeEvent {
    /// Get the event type name as a string.
    pub fn event_type(&self) -> &'static str {
        match self {
            PurgeEvent::PurgeProgress { .. } => "purge_progress",
            PurgeEvent::PurgeRetrying { .. } => "purge_retrying",
            PurgeEvent::PurgeFailed { .. } => "purge_failed",
            PurgeEvent::DatabaseRebuilt { .. } => "database_rebuilt",
            PurgeEvent::Repacked { .. } => "repacked",
        }
    }

    /// Whether no further events will follow for this purge request.
    pub fn is_terminal(&self) -> bool {
        match self {
            PurgeEvent::PurgeProgress { finished, .. } => *finished,
            PurgeEvent::PurgeRetrying { .. } => false,
            PurgeEvent::PurgeFailed { .. }
            | PurgeEvent::DatabaseRebuilt { .. }
            | PurgeEvent::Repacked { .. } => true,
        }
    }
}

/// Central bus for purge events.
///
/// Clones share the same broadcast channel and counters.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PurgeEvent>,
    events_published: Arc<AtomicU64>,
    events_dropped: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the default channel capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with a custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event; with no
    /// subscribers the event is dropped.
    pub fn publish(&self, event: PurgeEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    /// Subscribe to events published from now on.
    ///
    /// A receiver that falls behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<PurgeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Get the number of events dropped (no subscribers).
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Read events until every sender is gone, passing each to `on_event`.
///
/// Events lost to lagging are skipped. Returns whether any purge was
/// abandoned.
pub async fn follow_until_closed(
    mut rx: broadcast::Receiver<PurgeEvent>,
    mut on_event: impl FnMut(&PurgeEvent),
) -> bool {
    let mut failed = false;
    loop {
        match rx.recv().await {
            Ok(event) => {
                failed |= matches!(event, PurgeEvent::PurgeFailed { .. });
                on_event(&event);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Purge event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(finished: bool) -> PurgeEvent {
        PurgeEvent::PurgeProgress {
            kind: PurgeKind::OldData,
            timestamp: Utc::now(),
            finished,
            states_deleted: 2,
            events_deleted: 2,
            runs_deleted: 0,
        }
    }

    #[test]
    fn test_terminal_events() {
        assert!(progress(true).is_terminal());
        assert!(!progress(false).is_terminal());
        assert!(
            !PurgeEvent::PurgeRetrying {
                kind: PurgeKind::Entities,
                timestamp: Utc::now(),
                attempt: 1,
                error: "database is locked".into(),
            }
            .is_terminal()
        );
        assert!(
            PurgeEvent::PurgeFailed {
                kind: PurgeKind::Entities,
                timestamp: Utc::now(),
                error: "boom".into(),
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(progress(true)), 0);
        assert_eq!(bus.events_published(), 1);
        assert_eq!(bus.events_dropped(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_and_receive() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        assert_eq!(bus.publish(progress(false)), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "purge_progress");
        assert_eq!(bus.events_dropped(), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_channel_and_counters() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(progress(true));
        assert!(rx.recv().await.unwrap().is_terminal());
        assert_eq!(bus.events_published(), 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::with_capacity(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.publish(progress(false));
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }

    #[tokio::test]
    async fn test_follow_sees_failure_after_lagging() {
        let bus = EventBus::with_capacity(4);
        let rx = bus.subscribe();
        for _ in 0..300 {
            bus.publish(progress(false));
        }
        bus.publish(PurgeEvent::PurgeFailed {
            kind: PurgeKind::OldData,
            timestamp: Utc::now(),
            error: "no such table: states".into(),
        });
        drop(bus);

        let mut seen = 0;
        assert!(follow_until_closed(rx, |_| seen += 1).await);
        assert_eq!(seen, 4);
    }

    #[tokio::test]
    async fn test_follow_without_failure() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let follower = tokio::spawn(follow_until_closed(rx, |_| {}));
        bus.publish(progress(false));
        bus.publish(progress(true));
        drop(bus);

        assert!(!follower.await.unwrap());
    }

    #[test]
    fn test_serialization_tag() {
        let json = serde_json::to_value(PurgeEvent::Repacked {
            timestamp: Utc::now(),
            success: true,
        })
        .unwrap();
        assert_eq!(json["event_type"], "repacked");
        assert_eq!(
            serde_json::to_value(PurgeKind::OldData).unwrap(),
            "old_data"
        );
    }
}
