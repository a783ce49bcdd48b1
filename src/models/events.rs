use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event type written alongside every state change.
pub const EVENT_STATE_CHANGED: &str = "state_changed";

/// Where an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventOrigin {
    #[default]
    Local,
    Remote,
}

impl EventOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOrigin::Local => "LOCAL",
            EventOrigin::Remote => "REMOTE",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("remote") {
            EventOrigin::Remote
        } else {
            EventOrigin::Local
        }
    }
}

/// A persisted event row. Events are immutable once written and are only
/// ever removed by a purge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: i64,
    pub event_type: String,
    /// Opaque JSON payload; the purge engine never decodes it.
    pub event_data: Option<String>,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

/// An event waiting to be written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub event_data: Option<String>,
    #[serde(default)]
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

impl NewEvent {
    /// Build an event fired and recorded at `at`.
    pub fn new(event_type: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            event_type: event_type.into(),
            event_data: None,
            origin: EventOrigin::Local,
            time_fired: at,
            created: at,
        }
    }

    /// The `state_changed` event that accompanies a state row.
    pub fn state_changed(at: DateTime<Utc>) -> Self {
        Self::new(EVENT_STATE_CHANGED, at)
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.event_data = Some(data.into());
        self
    }
}
