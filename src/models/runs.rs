use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recorder session. The run with no `end` belongs to the live process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderRun {
    pub run_id: i64,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    /// Set when the run was found open at startup and closed by the next
    /// process instead of by its own shutdown.
    pub closed_incorrect: bool,
    pub created: DateTime<Utc>,
}

impl RecorderRun {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A run row to insert, used for imports and historical backfill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecorderRun {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_incorrect: bool,
    pub created: DateTime<Utc>,
}

impl NewRecorderRun {
    pub fn closed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end: Some(end),
            closed_incorrect: false,
            created: start,
        }
    }
}
