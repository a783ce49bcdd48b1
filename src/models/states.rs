use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity_domain;

/// A persisted state row.
///
/// `old_state_id` links to the row this one superseded. Purge nulls the link
/// before deleting the referenced row, so a live link always resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub state_id: i64,
    pub entity_id: String,
    pub domain: String,
    pub state: String,
    /// Opaque JSON attributes; the purge engine never decodes them.
    pub attributes: Option<String>,
    pub event_id: Option<i64>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created: DateTime<Utc>,
    pub old_state_id: Option<i64>,
}

/// A state waiting to be written.
///
/// `old_state_id` is filled in by the recorder worker from its last-state
/// cache; callers normally leave it unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewState {
    pub entity_id: String,
    pub domain: String,
    pub state: String,
    pub attributes: Option<String>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub old_state_id: Option<i64>,
}

impl NewState {
    /// Build a state changed and recorded at `at`. The domain is taken from
    /// the entity id.
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>, at: DateTime<Utc>) -> Self {
        let entity_id = entity_id.into();
        Self {
            domain: entity_domain(&entity_id).to_string(),
            entity_id,
            state: state.into(),
            attributes: None,
            last_changed: at,
            last_updated: at,
            created: at,
            old_state_id: None,
        }
    }

    pub fn with_attributes(mut self, attributes: impl Into<String>) -> Self {
        self.attributes = Some(attributes.into());
        self
    }
}

/// Row ids assigned by a single `record` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recorded {
    pub event_id: i64,
    pub state_id: Option<i64>,
}
