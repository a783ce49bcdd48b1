//! Payloads of the `purge` and `purge_entities` services.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use super::task::{PurgeEntitiesTask, PurgeTask};
use crate::{
    filter::GlobSet,
    models::{valid_domain, valid_entity_id},
};

pub const SERVICE_PURGE: &str = "purge";
pub const SERVICE_PURGE_ENTITIES: &str = "purge_entities";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown recorder service: {0}")]
    UnknownService(String),

    #[error("Invalid service data: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("keep_days must be zero or greater, got {0}")]
    InvalidKeepDays(i64),

    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid entity glob: {0}")]
    InvalidGlob(String),

    #[error("Recorder is not running")]
    RecorderStopped,
}

/// `recorder.purge`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeServiceData {
    /// Days of history to keep. Defaults to `purge.keep_days`.
    #[serde(default)]
    pub keep_days: Option<i64>,
    #[serde(default)]
    pub repack: bool,
    #[serde(default)]
    pub apply_filter: bool,
}

impl PurgeServiceData {
    pub fn into_task(self, default_keep_days: u32, now: DateTime<Utc>) -> Result<PurgeTask, ServiceError> {
        let keep_days = self.keep_days.unwrap_or(i64::from(default_keep_days));
        if keep_days < 0 {
            return Err(ServiceError::InvalidKeepDays(keep_days));
        }
        let cutoff = keep_days_cutoff(now, keep_days);
        Ok(PurgeTask::new(cutoff, self.repack, self.apply_filter))
    }
}

/// `now - keep_days`, clamped to the earliest representable time.
pub(crate) fn keep_days_cutoff(now: DateTime<Utc>, keep_days: i64) -> DateTime<Utc> {
    Duration::try_days(keep_days)
        .and_then(|keep| now.checked_sub_signed(keep))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `recorder.purge_entities`
///
/// Each selector accepts a single string or a list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurgeEntitiesServiceData {
    #[serde(default, alias = "entity_ids", deserialize_with = "one_or_many")]
    pub entity_id: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub domains: Vec<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub entity_globs: Vec<String>,
}

impl PurgeEntitiesServiceData {
    pub fn into_task(self) -> Result<PurgeEntitiesTask, ServiceError> {
        if let Some(bad) = self.entity_id.iter().find(|id| !valid_entity_id(id)) {
            return Err(ServiceError::InvalidEntityId(bad.clone()));
        }
        if let Some(bad) = self.domains.iter().find(|d| !valid_domain(d)) {
            return Err(ServiceError::InvalidDomain(bad.clone()));
        }
        GlobSet::new(&self.entity_globs).map_err(|e| ServiceError::InvalidGlob(e.to_string()))?;

        let task = PurgeEntitiesTask {
            entity_ids: self.entity_id,
            domains: self.domains,
            entity_globs: self.entity_globs,
            attempt: 0,
        };
        if task.is_unfiltered() {
            tracing::warn!("purge_entities called without selectors, all entity history will be purged");
        }
        Ok(task)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
    })
}
