//! Recorder include/exclude filter configuration.
//!
//! # Example
//!
//! ```toml
//! [filter.include]
//! domains = ["sensor", "light"]
//!
//! [filter.exclude]
//! entities = ["sensor.noisy"]
//! entity_globs = ["sensor.*_rssi"]
//! event_types = ["call_service"]
//! ```

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Include and exclude rule sets applied by a filtered purge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    #[serde(default)]
    pub include: FilterRules,

    #[serde(default)]
    pub exclude: FilterRules,
}

/// One side of the filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRules {
    /// Exact entity ids, e.g. `sensor.kitchen_temperature`.
    #[serde(default)]
    pub entities: Vec<String>,

    /// Entity domains, e.g. `sensor`.
    #[serde(default)]
    pub domains: Vec<String>,

    /// Entity id globs using `*` and `?`.
    #[serde(default)]
    pub entity_globs: Vec<String>,

    /// Event types.
    #[serde(default)]
    pub event_types: Vec<String>,
}

impl FilterRules {
    /// True if no entity rule is configured. Event types are not counted.
    pub fn has_no_entity_rules(&self) -> bool {
        self.entities.is_empty() && self.domains.is_empty() && self.entity_globs.is_empty()
    }
}

impl FilterConfig {
    pub fn is_empty(&self) -> bool {
        self.include.has_no_entity_rules()
            && self.exclude.has_no_entity_rules()
            && self.include.event_types.is_empty()
            && self.exclude.event_types.is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        crate::filter::EntityFilter::from_config(self)
            .map(|_| ())
            .map_err(|e| ConfigError::Validation(format!("filter: {e}")))
    }
}
