//! Entity and event-type filtering.
//!
//! [`EntityFilter`] decides which entities the recorder keeps history for,
//! using the usual include/exclude rules over entity ids, domains and globs.
//! [`EntitySelection`] is the simpler "does this entity match any selector"
//! predicate behind purge-by-entity requests.

mod glob;

use std::collections::HashSet;

pub use glob::GlobSet;
use thiserror::Error;

use crate::{
    config::{FilterConfig, FilterRules},
    models::{EVENT_STATE_CHANGED, entity_domain, valid_domain, valid_entity_id},
};

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Invalid entity glob: {0}")]
    InvalidGlob(#[from] regex::Error),

    #[error("Invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),
}

/// Decides whether rows are eligible for filtered deletion.
///
/// `true` means "keep recording this"; the purge engine deletes history for
/// anything that returns `false`.
pub trait PurgeFilter: Send + Sync {
    fn include_entity(&self, entity_id: &str) -> bool;

    /// Whether any entity could be rejected. Lets a filtered purge skip the
    /// scan of distinct entity ids.
    fn has_entity_rules(&self) -> bool {
        true
    }

    fn include_event_type(&self, event_type: &str) -> bool {
        let _ = event_type;
        true
    }
}

#[derive(Debug, Clone, Default)]
struct RuleSet {
    entities: HashSet<String>,
    domains: HashSet<String>,
    globs: Option<GlobSet>,
    event_types: HashSet<String>,
}

impl RuleSet {
    fn from_rules(rules: &FilterRules) -> Result<Self, FilterError> {
        if let Some(bad) = rules.entities.iter().find(|e| !valid_entity_id(e)) {
            return Err(FilterError::InvalidEntityId(bad.clone()));
        }
        if let Some(bad) = rules.domains.iter().find(|d| !valid_domain(d)) {
            return Err(FilterError::InvalidDomain(bad.clone()));
        }
        Ok(Self {
            entities: rules.entities.iter().cloned().collect(),
            domains: rules.domains.iter().cloned().collect(),
            globs: GlobSet::new(&rules.entity_globs)?,
            event_types: rules.event_types.iter().cloned().collect(),
        })
    }

    fn has_domains_or_globs(&self) -> bool {
        !self.domains.is_empty() || self.globs.is_some()
    }

    fn has_entity_rules(&self) -> bool {
        !self.entities.is_empty() || self.has_domains_or_globs()
    }

    fn glob_match(&self, entity_id: &str) -> bool {
        self.globs.as_ref().is_some_and(|g| g.is_match(entity_id))
    }

    /// Matches by exact id, domain or glob.
    fn matches(&self, entity_id: &str) -> bool {
        self.entities.contains(entity_id)
            || self.domains.contains(entity_domain(entity_id))
            || self.glob_match(entity_id)
    }
}

/// Include/exclude filter over entities and event types.
///
/// Entity rules are evaluated as follows:
///
/// 1. No rules: everything is included.
/// 2. Only includes: included when matched by id, domain or glob.
/// 3. Only excludes: included unless matched by id, domain or glob.
/// 4. Include domains or globs present: an explicitly included id wins, an
///    explicitly excluded id loses, then an include glob wins, then an
///    included domain wins unless an exclude glob matches.
/// 5. Exclude domains or globs with only id includes: an explicitly included
///    id wins, otherwise included unless excluded.
/// 6. Only id includes and excludes: included only when explicitly listed.
///
/// Event types are included unless listed under `exclude`; a non-empty
/// `include` list restricts everything except `state_changed`, whose rows are
/// governed by the entity rules.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    include: RuleSet,
    exclude: RuleSet,
}

impl EntityFilter {
    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        Ok(Self {
            include: RuleSet::from_rules(&config.include)?,
            exclude: RuleSet::from_rules(&config.exclude)?,
        })
    }

    /// A filter with no rules at all.
    pub fn allow_all() -> Self {
        Self::default()
    }
}

impl PurgeFilter for EntityFilter {
    fn has_entity_rules(&self) -> bool {
        self.include.has_entity_rules() || self.exclude.has_entity_rules()
    }

    fn include_entity(&self, entity_id: &str) -> bool {
        let include = &self.include;
        let exclude = &self.exclude;
        let have_include = include.has_entity_rules();
        let have_exclude = exclude.has_entity_rules();

        if !have_include && !have_exclude {
            return true;
        }

        if have_include && !have_exclude {
            return include.matches(entity_id);
        }

        if !have_include && have_exclude {
            return !exclude.matches(entity_id);
        }

        if include.has_domains_or_globs() {
            return include.entities.contains(entity_id)
                || (!exclude.entities.contains(entity_id)
                    && (include.glob_match(entity_id)
                        || (include.domains.contains(entity_domain(entity_id))
                            && !exclude.glob_match(entity_id))));
        }

        if exclude.has_domains_or_globs() {
            return include.entities.contains(entity_id) || !exclude.matches(entity_id);
        }

        include.entities.contains(entity_id)
    }

    fn include_event_type(&self, event_type: &str) -> bool {
        if self.exclude.event_types.contains(event_type) {
            return false;
        }
        self.include.event_types.is_empty()
            || event_type == EVENT_STATE_CHANGED
            || self.include.event_types.contains(event_type)
    }
}

/// Selector set of a purge-by-entity request.
///
/// An entity matches when its id is listed, its domain is listed, or a glob
/// matches it. A selection with no selectors at all matches every entity.
#[derive(Debug, Clone, Default)]
pub struct EntitySelection {
    entity_ids: HashSet<String>,
    domains: HashSet<String>,
    globs: Option<GlobSet>,
}

impl EntitySelection {
    pub fn new(
        entity_ids: &[String],
        domains: &[String],
        entity_globs: &[String],
    ) -> Result<Self, FilterError> {
        Ok(Self {
            entity_ids: entity_ids.iter().cloned().collect(),
            domains: domains.iter().cloned().collect(),
            globs: GlobSet::new(entity_globs)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty() && self.domains.is_empty() && self.globs.is_none()
    }

    pub fn matches(&self, entity_id: &str) -> bool {
        if self.is_empty() {
            return true;
        }
        self.entity_ids.contains(entity_id)
            || self.domains.contains(entity_domain(entity_id))
            || self.globs.as_ref().is_some_and(|g| g.is_match(entity_id))
    }
}
