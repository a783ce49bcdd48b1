use std::collections::{HashMap, HashSet};

use crate::models::RecorderRun;

/// State owned by the recorder worker and lent to the purge engine.
///
/// Holds the current run and the last recorded state id per entity, which the
/// ingestion path uses to fill in `old_state_id` on the next state.
#[derive(Debug, Clone)]
pub struct RecorderContext {
    run: RecorderRun,
    old_states: HashMap<String, i64>,
}

impl RecorderContext {
    pub fn new(run: RecorderRun) -> Self {
        Self {
            run,
            old_states: HashMap::new(),
        }
    }

    pub fn run(&self) -> &RecorderRun {
        &self.run
    }

    pub fn run_id(&self) -> i64 {
        self.run.run_id
    }

    /// Replace the current run, e.g. after the store was rebuilt.
    pub fn set_run(&mut self, run: RecorderRun) {
        self.run = run;
    }

    /// Last recorded state id of `entity_id`.
    pub fn old_state_id(&self, entity_id: &str) -> Option<i64> {
        self.old_states.get(entity_id).copied()
    }

    pub fn remember_state(&mut self, entity_id: &str, state_id: i64) {
        self.old_states.insert(entity_id.to_string(), state_id);
    }

    /// Drop cache entries that point at purged rows, so the next state of
    /// those entities is not linked to a deleted row.
    pub fn evict_purged_states(&mut self, purged_state_ids: &[i64]) -> usize {
        if purged_state_ids.is_empty() || self.old_states.is_empty() {
            return 0;
        }
        let purged: HashSet<i64> = purged_state_ids.iter().copied().collect();
        let before = self.old_states.len();
        self.old_states.retain(|_, state_id| !purged.contains(state_id));
        before - self.old_states.len()
    }

    pub fn clear_cache(&mut self) {
        self.old_states.clear();
    }

    pub fn cached_entities(&self) -> usize {
        self.old_states.len()
    }
}
