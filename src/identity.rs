use crate::def::ActorName;
use log::*;
use std::collections::HashMap;

/// Resolves actor ids to display names. Overrides (operator-supplied renames
/// and merges) always win; otherwise the last observed name is used; an actor
/// never seen resolves to a deterministic fallback, never an empty string.
///
/// `resolve` is read-only. The observed table only changes through `observe`,
/// called once per newly merged record, so concurrent readers see a stable
/// view for the whole run.
pub struct IdentityResolver {
    observed: HashMap<u64, String>,
    overrides: HashMap<u64, String>,
    sentinel: String,
}

impl IdentityResolver {
    pub fn new(overrides: HashMap<u64, String>, sentinel: impl Into<String>) -> Self {
        Self {
            observed: HashMap::new(),
            overrides,
            sentinel: sentinel.into(),
        }
    }

    /// Replays persisted observations in their stored (merge) order,
    /// last-observed-name-wins.
    pub fn seed(&mut self, actors: &[ActorName]) {
        for actor in actors {
            self.observe(actor.actor_id, &actor.display_name);
        }
        debug!("identity resolver seeded with {} actors", self.observed.len());
    }

    pub fn resolve(&self, actor_id: u64) -> String {
        if let Some(name) = self.overrides.get(&actor_id) {
            return name.clone();
        }
        if let Some(name) = self.observed.get(&actor_id) {
            return name.clone();
        }
        format!("user-{}", actor_id)
    }

    /// Records a newly observed display name. Empty names and the
    /// deleted-account sentinel are ignored so a previously known name is
    /// never replaced by a worse one.
    pub fn observe(&mut self, actor_id: u64, display_name: &str) {
        let trimmed = display_name.trim();
        if trimmed.is_empty() || trimmed == self.sentinel {
            return;
        }
        self.observed.insert(actor_id, trimmed.to_string());
    }

    /// Observed table in a stable order, for persisting with the snapshot.
    pub fn export(&self) -> Vec<ActorName> {
        let mut actors: Vec<ActorName> = self
            .observed
            .iter()
            .map(|(actor_id, display_name)| ActorName {
                actor_id: *actor_id,
                display_name: display_name.clone(),
            })
            .collect();
        actors.sort_by_key(|a| a.actor_id);
        actors
    }
}
