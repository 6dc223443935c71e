//! Presence registry — one state channel per tracked entity

use dashmap::DashMap;
use flowstate_core::{Disturbance, EntityId, Error, Presence, Result, StateChannel};
use tracing::{debug, info};

pub struct PresenceRegistry {
    presences: DashMap<EntityId, StateChannel<Presence>>,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            presences: DashMap::new(),
        }
    }

    /// Start tracking `id` with default resonance and protection.
    /// Re-entering an existing id replaces its channel; subscribers of the
    /// old channel stop receiving updates.
    pub fn enter(&self, id: impl Into<EntityId>, context: impl Into<String>) {
        let id = id.into();
        let presence = Presence::new(id.clone(), context);
        info!("Presence {} entered ({})", id, presence.spatial_context);
        if self.presences.insert(id.clone(), StateChannel::with_value(presence)).is_some() {
            debug!("Presence {} re-entered, previous channel replaced", id);
        }
    }

    /// The entity's channel. Subscribing replays the current presence.
    pub fn observe(&self, id: &EntityId) -> Result<StateChannel<Presence>> {
        // Clone out of the map so no shard lock is held while observers run.
        self.presences
            .get(id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::presence_not_found(id.as_str()))
    }

    pub fn current(&self, id: &EntityId) -> Result<Presence> {
        self.observe(id)?
            .current_value()
            .ok_or_else(|| Error::presence_not_found(id.as_str()))
    }

    /// `true` when the disturbance breaks through the entity's protection.
    /// Evaluation only; the presence is not modified.
    pub fn handle_disturbance(&self, id: &EntityId, disturbance: &Disturbance) -> Result<bool> {
        let presence = self.current(id)?;
        let breaks = disturbance.intensity > presence.protection.strength;
        debug!(
            "Disturbance {} from {} on {}: intensity {:.2} vs strength {:.2} -> {}",
            disturbance.kind,
            disturbance.source,
            id,
            disturbance.intensity,
            presence.protection.strength,
            if breaks { "breakthrough" } else { "absorbed" }
        );
        Ok(breaks)
    }

    /// Mutate a presence in place and republish it. Unit-interval fields are
    /// clamped after `f` runs; the id is restored if `f` changed it.
    pub fn update<F>(&self, id: &EntityId, f: F) -> Result<Presence>
    where
        F: FnOnce(&mut Presence),
    {
        let channel = self.observe(id)?;
        let mut presence = channel
            .current_value()
            .ok_or_else(|| Error::presence_not_found(id.as_str()))?;
        f(&mut presence);
        presence.id = id.clone();
        presence.clamp();
        channel.publish(presence.clone());
        Ok(presence)
    }

    /// Stop tracking `id`. Returns whether it was tracked.
    pub fn remove(&self, id: &EntityId) -> bool {
        let removed = self.presences.remove(id).is_some();
        if removed {
            info!("Presence {} removed", id);
        }
        removed
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.presences.contains_key(id)
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.presences.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.presences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presences.is_empty()
    }
}
