//! Single source of truth for tracked actors, plus the per-type ledgers
//! (first spawn point, latest behavior data) and the busy set.
//!
//! Records are immutable snapshots behind `Arc`; any state change replaces
//! the whole record under the same instance id. Readers holding an old
//! `Arc` see a consistent view, never a half-updated one.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::debug;

use contracts::{ActorId, ActorTypeId, BehaviorProfile, Location, WorldName};

use crate::engine::EntityId;

/// Everything the director knows about one tracked actor.
#[derive(Debug, Clone)]
pub struct ActorRecord {
    pub instance_id: ActorId,
    pub type_id: ActorTypeId,
    pub entity: EntityId,
    pub world: WorldName,
    pub behavior: BehaviorProfile,
    /// Where this instance first entered the world. Respawns reuse it.
    pub spawn: Location,
}

pub struct ActorRegistry {
    records: DashMap<ActorId, Arc<ActorRecord>>,
    /// First recorded spawn location per type. Insert-once: later spawns of
    /// the same type do not move the respawn anchor.
    spawn_points: DashMap<ActorTypeId, Location>,
    /// Latest behavior data per type, reapplied on respawn.
    behaviors: DashMap<ActorTypeId, BehaviorProfile>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            spawn_points: DashMap::new(),
            behaviors: DashMap::new(),
        }
    }

    /// Insert or replace the record for its instance id and update the
    /// per-type ledgers. Returns the shared record.
    pub fn register(&self, record: ActorRecord) -> Arc<ActorRecord> {
        self.spawn_points
            .entry(record.type_id.clone())
            .or_insert_with(|| record.spawn.clone());
        self.behaviors
            .insert(record.type_id.clone(), record.behavior.clone());

        let record = Arc::new(record);
        self.records.insert(record.instance_id, Arc::clone(&record));
        debug!(
            actor = %record.instance_id,
            type_id = %record.type_id,
            world = %record.world,
            entity = %record.entity,
            "actor registered"
        );
        record
    }

    pub fn get(&self, id: &ActorId) -> Option<Arc<ActorRecord>> {
        self.records.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.records.contains_key(id)
    }

    pub fn remove(&self, id: &ActorId) -> Option<Arc<ActorRecord>> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Records whose type matches, in no particular order.
    pub fn of_type(&self, type_id: &ActorTypeId) -> Vec<Arc<ActorRecord>> {
        self.records
            .iter()
            .filter(|entry| &entry.value().type_id == type_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Reverse lookup from an engine entity handle in one world.
    pub fn by_entity(&self, world: &WorldName, entity: EntityId) -> Option<Arc<ActorRecord>> {
        self.records
            .iter()
            .find(|entry| entry.value().entity == entity && &entry.value().world == world)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Indicator and sweep bookkeeping need every record of every type.
    pub fn all(&self) -> Vec<Arc<ActorRecord>> {
        self.records
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn spawn_point(&self, type_id: &ActorTypeId) -> Option<Location> {
        self.spawn_points.get(type_id).map(|entry| entry.clone())
    }

    pub fn behavior_of(&self, type_id: &ActorTypeId) -> Option<BehaviorProfile> {
        self.behaviors.get(type_id).map(|entry| entry.clone())
    }

    /// Teardown: forget every record and both ledgers.
    pub fn clear_all(&self) {
        self.records.clear();
        self.spawn_points.clear();
        self.behaviors.clear();
    }
}

impl Default for ActorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Busy set
// ---------------------------------------------------------------------------

/// Actors currently owned by an exclusive protocol (movement, follow,
/// attack). Purely advisory: reads never block.
#[derive(Debug, Default)]
pub struct BusySet {
    busy: DashSet<ActorId>,
}

impl BusySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the actor was already marked.
    pub fn mark(&self, id: ActorId) -> bool {
        self.busy.insert(id)
    }

    /// Returns true if the actor had been marked.
    pub fn clear(&self, id: &ActorId) -> bool {
        self.busy.remove(id).is_some()
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.busy.contains(id)
    }

    pub fn len(&self) -> usize {
        self.busy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.busy.is_empty()
    }

    pub fn clear_all(&self) {
        self.busy.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Vec3;

    fn record(type_id: &str, world: &str, entity: u64) -> ActorRecord {
        ActorRecord {
            instance_id: ActorId::fresh(),
            type_id: ActorTypeId::new(type_id),
            entity: EntityId(entity),
            world: WorldName::new(world),
            behavior: BehaviorProfile::named(type_id),
            spawn: Location::new(WorldName::new(world), Vec3::new(1.0, 0.0, 1.0)),
        }
    }

    #[test]
    fn register_get_remove_round_trip() {
        let registry = ActorRegistry::new();
        let rec = registry.register(record("goblin_scout", "overworld", 7));

        let found = registry.get(&rec.instance_id).unwrap();
        assert_eq!(found.entity, EntityId(7));
        assert_eq!(found.type_id.as_str(), "goblin_scout");

        let removed = registry.remove(&rec.instance_id).unwrap();
        assert_eq!(removed.instance_id, rec.instance_id);
        assert!(registry.get(&rec.instance_id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistering_same_id_replaces_the_record() {
        let registry = ActorRegistry::new();
        let first = registry.register(record("goblin_scout", "overworld", 7));

        let mut replacement = (*first).clone();
        replacement.entity = EntityId(99);
        registry.register(replacement);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&first.instance_id).unwrap().entity, EntityId(99));
    }

    #[test]
    fn spawn_point_keeps_the_first_location() {
        let registry = ActorRegistry::new();
        registry.register(record("goblin_scout", "overworld", 1));

        let mut second = record("goblin_scout", "overworld", 2);
        second.spawn = Location::new(WorldName::new("overworld"), Vec3::new(50.0, 0.0, 50.0));
        registry.register(second);

        let anchor = registry.spawn_point(&ActorTypeId::new("goblin_scout")).unwrap();
        assert_eq!(anchor.pos, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn behavior_ledger_keeps_the_latest_profile() {
        let registry = ActorRegistry::new();
        registry.register(record("guide", "overworld", 1));

        let mut updated = record("guide", "overworld", 2);
        updated.behavior.invulnerable = false;
        registry.register(updated);

        let behavior = registry.behavior_of(&ActorTypeId::new("guide")).unwrap();
        assert!(!behavior.invulnerable);
    }

    #[test]
    fn of_type_and_by_entity_lookups() {
        let registry = ActorRegistry::new();
        let goblin = registry.register(record("goblin_scout", "overworld", 1));
        registry.register(record("guide", "overworld", 2));
        registry.register(record("goblin_scout", "nether", 3));

        let goblins = registry.of_type(&ActorTypeId::new("goblin_scout"));
        assert_eq!(goblins.len(), 2);

        let found = registry
            .by_entity(&WorldName::new("overworld"), EntityId(1))
            .unwrap();
        assert_eq!(found.instance_id, goblin.instance_id);

        // Same entity number in a different world is a different actor.
        assert!(registry
            .by_entity(&WorldName::new("nether"), EntityId(1))
            .is_none());
    }

    #[test]
    fn clear_all_wipes_records_and_ledgers() {
        let registry = ActorRegistry::new();
        registry.register(record("goblin_scout", "overworld", 1));
        registry.clear_all();

        assert!(registry.is_empty());
        assert!(registry.spawn_point(&ActorTypeId::new("goblin_scout")).is_none());
        assert!(registry.behavior_of(&ActorTypeId::new("goblin_scout")).is_none());
    }

    #[test]
    fn busy_set_marks_and_clears() {
        let busy = BusySet::new();
        let id = ActorId::fresh();

        assert!(busy.mark(id));
        assert!(!busy.mark(id), "double mark reports already busy");
        assert!(busy.contains(&id));

        assert!(busy.clear(&id));
        assert!(!busy.clear(&id));
        assert!(busy.is_empty());
    }
}
