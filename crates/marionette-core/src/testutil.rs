//! Shared test doubles: a hand-driven world handle and a map-backed engine.
//!
//! Only compiled for unit tests. Integration tests use the real
//! single-threaded worlds from `marionette-sim` instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use contracts::{ActorTypeId, AttackKind, DirectorConfig, Vec3, WorldName};

use crate::engine::{
    EntityId, EntityKind, MarkerSpec, RoleIndex, RoleState, SimulationEngine, SubmitError,
    WorldAccess, WorldHandle, WorldTask,
};

// ---------------------------------------------------------------------------
// FakeWorld
// ---------------------------------------------------------------------------

/// World handle that either runs tasks inline against a bare access, or
/// stalls by storing them unrun.
pub(crate) struct FakeWorld {
    name: WorldName,
    closed: AtomicBool,
    run_inline: AtomicBool,
    stored: Mutex<Vec<WorldTask>>,
}

impl FakeWorld {
    pub(crate) fn responsive(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: WorldName::new(name),
            closed: AtomicBool::new(false),
            run_inline: AtomicBool::new(true),
            stored: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn stalled(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: WorldName::new(name),
            closed: AtomicBool::new(false),
            run_inline: AtomicBool::new(false),
            stored: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Unjam a stalled world: run everything queued, answer inline from here.
    pub(crate) fn answer_from_now_on(&self) {
        self.run_inline.store(true, Ordering::SeqCst);
        let backlog: Vec<WorldTask> = std::mem::take(&mut *self.stored.lock().unwrap());
        let mut access = BareAccess {
            name: self.name.clone(),
        };
        for task in backlog {
            task(&mut access);
        }
    }

    /// Destroy the queue the way a torn-down context would: tasks drop unrun.
    pub(crate) fn drop_queued(&self) {
        self.stored.lock().unwrap().clear();
    }

    pub(crate) fn queued(&self) -> usize {
        self.stored.lock().unwrap().len()
    }
}

impl WorldHandle for FakeWorld {
    fn name(&self) -> &WorldName {
        &self.name
    }

    fn submit(&self, task: WorldTask) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }
        if self.run_inline.load(Ordering::SeqCst) {
            let mut access = BareAccess {
                name: self.name.clone(),
            };
            task(&mut access);
        } else {
            self.stored.lock().unwrap().push(task);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BareAccess
// ---------------------------------------------------------------------------

/// Entity-free access: every handle is stale, every spawn yields entity 0.
/// Enough for code paths that only touch the world name or bookkeeping.
pub(crate) struct BareAccess {
    pub(crate) name: WorldName,
}

impl WorldAccess for BareAccess {
    fn world_name(&self) -> &WorldName {
        &self.name
    }
    fn entity_valid(&self, _: EntityId) -> bool {
        false
    }
    fn position(&self, _: EntityId) -> Option<Vec3> {
        None
    }
    fn set_position(&mut self, _: EntityId, _: Vec3) {}
    fn heading(&self, _: EntityId) -> Option<f64> {
        None
    }
    fn set_heading(&mut self, _: EntityId, _: f64) {}
    fn spawn_actor(&mut self, _: RoleIndex, _: &ActorTypeId, _: &str, _: Vec3) -> EntityId {
        EntityId(0)
    }
    fn spawn_marker(&mut self, _: MarkerSpec) -> EntityId {
        EntityId(0)
    }
    fn remove_entity(&mut self, _: EntityId) -> bool {
        false
    }
    fn set_label_text(&mut self, _: EntityId, _: &str) {}
    fn role_state(&self, _: EntityId) -> Option<RoleState> {
        None
    }
    fn set_role_state(&mut self, _: EntityId, _: RoleState) {}
    fn interaction_target(&self, _: EntityId) -> Option<EntityId> {
        None
    }
    fn set_interaction_target(&mut self, _: EntityId, _: Option<EntityId>) {}
    fn set_attack_override(&mut self, _: EntityId, _: Option<AttackKind>) {}
    fn set_invulnerable(&mut self, _: EntityId, _: bool) {}
    fn set_knockback_immune(&mut self, _: EntityId, _: bool) {}
    fn find_player(&self, _: &str) -> Option<EntityId> {
        None
    }
    fn entities(&self) -> Vec<EntityId> {
        Vec::new()
    }
    fn classify(&self, _: EntityId) -> EntityKind {
        EntityKind::Unknown
    }
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

pub(crate) struct FakeEngine {
    worlds: HashMap<WorldName, Arc<FakeWorld>>,
    role: Option<RoleIndex>,
}

impl FakeEngine {
    pub(crate) fn with_worlds(names: &[&str]) -> Arc<Self> {
        let worlds = names
            .iter()
            .map(|n| (WorldName::new(*n), FakeWorld::responsive(n)))
            .collect();
        Arc::new(Self { worlds, role: None })
    }

    /// Like [`with_worlds`](Self::with_worlds), but every actor type maps to
    /// `role` so spawn paths get past the catalog lookup.
    pub(crate) fn with_spawnable_worlds(names: &[&str], role: RoleIndex) -> Arc<Self> {
        let worlds = names
            .iter()
            .map(|n| (WorldName::new(*n), FakeWorld::responsive(n)))
            .collect();
        Arc::new(Self {
            worlds,
            role: Some(role),
        })
    }

    /// Spawnable worlds that start stalled, for tests that need a wedged
    /// queue before the first command.
    pub(crate) fn with_stalled_spawnable_worlds(names: &[&str], role: RoleIndex) -> Arc<Self> {
        let worlds = names
            .iter()
            .map(|n| (WorldName::new(*n), FakeWorld::stalled(n)))
            .collect();
        Arc::new(Self {
            worlds,
            role: Some(role),
        })
    }

    /// The raw double behind one world, for closing and unjamming.
    pub(crate) fn world_double(&self, name: &str) -> Arc<FakeWorld> {
        Arc::clone(&self.worlds[&WorldName::new(name)])
    }
}

impl SimulationEngine for FakeEngine {
    fn world_names(&self) -> Vec<WorldName> {
        self.worlds.keys().cloned().collect()
    }
    fn world(&self, name: &WorldName) -> Option<Arc<dyn WorldHandle>> {
        self.worlds
            .get(name)
            .map(|w| Arc::clone(w) as Arc<dyn WorldHandle>)
    }
    fn role_index(&self, _: &ActorTypeId) -> Option<RoleIndex> {
        self.role
    }
}

/// Short waits so breaker and timeout tests finish quickly.
pub(crate) fn quick_config() -> DirectorConfig {
    DirectorConfig {
        sync_read_timeout_ms: 40,
        breaker_trip_threshold: 2,
        ..DirectorConfig::default()
    }
}
