//! Boundary traits for the simulation engine: worlds as exclusive
//! single-threaded execution contexts, and the entity operations available
//! from inside one.
//!
//! The director never touches entities directly. Every mutation and every
//! read crosses [`WorldHandle::submit`] as a boxed task, which the engine
//! runs on the owning world's thread in submission order.

use std::fmt;
use std::sync::Arc;

use contracts::{ActorTypeId, AttackKind, Vec3, WorldName};

// ---------------------------------------------------------------------------
// Entity handles and classification
// ---------------------------------------------------------------------------

/// Opaque engine handle for one live entity. Handles go stale whenever the
/// engine despawns the entity; validity is re-checked at use, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

/// Engine-side behavior state of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleState {
    Idle,
    Wander,
    Follow,
    Attack,
}

impl RoleState {
    /// States in which some protocol owns the actor's attention. Rotation
    /// backs off while an actor is engaged.
    pub fn is_engaged(self) -> bool {
        matches!(self, RoleState::Follow | RoleState::Attack)
    }
}

/// What a scanned entity turned out to be. Decided once per handle during
/// discovery and sweep scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Player { name: String },
    Npc { type_tag: ActorTypeId },
    DroppedItem,
    Marker { label: String },
    Unknown,
}

/// Spawn-time description of an intangible, non-colliding marker entity.
/// Movement waypoints use an empty label; thinking indicators carry text.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSpec {
    pub pos: Vec3,
    pub label: String,
}

impl MarkerSpec {
    pub fn waypoint(pos: Vec3) -> Self {
        Self {
            pos,
            label: String::new(),
        }
    }

    pub fn labeled(pos: Vec3, label: impl Into<String>) -> Self {
        Self {
            pos,
            label: label.into(),
        }
    }
}

/// Index of a behavior role in the engine's catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoleIndex(pub u32);

// ---------------------------------------------------------------------------
// World handles
// ---------------------------------------------------------------------------

/// A unit of work executed exclusively on one world's thread.
pub type WorldTask = Box<dyn FnOnce(&mut dyn WorldAccess) + Send + 'static>;

/// Why a world refused a task submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The world's execution context has been torn down.
    Closed,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Closed => write!(f, "world execution context is closed"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Submission side of one world's execution context. Shared freely across
/// threads; the work itself stays confined to the world's own thread.
pub trait WorldHandle: Send + Sync {
    fn name(&self) -> &WorldName;

    /// Queue a task for in-order execution on this world's thread. Never
    /// blocks the caller.
    fn submit(&self, task: WorldTask) -> Result<(), SubmitError>;
}

// ---------------------------------------------------------------------------
// In-world entity operations
// ---------------------------------------------------------------------------

/// Entity operations available inside a world task. Only ever invoked from
/// the owning world's thread, so implementations need no locking.
pub trait WorldAccess {
    fn world_name(&self) -> &WorldName;

    fn entity_valid(&self, entity: EntityId) -> bool;
    fn position(&self, entity: EntityId) -> Option<Vec3>;
    fn set_position(&mut self, entity: EntityId, pos: Vec3);

    /// Horizontal facing angle in radians, measured as `atan2(dz, dx)`.
    fn heading(&self, entity: EntityId) -> Option<f64>;
    fn set_heading(&mut self, entity: EntityId, heading: f64);

    fn spawn_actor(
        &mut self,
        role: RoleIndex,
        type_tag: &ActorTypeId,
        display_name: &str,
        pos: Vec3,
    ) -> EntityId;
    fn spawn_marker(&mut self, spec: MarkerSpec) -> EntityId;
    /// Despawn an entity. Returns false if the handle was already stale.
    fn remove_entity(&mut self, entity: EntityId) -> bool;

    fn set_label_text(&mut self, entity: EntityId, text: &str);

    fn role_state(&self, entity: EntityId) -> Option<RoleState>;
    fn set_role_state(&mut self, entity: EntityId, state: RoleState);

    /// The entity this actor is locked onto (follow target, attack target,
    /// or a movement waypoint marker).
    fn interaction_target(&self, entity: EntityId) -> Option<EntityId>;
    fn set_interaction_target(&mut self, entity: EntityId, target: Option<EntityId>);

    fn set_attack_override(&mut self, entity: EntityId, kind: Option<AttackKind>);
    fn set_invulnerable(&mut self, entity: EntityId, on: bool);
    fn set_knockback_immune(&mut self, entity: EntityId, on: bool);

    fn find_player(&self, name: &str) -> Option<EntityId>;

    /// Every live entity handle in this world, for discovery and sweeps.
    fn entities(&self) -> Vec<EntityId>;
    fn classify(&self, entity: EntityId) -> EntityKind;
}

// ---------------------------------------------------------------------------
// Engine root
// ---------------------------------------------------------------------------

/// Root of the engine boundary: world lookup plus the behavior role catalog.
pub trait SimulationEngine: Send + Sync {
    fn world_names(&self) -> Vec<WorldName>;

    /// Handle for a named world, or `None` once that world is gone.
    fn world(&self, name: &WorldName) -> Option<Arc<dyn WorldHandle>>;

    /// Catalog lookup from an external actor type id to the engine's role
    /// index. `None` means the type cannot be spawned here.
    fn role_index(&self, type_id: &ActorTypeId) -> Option<RoleIndex>;
}
