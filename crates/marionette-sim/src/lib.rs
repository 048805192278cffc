//! Reference simulation engine with single-threaded worlds.
//!
//! Each world owns one thread. Submitted tasks run there in submission
//! order, and between tasks the world advances its own behavior tick, which
//! is what makes follow movement actually move. The engine is deliberately
//! small; it exists to run the director against the semantics that matter:
//! entity handles go stale, world state is thread-confined, and nothing is
//! observable except through submitted tasks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error};

use contracts::{ActorTypeId, AttackKind, Vec3, WorldName};
use marionette_core::engine::{
    EntityId, EntityKind, MarkerSpec, RoleIndex, RoleState, SimulationEngine, SubmitError,
    WorldAccess, WorldHandle, WorldTask,
};

/// Follow movement stops advancing at this distance from its target.
pub const FOLLOW_STOP_RADIUS: f64 = 1.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub worlds: Vec<WorldName>,
    /// Cadence of the behavior tick while the task queue is idle.
    pub tick_interval: Duration,
    /// Distance covered per behavior tick by a following entity.
    pub follow_speed: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            worlds: vec![WorldName::new("overworld")],
            tick_interval: Duration::from_millis(10),
            follow_speed: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// World state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum SimKind {
    Player { name: String },
    Npc { type_tag: ActorTypeId },
    Marker,
}

#[derive(Debug, Clone)]
struct SimEntity {
    kind: SimKind,
    pos: Vec3,
    heading: f64,
    label: String,
    role: RoleState,
    target: Option<EntityId>,
    attack_override: Option<AttackKind>,
    invulnerable: bool,
    knockback_immune: bool,
}

impl SimEntity {
    fn at(kind: SimKind, pos: Vec3) -> Self {
        Self {
            kind,
            pos,
            heading: 0.0,
            label: String::new(),
            role: RoleState::Idle,
            target: None,
            attack_override: None,
            invulnerable: false,
            knockback_immune: false,
        }
    }
}

/// One world's entity table. Lives on the world thread; tests reach it
/// through [`SimEngine::run_on`].
pub struct SimWorldState {
    name: WorldName,
    next_id: u64,
    entities: HashMap<EntityId, SimEntity>,
    follow_speed: f64,
}

impl SimWorldState {
    fn new(name: WorldName, follow_speed: f64) -> Self {
        Self {
            name,
            next_id: 1,
            entities: HashMap::new(),
            follow_speed,
        }
    }

    fn insert(&mut self, entity: SimEntity) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.entities.insert(id, entity);
        id
    }

    /// Put a player into the world. Test hook; the director never spawns
    /// players.
    pub fn spawn_player(&mut self, name: &str, pos: Vec3) -> EntityId {
        self.insert(SimEntity::at(
            SimKind::Player {
                name: name.to_owned(),
            },
            pos,
        ))
    }

    /// Despawn an entity out from under the director, as death would.
    pub fn kill(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity).is_some()
    }

    pub fn label_of(&self, entity: EntityId) -> Option<&str> {
        self.entities.get(&entity).map(|e| e.label.as_str())
    }

    pub fn attack_override_of(&self, entity: EntityId) -> Option<AttackKind> {
        self.entities.get(&entity).and_then(|e| e.attack_override)
    }

    /// Advance engine behavior: entities in an engaged role walk toward
    /// their target and stop at the follow radius. Dead targets release
    /// the lock.
    fn behavior_tick(&mut self) {
        let movers: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, e)| matches!(e.role, RoleState::Follow | RoleState::Attack))
            .map(|(id, _)| *id)
            .collect();

        for id in movers {
            let Some(target_id) = self.entities.get(&id).and_then(|e| e.target) else {
                continue;
            };
            let Some(target_pos) = self.entities.get(&target_id).map(|t| t.pos) else {
                // Target despawned; the engine drops the lock.
                if let Some(e) = self.entities.get_mut(&id) {
                    e.target = None;
                    e.role = RoleState::Idle;
                }
                continue;
            };

            let Some(e) = self.entities.get_mut(&id) else {
                continue;
            };
            let dx = target_pos.x - e.pos.x;
            let dy = target_pos.y - e.pos.y;
            let dz = target_pos.z - e.pos.z;
            let dist = (dx * dx + dy * dy + dz * dz).sqrt();
            if dist <= FOLLOW_STOP_RADIUS {
                continue;
            }
            let step = self.follow_speed.min(dist - FOLLOW_STOP_RADIUS);
            let scale = step / dist;
            e.pos = Vec3::new(e.pos.x + dx * scale, e.pos.y + dy * scale, e.pos.z + dz * scale);
            e.heading = dz.atan2(dx);
        }
    }
}

impl WorldAccess for SimWorldState {
    fn world_name(&self) -> &WorldName {
        &self.name
    }

    fn entity_valid(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    fn position(&self, entity: EntityId) -> Option<Vec3> {
        self.entities.get(&entity).map(|e| e.pos)
    }

    fn set_position(&mut self, entity: EntityId, pos: Vec3) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.pos = pos;
        }
    }

    fn heading(&self, entity: EntityId) -> Option<f64> {
        self.entities.get(&entity).map(|e| e.heading)
    }

    fn set_heading(&mut self, entity: EntityId, heading: f64) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.heading = heading;
        }
    }

    fn spawn_actor(
        &mut self,
        _role: RoleIndex,
        type_tag: &ActorTypeId,
        display_name: &str,
        pos: Vec3,
    ) -> EntityId {
        let mut entity = SimEntity::at(
            SimKind::Npc {
                type_tag: type_tag.clone(),
            },
            pos,
        );
        entity.label = display_name.to_owned();
        self.insert(entity)
    }

    fn spawn_marker(&mut self, spec: MarkerSpec) -> EntityId {
        let mut entity = SimEntity::at(SimKind::Marker, spec.pos);
        entity.label = spec.label;
        self.insert(entity)
    }

    fn remove_entity(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity).is_some()
    }

    fn set_label_text(&mut self, entity: EntityId, text: &str) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.label = text.to_owned();
        }
    }

    fn role_state(&self, entity: EntityId) -> Option<RoleState> {
        self.entities.get(&entity).map(|e| e.role)
    }

    fn set_role_state(&mut self, entity: EntityId, state: RoleState) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.role = state;
        }
    }

    fn interaction_target(&self, entity: EntityId) -> Option<EntityId> {
        self.entities.get(&entity).and_then(|e| e.target)
    }

    fn set_interaction_target(&mut self, entity: EntityId, target: Option<EntityId>) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.target = target;
        }
    }

    fn set_attack_override(&mut self, entity: EntityId, kind: Option<AttackKind>) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.attack_override = kind;
        }
    }

    fn set_invulnerable(&mut self, entity: EntityId, on: bool) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.invulnerable = on;
        }
    }

    fn set_knockback_immune(&mut self, entity: EntityId, on: bool) {
        if let Some(e) = self.entities.get_mut(&entity) {
            e.knockback_immune = on;
        }
    }

    fn find_player(&self, name: &str) -> Option<EntityId> {
        self.entities.iter().find_map(|(id, e)| match &e.kind {
            SimKind::Player { name: n } if n == name => Some(*id),
            _ => None,
        })
    }

    fn entities(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    fn classify(&self, entity: EntityId) -> EntityKind {
        match self.entities.get(&entity).map(|e| (&e.kind, &e.label)) {
            Some((SimKind::Player { name }, _)) => EntityKind::Player { name: name.clone() },
            Some((SimKind::Npc { type_tag }, _)) => EntityKind::Npc {
                type_tag: type_tag.clone(),
            },
            Some((SimKind::Marker, label)) => EntityKind::Marker {
                label: label.clone(),
            },
            None => EntityKind::Unknown,
        }
    }
}

// ---------------------------------------------------------------------------
// World thread
// ---------------------------------------------------------------------------

type NativeTask = Box<dyn FnOnce(&mut SimWorldState) + Send + 'static>;

struct SimWorld {
    name: WorldName,
    closed: AtomicBool,
    sender: Mutex<Option<Sender<NativeTask>>>,
}

impl SimWorld {
    fn submit_native(&self, task: NativeTask) -> Result<(), SubmitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }
        let guard = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| SubmitError::Closed),
            None => Err(SubmitError::Closed),
        }
    }

    /// Refuse new work and drop the channel so the world thread exits
    /// after draining what it already accepted.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl WorldHandle for SimWorld {
    fn name(&self) -> &WorldName {
        &self.name
    }

    fn submit(&self, task: WorldTask) -> Result<(), SubmitError> {
        self.submit_native(Box::new(move |state| task(state)))
    }
}

fn run_world(
    name: WorldName,
    rx: Receiver<NativeTask>,
    tick_interval: Duration,
    follow_speed: f64,
) {
    let mut state = SimWorldState::new(name, follow_speed);
    let mut last_tick = Instant::now();
    loop {
        match rx.recv_timeout(tick_interval) {
            Ok(task) => {
                if catch_unwind(AssertUnwindSafe(|| task(&mut state))).is_err() {
                    error!(world = %state.name, "world task panicked");
                }
                // A flooded queue must not starve the behavior tick.
                if last_tick.elapsed() >= tick_interval {
                    state.behavior_tick();
                    last_tick = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                state.behavior_tick();
                last_tick = Instant::now();
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!(world = %state.name, "world thread exiting");
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct SimEngine {
    worlds: HashMap<WorldName, Arc<SimWorld>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    roles: Mutex<HashMap<ActorTypeId, RoleIndex>>,
}

impl SimEngine {
    /// Spawn one thread per configured world and return the engine.
    pub fn start(config: SimConfig) -> Arc<Self> {
        let mut worlds = HashMap::new();
        let mut threads = Vec::new();
        for name in &config.worlds {
            let (tx, rx) = mpsc::channel();
            let handle = thread::Builder::new()
                .name(format!("sim-world-{name}"))
                .spawn({
                    let name = name.clone();
                    let tick = config.tick_interval;
                    let speed = config.follow_speed;
                    move || run_world(name, rx, tick, speed)
                })
                .expect("spawning a world thread");
            worlds.insert(
                name.clone(),
                Arc::new(SimWorld {
                    name: name.clone(),
                    closed: AtomicBool::new(false),
                    sender: Mutex::new(Some(tx)),
                }),
            );
            threads.push(handle);
        }
        Arc::new(Self {
            worlds,
            threads: Mutex::new(threads),
            roles: Mutex::new(HashMap::new()),
        })
    }

    /// Register an actor type in the role catalog. Idempotent; the first
    /// registration fixes the index.
    pub fn define_role(&self, type_id: ActorTypeId) -> RoleIndex {
        let mut roles = self.roles.lock().unwrap_or_else(PoisonError::into_inner);
        let next = RoleIndex(roles.len() as u32);
        *roles.entry(type_id).or_insert(next)
    }

    /// Run `work` on the named world's thread and block for its value.
    ///
    /// # Panics
    ///
    /// Panics if the world does not exist or has been stopped. This is a
    /// harness entry point for tests and demos, not part of the engine
    /// boundary the director uses.
    pub fn run_on<T, F>(&self, name: &WorldName, work: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut SimWorldState) -> T + Send + 'static,
    {
        let world = self.worlds.get(name).expect("world exists");
        let (tx, rx) = mpsc::sync_channel(1);
        world
            .submit_native(Box::new(move |state| {
                let _ = tx.send(work(state));
            }))
            .expect("world accepts work");
        rx.recv().expect("world answered")
    }

    /// Close every world and join the world threads.
    pub fn stop(&self) {
        for world in self.worlds.values() {
            world.close();
        }
        let mut threads = self.threads.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for SimEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SimulationEngine for SimEngine {
    fn world_names(&self) -> Vec<WorldName> {
        self.worlds.keys().cloned().collect()
    }

    fn world(&self, name: &WorldName) -> Option<Arc<dyn WorldHandle>> {
        self.worlds
            .get(name)
            .map(|w| Arc::clone(w) as Arc<dyn WorldHandle>)
    }

    fn role_index(&self, type_id: &ActorTypeId) -> Option<RoleIndex> {
        self.roles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_id)
            .copied()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
