//! Delayed respawning of actor types.
//!
//! Respawns are keyed by actor *type*, not instance: when an actor dies the
//! controller schedules its type, and the due respawn mints a brand new
//! instance at the type's recorded spawn point. One shared checker task
//! polls the due times; it parks itself while nothing is pending and is
//! re-armed by the next schedule call.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use contracts::{ActorId, ActorTypeId, DirectorConfig};

use crate::dispatch::{Dispatcher, WorldRouter};
use crate::engine::{SimulationEngine, WorldAccess};
use crate::lock;
use crate::registry::{ActorRecord, ActorRegistry};
use crate::scheduler::{Flow, TaskHandle, TaskScheduler};
use crate::shutdown::ShutdownGate;

pub struct RespawnScheduler {
    /// Due time per scheduled type. Re-scheduling overwrites.
    pending: DashMap<ActorTypeId, Instant>,
    checker: Mutex<Option<TaskHandle>>,
    registry: Arc<ActorRegistry>,
    router: Arc<WorldRouter>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<dyn SimulationEngine>,
    clock: Arc<TaskScheduler>,
    gate: ShutdownGate,
    check_interval: Duration,
}

impl RespawnScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ActorRegistry>,
        router: Arc<WorldRouter>,
        dispatcher: Arc<Dispatcher>,
        engine: Arc<dyn SimulationEngine>,
        clock: Arc<TaskScheduler>,
        gate: ShutdownGate,
        config: &DirectorConfig,
    ) -> Self {
        Self {
            pending: DashMap::new(),
            checker: Mutex::new(None),
            registry,
            router,
            dispatcher,
            engine,
            clock,
            gate,
            check_interval: config.respawn_check_interval(),
        }
    }

    /// Schedule `type_id` to respawn after `delay`. A type already pending
    /// is moved to the new due time.
    pub fn schedule(self: &Arc<Self>, type_id: ActorTypeId, delay: Duration) {
        if self.gate.is_closed() {
            debug!(%type_id, "respawn not scheduled: shutting down");
            return;
        }
        self.pending.insert(type_id.clone(), Instant::now() + delay);
        debug!(%type_id, delay_ms = delay.as_millis() as u64, "respawn scheduled");
        self.ensure_checker();
    }

    /// Drop a pending respawn. Returns whether anything was pending.
    pub fn cancel(&self, type_id: &ActorTypeId) -> bool {
        self.pending.remove(type_id).is_some()
    }

    pub fn pending_types(&self) -> Vec<ActorTypeId> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Cancel the checker and forget every pending respawn.
    pub fn clear(&self) {
        if let Some(handle) = lock(&self.checker).take() {
            handle.cancel();
        }
        self.pending.clear();
    }

    fn ensure_checker(self: &Arc<Self>) {
        let mut slot = lock(&self.checker);
        if slot.is_some() {
            return;
        }
        let scheduler = Arc::clone(self);
        *slot = Some(self.clock.schedule_repeating(
            self.check_interval,
            self.check_interval,
            move || scheduler.check_tick(),
        ));
    }

    fn check_tick(&self) -> Flow {
        if self.gate.is_closed() {
            return Flow::Stop;
        }

        let now = Instant::now();
        let due: Vec<ActorTypeId> = self
            .pending
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for type_id in due {
            // Remove before firing so a racing cancel or a second checker
            // tick can never double-spawn.
            if self.pending.remove(&type_id).is_some() {
                self.fire(&type_id);
            }
        }

        // Park while the queue is empty. The slot is cleared under the lock
        // so ensure_checker never sees a handle that is about to stop.
        let mut slot = lock(&self.checker);
        if self.pending.is_empty() {
            *slot = None;
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn fire(&self, type_id: &ActorTypeId) {
        let Some(spawn) = self.registry.spawn_point(type_id) else {
            warn!(%type_id, "respawn due but no spawn point on record");
            return;
        };
        let world = match self.router.resolve(&spawn.world) {
            Ok(world) => world,
            Err(err) => {
                warn!(%type_id, %err, "respawn skipped");
                return;
            }
        };
        let Some(role) = self.engine.role_index(type_id) else {
            warn!(%type_id, "respawn skipped: engine has no role for this type");
            return;
        };
        let behavior = self.registry.behavior_of(type_id).unwrap_or_default();

        let registry = Arc::clone(&self.registry);
        let owned_type = type_id.clone();
        let task = Box::new(move |access: &mut dyn WorldAccess| {
            let display = if behavior.display_name.is_empty() {
                owned_type.as_str().to_owned()
            } else {
                behavior.display_name.clone()
            };
            let entity = access.spawn_actor(role, &owned_type, &display, spawn.pos);
            access.set_invulnerable(entity, behavior.invulnerable);
            access.set_knockback_immune(entity, behavior.knockback_immune);
            let record = registry.register(ActorRecord {
                instance_id: ActorId::fresh(),
                type_id: owned_type,
                entity,
                world: access.world_name().clone(),
                behavior,
                spawn,
            });
            info!(actor = %record.instance_id, type_id = %record.type_id, "respawned actor");
        });
        if self.dispatcher.submit(&world, task).is_err() {
            warn!(%type_id, world = %world.name(), "respawn dropped: world refused the task");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BehaviorProfile, Location, Vec3, WorldName};

    use crate::engine::{EntityId, RoleIndex};
    use crate::testutil::{quick_config, FakeEngine};

    fn harness(
        engine: Arc<dyn SimulationEngine>,
        config: &DirectorConfig,
    ) -> (Arc<RespawnScheduler>, Arc<ActorRegistry>, Arc<TaskScheduler>) {
        let gate = ShutdownGate::new();
        let registry = Arc::new(ActorRegistry::new());
        let router = Arc::new(WorldRouter::new(Arc::clone(&engine), config));
        let dispatcher = Arc::new(Dispatcher::new(gate.clone(), config));
        let clock = Arc::new(TaskScheduler::start());
        let respawn = Arc::new(RespawnScheduler::new(
            Arc::clone(&registry),
            router,
            dispatcher,
            engine,
            Arc::clone(&clock),
            gate,
            config,
        ));
        (respawn, registry, clock)
    }

    fn seed_record(registry: &ActorRegistry, type_id: &ActorTypeId, world: &str) {
        registry.register(ActorRecord {
            instance_id: ActorId::fresh(),
            type_id: type_id.clone(),
            entity: EntityId(7),
            world: WorldName::new(world),
            behavior: BehaviorProfile::named("Keeper"),
            spawn: Location {
                world: WorldName::new(world),
                pos: Vec3::new(4.0, 0.0, 4.0),
            },
        });
    }

    // -- scheduling tests ---------------------------------------------------

    #[test]
    fn cancel_reports_whether_a_respawn_was_pending() {
        let config = quick_config();
        let engine = FakeEngine::with_worlds(&["overworld"]);
        let (respawn, _registry, clock) = harness(engine, &config);

        let keeper = ActorTypeId::new("keeper");
        respawn.schedule(keeper.clone(), Duration::from_secs(60));
        assert_eq!(respawn.pending_len(), 1);

        assert!(respawn.cancel(&keeper));
        assert!(!respawn.cancel(&keeper), "second cancel finds nothing");
        assert_eq!(respawn.pending_len(), 0);

        respawn.clear();
        clock.stop(Duration::from_millis(200));
    }

    #[test]
    fn rescheduling_moves_the_due_time_instead_of_stacking() {
        let config = quick_config();
        let engine = FakeEngine::with_worlds(&["overworld"]);
        let (respawn, _registry, clock) = harness(engine, &config);

        let keeper = ActorTypeId::new("keeper");
        respawn.schedule(keeper.clone(), Duration::from_secs(60));
        respawn.schedule(keeper.clone(), Duration::from_secs(120));
        assert_eq!(respawn.pending_len(), 1);

        respawn.clear();
        clock.stop(Duration::from_millis(200));
    }

    // -- firing tests -------------------------------------------------------

    #[test]
    fn due_respawn_registers_a_fresh_instance() {
        let config = DirectorConfig {
            respawn_check_interval_ms: 20,
            ..quick_config()
        };
        let engine = FakeEngine::with_spawnable_worlds(&["overworld"], RoleIndex(3));
        let (respawn, registry, clock) = harness(engine, &config);

        let keeper = ActorTypeId::new("keeper");
        seed_record(&registry, &keeper, "overworld");
        let before = registry.of_type(&keeper).len();

        respawn.schedule(keeper.clone(), Duration::from_millis(10));
        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.of_type(&keeper).len() == before && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        let records = registry.of_type(&keeper);
        assert_eq!(records.len(), before + 1, "one new instance");
        assert_eq!(respawn.pending_len(), 0, "fired respawns leave the queue");

        respawn.clear();
        clock.stop(Duration::from_millis(200));
    }

    #[test]
    fn respawn_without_a_spawn_point_is_dropped() {
        let config = DirectorConfig {
            respawn_check_interval_ms: 20,
            ..quick_config()
        };
        let engine = FakeEngine::with_spawnable_worlds(&["overworld"], RoleIndex(3));
        let (respawn, registry, clock) = harness(engine, &config);

        // No record was ever registered for this type.
        respawn.schedule(ActorTypeId::new("stranger"), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(200));

        assert!(registry.is_empty());
        assert_eq!(respawn.pending_len(), 0);

        respawn.clear();
        clock.stop(Duration::from_millis(200));
    }

    #[test]
    fn respawn_into_a_closed_world_is_dropped() {
        let config = DirectorConfig {
            respawn_check_interval_ms: 20,
            ..quick_config()
        };
        let engine = FakeEngine::with_spawnable_worlds(&["overworld"], RoleIndex(3));
        let world = engine.world_double("overworld");
        let (respawn, registry, clock) = harness(engine, &config);

        let keeper = ActorTypeId::new("keeper");
        seed_record(&registry, &keeper, "overworld");
        world.close();

        respawn.schedule(keeper.clone(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(registry.of_type(&keeper).len(), 1, "only the seeded record");
        assert_eq!(respawn.pending_len(), 0, "the due entry is still consumed");

        respawn.clear();
        clock.stop(Duration::from_millis(200));
    }
}
