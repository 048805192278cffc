//! The NPC director: the single entry point for controller commands.
//!
//! The director owns every shared component (registry, clock, dispatcher,
//! protocol controllers) and translates instance-id commands into tasks on
//! the owning world's execution context. All methods are callable from any
//! thread; none of them ever runs entity logic on the caller's thread.
//!
//! A director is built once per engine and torn down once with
//! [`NpcDirector::shutdown`], which is idempotent.

use std::collections::HashMap;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use contracts::{
    ActorId, ActorTypeId, AttackKind, BehaviorProfile, DirectorConfig, DirectorError, Location,
    Vec3, WorldName,
};

use crate::dispatch::{Dispatcher, WorldRouter};
use crate::engine::{EntityId, EntityKind, RoleState, SimulationEngine, WorldAccess, WorldHandle};
use crate::indicator::ThinkingIndicators;
use crate::movement::{MoveTicket, MovementController};
use crate::registry::{ActorRecord, ActorRegistry, BusySet};
use crate::respawn::RespawnScheduler;
use crate::rotation::RotationController;
use crate::scheduler::TaskScheduler;
use crate::shutdown::{LinkGauge, ShutdownGate};

/// How long `shutdown` waits for the clock worker to exit.
const CLOCK_STOP_WAIT: Duration = Duration::from_millis(500);

/// Grace period after teardown for world queues to drain the final tasks.
const TEARDOWN_GRACE: Duration = Duration::from_millis(100);

pub struct NpcDirector {
    engine: Arc<dyn SimulationEngine>,
    config: DirectorConfig,
    gate: ShutdownGate,
    links: LinkGauge,
    clock: Arc<TaskScheduler>,
    registry: Arc<ActorRegistry>,
    busy: Arc<BusySet>,
    router: Arc<WorldRouter>,
    dispatcher: Arc<Dispatcher>,
    movement: Arc<MovementController>,
    rotation: Arc<RotationController>,
    indicators: Arc<ThinkingIndicators>,
    respawn: Arc<RespawnScheduler>,
}

impl NpcDirector {
    pub fn new(engine: Arc<dyn SimulationEngine>, config: DirectorConfig) -> Self {
        let gate = ShutdownGate::new();
        let links = LinkGauge::new();
        let clock = Arc::new(TaskScheduler::start());
        let registry = Arc::new(ActorRegistry::new());
        let busy = Arc::new(BusySet::new());
        let router = Arc::new(WorldRouter::new(Arc::clone(&engine), &config));
        let dispatcher = Arc::new(Dispatcher::new(gate.clone(), &config));
        let movement = Arc::new(MovementController::new(
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            Arc::clone(&busy),
            gate.clone(),
            &config,
        ));
        let rotation = Arc::new(RotationController::new(
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            gate.clone(),
        ));
        let indicators = Arc::new(ThinkingIndicators::new(
            Arc::clone(&engine),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            gate.clone(),
            links.clone(),
            &config,
        ));
        let respawn = Arc::new(RespawnScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&dispatcher),
            Arc::clone(&engine),
            Arc::clone(&clock),
            gate.clone(),
            &config,
        ));

        Self {
            engine,
            config,
            gate,
            links,
            clock,
            registry,
            busy,
            router,
            dispatcher,
            movement,
            rotation,
            indicators,
            respawn,
        }
    }

    pub fn config(&self) -> &DirectorConfig {
        &self.config
    }

    // -- lifecycle ----------------------------------------------------------

    /// Spawn a new actor instance of `type_id` at `location` and start
    /// tracking it. Blocks up to the configured spawn wait for the world to
    /// run the spawn.
    pub fn spawn(
        &self,
        type_id: &ActorTypeId,
        display_name: &str,
        location: Location,
    ) -> Result<ActorId, DirectorError> {
        let world = self.router.resolve(&location.world)?;
        let Some(role) = self.engine.role_index(type_id) else {
            warn!(actor_type = %type_id, "spawn refused: engine has no role for this type");
            return Err(DirectorError::Unsupported("unknown actor type"));
        };

        // Ledger flags win, this call's display name wins.
        let behavior = match self.registry.behavior_of(type_id) {
            Some(profile) => BehaviorProfile {
                display_name: display_name.to_owned(),
                ..profile
            },
            None => BehaviorProfile::named(display_name),
        };

        let registry = Arc::clone(&self.registry);
        let type_id = type_id.clone();
        let id = ActorId::fresh();
        let confirmed = self.dispatcher.await_value(
            &world,
            self.config.spawn_wait(),
            move |access| {
                let entity = access.spawn_actor(role, &type_id, &behavior.display_name, location.pos);
                access.set_invulnerable(entity, behavior.invulnerable);
                access.set_knockback_immune(entity, behavior.knockback_immune);
                registry.register(ActorRecord {
                    instance_id: id,
                    type_id,
                    entity,
                    world: access.world_name().clone(),
                    behavior,
                    spawn: location,
                })
            },
        );
        let record = match confirmed {
            Ok(record) => record,
            Err(err) => {
                // A timed-out spawn task may still run once its world
                // resumes; the undo queues behind it on the same context.
                if matches!(err, DirectorError::Timeout(_)) {
                    self.roll_back_spawn(&world, id);
                }
                return Err(err);
            }
        };

        info!(
            actor = %record.instance_id,
            actor_type = %record.type_id,
            world = %record.world,
            "spawned actor"
        );
        Ok(record.instance_id)
    }

    /// Undo a spawn whose confirmation never arrived. The caller got an
    /// error, so no record under this id may survive.
    fn roll_back_spawn(&self, world: &Arc<dyn WorldHandle>, id: ActorId) {
        let registry = Arc::clone(&self.registry);
        let _ = self.dispatcher.submit(
            world,
            Box::new(move |access| {
                let Some(record) = registry.remove(&id) else {
                    return;
                };
                if access.entity_valid(record.entity) {
                    access.remove_entity(record.entity);
                }
                debug!(actor = %id, "rolled back a spawn that outlived its wait");
            }),
        );
    }

    /// Stop tracking `id` and despawn its entity. Returns whether the id
    /// was tracked.
    pub fn remove(&self, id: &ActorId) -> bool {
        let Some(record) = self.registry.remove(id) else {
            return false;
        };
        self.indicators.destroy(id);
        self.busy.clear(id);

        if let Ok(world) = self.router.resolve(&record.world) {
            let entity = record.entity;
            let _ = self.dispatcher.submit(
                &world,
                Box::new(move |access| {
                    if access.entity_valid(entity) {
                        access.remove_entity(entity);
                    }
                }),
            );
        }
        info!(actor = %id, "removed actor");
        true
    }

    /// Adopt already-present entities of `type_id` across all worlds and
    /// return their instance ids (existing records keep their ids). Records
    /// whose entity has vanished are dropped, but only for worlds that
    /// answered the scan.
    pub fn discover_existing(&self, type_id: &ActorTypeId) -> Vec<ActorId> {
        type Found = Vec<(EntityId, Option<Vec3>)>;

        let (tx, rx) = mpsc::channel::<(WorldName, Found)>();
        let mut polled = 0usize;
        for name in self.engine.world_names() {
            let Some(world) = self.engine.world(&name) else {
                continue;
            };
            let tx = tx.clone();
            let wanted = type_id.clone();
            let scan = Box::new(move |access: &mut dyn WorldAccess| {
                let mut found = Found::new();
                for entity in access.entities() {
                    if let EntityKind::Npc { type_tag } = access.classify(entity) {
                        if type_tag == wanted {
                            found.push((entity, access.position(entity)));
                        }
                    }
                }
                let _ = tx.send((access.world_name().clone(), found));
            });
            if self.dispatcher.submit(&world, scan).is_ok() {
                polled += 1;
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.config.scan_wait();
        let mut answered: HashMap<WorldName, Found> = HashMap::new();
        for _ in 0..polled {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok((world, found)) => {
                    answered.insert(world, found);
                }
                Err(_) => {
                    warn!(actor_type = %type_id, "discovery ran out of budget");
                    break;
                }
            }
        }

        let ledger_behavior = self.registry.behavior_of(type_id);
        let ledger_spawn = self.registry.spawn_point(type_id);
        let mut ids = Vec::new();
        for (world, found) in &answered {
            for (entity, pos) in found {
                if let Some(existing) = self.registry.by_entity(world, *entity) {
                    ids.push(existing.instance_id);
                    continue;
                }
                let behavior = ledger_behavior
                    .clone()
                    .unwrap_or_else(|| BehaviorProfile::named(type_id.as_str()));
                let spawn = ledger_spawn.clone().unwrap_or_else(|| Location {
                    world: world.clone(),
                    pos: pos.unwrap_or_default(),
                });
                let record = self.registry.register(ActorRecord {
                    instance_id: ActorId::fresh(),
                    type_id: type_id.clone(),
                    entity: *entity,
                    world: world.clone(),
                    behavior,
                    spawn,
                });
                info!(
                    actor = %record.instance_id,
                    actor_type = %type_id,
                    world = %world,
                    "adopted unmanaged actor"
                );
                ids.push(record.instance_id);
            }
        }

        for record in self.registry.of_type(type_id) {
            let Some(found) = answered.get(&record.world) else {
                continue; // world did not answer, keep the record
            };
            if !found.iter().any(|(entity, _)| *entity == record.entity) {
                debug!(actor = %record.instance_id, "pruned: entity no longer present");
                self.prune_stale(&record.instance_id);
            }
        }
        ids
    }

    // -- movement and facing ------------------------------------------------

    /// Walk `id` to `target`. The returned ticket settles exactly once with
    /// the walk's outcome. A newer movement command for the same actor
    /// supersedes this one.
    pub fn move_to(&self, id: &ActorId, target: Location) -> Result<MoveTicket, DirectorError> {
        let record = self.registry.get(id).ok_or(DirectorError::NotTracked(*id))?;
        if target.world != record.world {
            return Err(DirectorError::Unsupported("cross-world movement"));
        }
        let world = self.router.resolve(&record.world)?;
        Ok(self.movement.start(&record, world, target.pos))
    }

    /// Turn `id` toward `target` in smooth steps. Fire-and-forget: the loop
    /// ends quietly on alignment, engagement, or budget exhaustion.
    pub fn rotate_toward(&self, id: &ActorId, target: Location) {
        let Some(record) = self.registry.get(id) else {
            debug!(actor = %id, "rotate ignored: not tracked");
            return;
        };
        if target.world != record.world {
            debug!(actor = %id, "rotate ignored: target in another world");
            return;
        }
        let Ok(world) = self.router.resolve(&record.world) else {
            return;
        };
        self.rotation.start(&record, world, target.pos);
    }

    // -- player interactions ------------------------------------------------

    /// Lock `id` onto the named player with the engine's follow behavior.
    /// Returns false when the actor or the player cannot be found.
    pub fn start_following(&self, id: &ActorId, player_name: &str) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return false;
        };
        let entity = record.entity;
        let player = player_name.to_owned();
        // Engagement setup is a longer-bounded dispatch: unlike plain
        // reads it goes out through an open breaker, and its success
        // re-arms the world.
        let outcome = self
            .dispatcher
            .await_value(&world, self.config.engage_wait(), move |access| {
                if !access.entity_valid(entity) {
                    return None;
                }
                let Some(target) = access.find_player(&player) else {
                    return Some(false);
                };
                // Reset first so the engine re-reads the target.
                access.set_role_state(entity, RoleState::Idle);
                access.set_interaction_target(entity, Some(target));
                access.set_role_state(entity, RoleState::Follow);
                Some(true)
            });
        self.settle_engagement(id, outcome, true)
    }

    /// Release a follow lock. Returns false when the actor cannot be found.
    pub fn stop_following(&self, id: &ActorId) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return false;
        };
        let entity = record.entity;
        let outcome = self
            .dispatcher
            .await_value(&world, self.config.engage_wait(), move |access| {
                if !access.entity_valid(entity) {
                    return None;
                }
                access.set_interaction_target(entity, None);
                access.set_role_state(entity, RoleState::Idle);
                Some(true)
            });
        self.settle_engagement(id, outcome, false)
    }

    /// Lock `id` onto the named player with the engine's attack behavior,
    /// forcing the given attack style.
    pub fn start_attacking(&self, id: &ActorId, player_name: &str, kind: AttackKind) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return false;
        };
        let entity = record.entity;
        let player = player_name.to_owned();
        let outcome = self
            .dispatcher
            .await_value(&world, self.config.engage_wait(), move |access| {
                if !access.entity_valid(entity) {
                    return None;
                }
                let Some(target) = access.find_player(&player) else {
                    return Some(false);
                };
                access.set_attack_override(entity, Some(kind));
                access.set_role_state(entity, RoleState::Idle);
                access.set_interaction_target(entity, Some(target));
                access.set_role_state(entity, RoleState::Attack);
                Some(true)
            });
        self.settle_engagement(id, outcome, true)
    }

    /// Release an attack lock and clear the forced attack style.
    pub fn stop_attacking(&self, id: &ActorId) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return false;
        };
        let entity = record.entity;
        let outcome = self
            .dispatcher
            .await_value(&world, self.config.engage_wait(), move |access| {
                if !access.entity_valid(entity) {
                    return None;
                }
                access.set_interaction_target(entity, None);
                access.set_attack_override(entity, None);
                access.set_role_state(entity, RoleState::Idle);
                Some(true)
            });
        self.settle_engagement(id, outcome, false)
    }

    /// Shared tail of the four engagement commands: prune on a vanished
    /// entity, settle the busy mark on success.
    fn settle_engagement(
        &self,
        id: &ActorId,
        outcome: Result<Option<bool>, DirectorError>,
        engaging: bool,
    ) -> bool {
        match outcome {
            Ok(Some(true)) => {
                if engaging {
                    self.busy.mark(*id);
                } else {
                    self.busy.clear(id);
                }
                true
            }
            Ok(Some(false)) => false,
            Ok(None) => {
                self.prune_stale(id);
                false
            }
            Err(err) => {
                debug!(actor = %id, %err, "engagement command failed");
                false
            }
        }
    }

    // -- thinking indicators ------------------------------------------------

    /// Show (or restart) the floating thinking indicator above `id`.
    pub fn show_thinking(&self, id: &ActorId) {
        let Some(record) = self.registry.get(id) else {
            return;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return;
        };
        self.indicators.show(&record, world);
    }

    /// Blank the thinking indicator. The marker stays for cheap re-show.
    pub fn hide_thinking(&self, id: &ActorId) {
        self.indicators.hide(id);
    }

    /// Remove indicator markers that no record claims, across all worlds.
    pub fn sweep_zombie_indicators(&self) -> usize {
        self.indicators.sweep_zombies()
    }

    // -- respawns -----------------------------------------------------------

    pub fn schedule_respawn(&self, type_id: ActorTypeId, delay: Duration) {
        self.respawn.schedule(type_id, delay);
    }

    pub fn cancel_respawn(&self, type_id: &ActorTypeId) -> bool {
        self.respawn.cancel(type_id)
    }

    // -- queries ------------------------------------------------------------

    /// Where the actor is right now, or `None` if it cannot be read in time.
    /// A tracked id whose entity is gone is pruned.
    pub fn current_location(&self, id: &ActorId) -> Option<Location> {
        let record = self.registry.get(id)?;
        let world = self.router.resolve(&record.world).ok()?;
        let entity = record.entity;
        match self.dispatcher.read(&world, move |access| {
            if !access.entity_valid(entity) {
                return None;
            }
            access.position(entity)
        }) {
            Ok(Some(pos)) => Some(Location {
                world: record.world.clone(),
                pos,
            }),
            Ok(None) => {
                self.prune_stale(id);
                None
            }
            Err(err) => {
                debug!(actor = %id, %err, "location read failed");
                None
            }
        }
    }

    /// Whether the actor's entity still exists. Fails closed on a slow
    /// world, without pruning: only a world's own answer retires a record.
    pub fn is_valid(&self, id: &ActorId) -> bool {
        let Some(record) = self.registry.get(id) else {
            return false;
        };
        let Ok(world) = self.router.resolve(&record.world) else {
            return false;
        };
        let entity = record.entity;
        match self.dispatcher.read(&world, move |access| access.entity_valid(entity)) {
            Ok(true) => true,
            Ok(false) => {
                self.prune_stale(id);
                false
            }
            Err(_) => false,
        }
    }

    /// Whether some protocol currently owns the actor. Pure map read.
    pub fn is_busy(&self, id: &ActorId) -> bool {
        self.busy.contains(id)
    }

    pub fn tracked_actors(&self) -> Vec<Arc<ActorRecord>> {
        self.registry.all()
    }

    pub fn pending_respawns(&self) -> Vec<ActorTypeId> {
        self.respawn.pending_types()
    }

    pub fn active_moves(&self) -> usize {
        self.movement.active()
    }

    // -- controller links ---------------------------------------------------

    pub fn link_opened(&self) {
        self.links.opened();
    }

    pub fn link_closed(&self) {
        self.links.closed();
    }

    // -- teardown -----------------------------------------------------------

    /// Drop a record whose entity the world reported gone.
    fn prune_stale(&self, id: &ActorId) {
        if self.registry.remove(id).is_some() {
            debug!(actor = %id, "record pruned: entity invalid");
        }
        self.busy.clear(id);
        self.indicators.destroy(id);
    }

    /// Tear everything down: refuse new work, stop the clock, settle every
    /// in-flight ticket, drop all tracking state. Safe to call more than
    /// once; only the first call does the work.
    pub fn shutdown(&self) {
        if !self.gate.close() {
            return;
        }
        info!("director shutting down");

        // Periodic work first, so nothing re-arms while state drains.
        self.rotation.cancel_all();
        self.indicators.cancel_all_tasks();
        self.movement.cancel_all_tasks();
        self.clock.stop(CLOCK_STOP_WAIT);

        // Every caller still holding a ticket hears the shutdown.
        self.movement.settle_all_shutting_down();

        self.respawn.clear();
        self.rotation.clear();
        self.indicators.clear();
        self.registry.clear_all();
        self.busy.clear_all();

        // Let world queues finish tasks submitted before the gate closed.
        thread::sleep(TEARDOWN_GRACE);
        info!("director shutdown complete");
    }
}

impl Drop for NpcDirector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::RoleIndex;
    use crate::testutil::{quick_config, FakeEngine};

    fn overworld_at(pos: Vec3) -> Location {
        Location {
            world: WorldName::new("overworld"),
            pos,
        }
    }

    fn spawnable_director() -> NpcDirector {
        let engine = FakeEngine::with_spawnable_worlds(&["overworld"], RoleIndex(1));
        NpcDirector::new(engine, quick_config())
    }

    // -- spawn tests --------------------------------------------------------

    #[test]
    fn spawn_registers_and_returns_a_tracked_id() {
        let director = spawnable_director();
        let id = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper of Webs",
                overworld_at(Vec3::new(1.0, 0.0, 1.0)),
            )
            .unwrap();

        let records = director.tracked_actors();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instance_id, id);
        assert_eq!(records[0].behavior.display_name, "Keeper of Webs");
    }

    #[test]
    fn spawn_fails_for_a_type_the_engine_cannot_build() {
        let engine = FakeEngine::with_worlds(&["overworld"]);
        let director = NpcDirector::new(engine, quick_config());

        let err = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap_err();
        assert!(matches!(err, DirectorError::Unsupported(_)));
    }

    #[test]
    fn spawn_fails_for_an_unknown_world() {
        let director = spawnable_director();
        let err = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                Location {
                    world: WorldName::new("the-void"),
                    pos: Vec3::default(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DirectorError::DomainUnavailable(_)));
    }

    #[test]
    fn timed_out_spawn_is_rolled_back_when_the_world_catches_up() {
        let engine = FakeEngine::with_stalled_spawnable_worlds(&["overworld"], RoleIndex(1));
        let world = engine.world_double("overworld");
        let director = NpcDirector::new(
            engine,
            DirectorConfig {
                spawn_wait_ms: 40,
                ..quick_config()
            },
        );

        let err = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap_err();
        assert!(matches!(err, DirectorError::Timeout(_)));
        assert_eq!(world.queued(), 2, "the spawn and its undo are both queued");

        // The wedged world resumes: the spawn registers, then the undo
        // queued behind it removes the record again.
        world.answer_from_now_on();
        assert!(director.tracked_actors().is_empty());
    }

    // -- command precondition tests -----------------------------------------

    #[test]
    fn move_to_requires_a_tracked_actor() {
        let director = spawnable_director();
        let stranger = ActorId::fresh();

        let err = director
            .move_to(&stranger, overworld_at(Vec3::default()))
            .unwrap_err();
        assert_eq!(err, DirectorError::NotTracked(stranger));
    }

    #[test]
    fn unknown_ids_answer_not_found_without_blocking() {
        let director = spawnable_director();
        let stranger = ActorId::fresh();

        assert_eq!(director.current_location(&stranger), None);
        assert!(!director.is_valid(&stranger));
        assert!(!director.is_busy(&stranger));
        assert!(!director.remove(&stranger));
        assert!(!director.start_following(&stranger, "Alex"));
        assert!(!director.stop_following(&stranger));
        assert!(!director.stop_attacking(&stranger));

        // Fire-and-forget surfaces swallow the unknown id quietly.
        director.rotate_toward(&stranger, overworld_at(Vec3::default()));
        director.show_thinking(&stranger);
        director.hide_thinking(&stranger);
        assert!(director.tracked_actors().is_empty());
    }

    #[test]
    fn move_to_rejects_cross_world_targets() {
        let director = spawnable_director();
        let id = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap();

        let err = director
            .move_to(
                &id,
                Location {
                    world: WorldName::new("nether"),
                    pos: Vec3::default(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, DirectorError::Unsupported(_)));
    }

    #[test]
    fn remove_reports_whether_the_id_was_tracked() {
        let director = spawnable_director();
        let id = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap();

        assert!(director.remove(&id));
        assert!(!director.remove(&id), "second remove finds nothing");
        assert!(director.tracked_actors().is_empty());
    }

    // -- stale record tests -------------------------------------------------

    #[test]
    fn validity_check_prunes_a_record_with_a_dead_entity() {
        // The bare test world reports every entity handle as stale.
        let director = spawnable_director();
        let id = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap();
        assert_eq!(director.tracked_actors().len(), 1);

        assert!(!director.is_valid(&id));
        assert!(director.tracked_actors().is_empty(), "record pruned");
    }

    #[test]
    fn following_a_vanished_actor_reports_false_and_prunes() {
        let director = spawnable_director();
        let id = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap();

        assert!(!director.start_following(&id, "Alex"));
        assert!(director.tracked_actors().is_empty());
        assert!(!director.is_busy(&id));
    }

    // -- teardown tests -----------------------------------------------------

    #[test]
    fn shutdown_refuses_further_commands_and_is_idempotent() {
        let director = spawnable_director();
        director.shutdown();
        director.shutdown(); // no-op

        let err = director
            .spawn(
                &ActorTypeId::new("keeper"),
                "Keeper",
                overworld_at(Vec3::default()),
            )
            .unwrap_err();
        assert!(matches!(err, DirectorError::DomainUnavailable(_)));
        assert!(director.tracked_actors().is_empty());
    }
}
