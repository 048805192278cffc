//! Floating "Thinking ..." indicators.
//!
//! While the controller deliberates, the actor carries a small text marker
//! above its head that cycles through three dot frames. Indicators are
//! reused across show/hide cycles: `hide` only blanks the text, the marker
//! entity and its record stay behind so the next `show` is a label write
//! instead of a spawn. `destroy` retires the marker for good, and
//! [`ThinkingIndicators::sweep_zombies`] hunts down markers whose records
//! were lost to an earlier crash.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info, warn};

use contracts::{ActorId, DirectorConfig, WorldName};

use crate::dispatch::Dispatcher;
use crate::engine::{EntityId, EntityKind, MarkerSpec, SimulationEngine, WorldAccess, WorldHandle};
use crate::lock;
use crate::registry::ActorRecord;
use crate::scheduler::{Flow, TaskHandle, TaskScheduler};
use crate::shutdown::{LinkGauge, ShutdownGate};

/// Delay between animation frames.
pub(crate) const FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// The three dot frames, in display order.
pub(crate) const FRAMES: [&str; 3] = ["Thinking .", "Thinking ..", "Thinking ..."];

/// Vertical offset of the label above the actor's position.
pub(crate) const LABEL_OFFSET_Y: f64 = 2.25;

/// Prefix shared by every frame. The zombie sweep keys on it, so movement
/// waypoints (empty label) are never collected.
const FRAME_SIGNATURE: &str = "Thinking";

// ---------------------------------------------------------------------------
// Indicator record
// ---------------------------------------------------------------------------

/// Book-keeping for one actor's indicator.
struct Indicator {
    actor: ActorId,
    actor_entity: EntityId,
    world: Arc<dyn WorldHandle>,
    world_name: WorldName,
    /// Marker entity, once spawned. Replaced when the engine invalidates it.
    entity: Mutex<Option<EntityId>>,
    /// Monotonic frame counter, reduced modulo [`FRAMES`] at display time.
    frame: AtomicUsize,
    anim: Mutex<Option<TaskHandle>>,
}

impl Indicator {
    fn stop_animation(&self) {
        if let Some(handle) = lock(&self.anim).take() {
            handle.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct ThinkingIndicators {
    records: DashMap<ActorId, Arc<Indicator>>,
    engine: Arc<dyn SimulationEngine>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<TaskScheduler>,
    gate: ShutdownGate,
    links: LinkGauge,
    scan_wait: Duration,
}

impl ThinkingIndicators {
    pub fn new(
        engine: Arc<dyn SimulationEngine>,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<TaskScheduler>,
        gate: ShutdownGate,
        links: LinkGauge,
        config: &DirectorConfig,
    ) -> Self {
        Self {
            records: DashMap::new(),
            engine,
            dispatcher,
            clock,
            gate,
            links,
            scan_wait: config.scan_wait(),
        }
    }

    /// Show the indicator for `record`, spawning the marker if this actor
    /// does not have one yet. Restarts the frame animation from frame zero.
    pub fn show(self: &Arc<Self>, record: &ActorRecord, world: Arc<dyn WorldHandle>) {
        if self.gate.is_closed() {
            return;
        }

        let indicator = match self.records.get(&record.instance_id) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                let fresh = Arc::new(Indicator {
                    actor: record.instance_id,
                    actor_entity: record.entity,
                    world: Arc::clone(&world),
                    world_name: record.world.clone(),
                    entity: Mutex::new(None),
                    frame: AtomicUsize::new(0),
                    anim: Mutex::new(None),
                });
                self.records
                    .insert(record.instance_id, Arc::clone(&fresh));
                fresh
            }
        };

        indicator.frame.store(0, Ordering::SeqCst);

        // Queue the label work before arming the animation so the first
        // frame tick always finds the marker in place.
        let controller = Arc::clone(self);
        let on_world = Arc::clone(&indicator);
        let submitted = self.dispatcher.submit(
            &world,
            Box::new(move |access| controller.ensure_on_world(access, &on_world)),
        );
        if submitted.is_err() {
            self.forget(&indicator);
            return;
        }

        indicator.stop_animation();
        let controller = Arc::clone(self);
        let ticking = Arc::clone(&indicator);
        let handle = self
            .clock
            .schedule_repeating(FRAME_INTERVAL, FRAME_INTERVAL, move || {
                controller.anim_tick(&ticking)
            });
        *lock(&indicator.anim) = Some(handle);
    }

    fn ensure_on_world(&self, access: &mut dyn WorldAccess, indicator: &Arc<Indicator>) {
        if !access.entity_valid(indicator.actor_entity) {
            // Actor vanished between the registry check and this task.
            if let Some(marker) = lock(&indicator.entity).take() {
                if access.entity_valid(marker) {
                    access.remove_entity(marker);
                }
            }
            self.forget(indicator);
            return;
        }
        let Some(anchor) = access.position(indicator.actor_entity) else {
            self.forget(indicator);
            return;
        };
        let above = anchor.offset_y(LABEL_OFFSET_Y);

        let current = *lock(&indicator.entity);
        match current {
            Some(marker) if access.entity_valid(marker) => {
                access.set_label_text(marker, FRAMES[0]);
                access.set_position(marker, above);
            }
            _ => {
                let marker = access.spawn_marker(MarkerSpec::labeled(above, FRAMES[0]));
                *lock(&indicator.entity) = Some(marker);
            }
        }
    }

    fn anim_tick(self: &Arc<Self>, indicator: &Arc<Indicator>) -> Flow {
        if self.gate.is_closed() {
            return Flow::Stop;
        }
        if !self.links.any_open() {
            debug!(actor = %indicator.actor, "no controller links, pausing indicator animation");
            return Flow::Stop;
        }
        // A later show() may have replaced this record; only the current
        // one gets to animate.
        let current = self
            .records
            .get(&indicator.actor)
            .map(|entry| Arc::ptr_eq(entry.value(), indicator))
            .unwrap_or(false);
        if !current {
            return Flow::Stop;
        }

        let controller = Arc::clone(self);
        let on_world = Arc::clone(indicator);
        let submitted = self.dispatcher.submit(
            &indicator.world,
            Box::new(move |access| controller.animate_on_world(access, &on_world)),
        );
        if submitted.is_err() {
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn animate_on_world(&self, access: &mut dyn WorldAccess, indicator: &Arc<Indicator>) {
        let Some(marker) = *lock(&indicator.entity) else {
            return;
        };
        if !access.entity_valid(marker) {
            // Marker culled by the engine. Stop animating but keep the
            // record so the next show() respawns it.
            indicator.stop_animation();
            *lock(&indicator.entity) = None;
            return;
        }
        if !access.entity_valid(indicator.actor_entity) {
            // Actor gone mid-animation. Blank the label in place; marker
            // and record stay for the owner's destroy or the next show.
            indicator.stop_animation();
            access.set_label_text(marker, "");
            return;
        }

        let frame = indicator.frame.fetch_add(1, Ordering::SeqCst);
        let next = frame.wrapping_add(1) % FRAMES.len();
        access.set_label_text(marker, FRAMES[next]);
        if let Some(anchor) = access.position(indicator.actor_entity) {
            access.set_position(marker, anchor.offset_y(LABEL_OFFSET_Y));
        }
    }

    /// Blank the indicator text without retiring the marker. The record
    /// survives so a later [`show`](Self::show) can reuse the entity.
    pub fn hide(&self, actor: &ActorId) {
        let Some(indicator) = self.records.get(actor).map(|e| Arc::clone(e.value())) else {
            return;
        };
        indicator.stop_animation();
        if self.gate.is_closed() {
            return;
        }
        let on_world = Arc::clone(&indicator);
        let _ = self.dispatcher.submit(
            &indicator.world,
            Box::new(move |access| {
                if let Some(marker) = *lock(&on_world.entity) {
                    if access.entity_valid(marker) {
                        access.set_label_text(marker, "");
                    }
                }
            }),
        );
    }

    /// Retire the indicator for good: stop the animation, drop the record
    /// and remove the marker entity.
    pub fn destroy(&self, actor: &ActorId) {
        let Some((_, indicator)) = self.records.remove(actor) else {
            return;
        };
        indicator.stop_animation();
        if self.gate.is_closed() {
            return;
        }
        let on_world = Arc::clone(&indicator);
        let _ = self.dispatcher.submit(
            &indicator.world,
            Box::new(move |access| {
                if let Some(marker) = lock(&on_world.entity).take() {
                    if access.entity_valid(marker) {
                        access.remove_entity(marker);
                    }
                }
            }),
        );
    }

    /// Drop the record and stop its animation without touching the world.
    /// Used from world-side tasks that already dealt with the entities.
    fn forget(&self, indicator: &Arc<Indicator>) {
        indicator.stop_animation();
        self.records
            .remove_if(&indicator.actor, |_, current| Arc::ptr_eq(current, indicator));
    }

    /// Scan every world for indicator markers that no live record claims
    /// and delete them. Returns the number of markers removed.
    ///
    /// Liveness is decided on each world's own thread at the moment the
    /// scan runs. A show() queued ahead of the scan has claimed its marker
    /// by then, so markers with an owner are never collected.
    ///
    /// Worlds that fail to answer within the scan budget are skipped; their
    /// zombies survive until the next sweep.
    pub fn sweep_zombies(self: &Arc<Self>) -> usize {
        let (tx, rx) = mpsc::channel::<usize>();
        let mut polled = 0usize;
        for name in self.engine.world_names() {
            let Some(world) = self.engine.world(&name) else {
                continue;
            };
            let controller = Arc::clone(self);
            let tx = tx.clone();
            let scan = Box::new(move |access: &mut dyn WorldAccess| {
                let live_here = controller.claimed_markers(&name);
                let mut removed = 0usize;
                for entity in access.entities() {
                    let EntityKind::Marker { label } = access.classify(entity) else {
                        continue;
                    };
                    if label.starts_with(FRAME_SIGNATURE)
                        && !live_here.contains(&entity)
                        && access.remove_entity(entity)
                    {
                        removed += 1;
                    }
                }
                let _ = tx.send(removed);
            });
            if self.dispatcher.submit(&world, scan).is_ok() {
                polled += 1;
            }
        }
        drop(tx);

        let deadline = Instant::now() + self.scan_wait;
        let mut total = 0usize;
        for _ in 0..polled {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(removed) => total += removed,
                Err(_) => {
                    warn!("indicator sweep ran out of budget before every world answered");
                    break;
                }
            }
        }
        if total > 0 {
            info!(removed = total, "swept zombie indicators");
        }
        total
    }

    /// Marker entities the records claim in `world` right now. Called from
    /// that world's own thread, so the answer is exact for its queue.
    fn claimed_markers(&self, world: &WorldName) -> HashSet<EntityId> {
        self.records
            .iter()
            .filter(|entry| entry.value().world_name == *world)
            .filter_map(|entry| *lock(&entry.value().entity))
            .collect()
    }

    /// Stop every animation task. Records are left in place.
    pub fn cancel_all_tasks(&self) {
        for entry in self.records.iter() {
            entry.value().stop_animation();
        }
    }

    /// Drop all records. Marker entities are left to the engine's own
    /// teardown; pair with [`sweep_zombies`](Self::sweep_zombies) on the
    /// next start if the engine outlives the director.
    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn active(&self) -> usize {
        self.records.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- frame table tests --------------------------------------------------

    #[test]
    fn every_frame_carries_the_sweep_signature() {
        for frame in FRAMES {
            assert!(frame.starts_with(FRAME_SIGNATURE));
        }
    }

    #[test]
    fn waypoint_labels_do_not_match_the_signature() {
        // Movement waypoints are unlabeled markers. The sweep must never
        // collect them.
        assert!(!"".starts_with(FRAME_SIGNATURE));
        assert!(!"waypoint".starts_with(FRAME_SIGNATURE));
    }

    #[test]
    fn frame_counter_cycles_through_all_three() {
        let counter = AtomicUsize::new(0);
        let mut seen = Vec::new();
        for _ in 0..6 {
            let frame = counter.fetch_add(1, Ordering::SeqCst);
            seen.push(FRAMES[frame.wrapping_add(1) % FRAMES.len()]);
        }
        assert_eq!(
            seen,
            vec![FRAMES[1], FRAMES[2], FRAMES[0], FRAMES[1], FRAMES[2], FRAMES[0]]
        );
    }
}
