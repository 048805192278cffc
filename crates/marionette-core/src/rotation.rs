//! Face-a-point protocol: a short, fire-and-forget easing loop that turns
//! an actor toward a target without ever reporting back.
//!
//! Each step closes 15% of the remaining angular difference along the
//! shorter arc. The loop backs off silently whenever something more
//! important owns the actor (follow, attack, a locked target), when the
//! entity disappears, or when the tick budget runs out.

use std::f64::consts::{PI, TAU};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use contracts::{ActorId, Vec3};

use crate::dispatch::Dispatcher;
use crate::engine::{EntityId, RoleState, WorldAccess, WorldHandle};
use crate::registry::ActorRecord;
use crate::scheduler::{Flow, TaskHandle, TaskScheduler};
use crate::shutdown::ShutdownGate;

pub(crate) const TICK_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const TICK_BUDGET: u32 = 15;
/// Fraction of the remaining difference closed per step.
pub(crate) const STEP_FRACTION: f64 = 0.15;
/// Remaining difference below which the actor counts as facing the target.
pub(crate) const ALIGNED_EPSILON: f64 = 0.20;
/// Squared horizontal displacement below which there is nothing to face.
pub(crate) const MIN_DISPLACEMENT_SQ: f64 = 0.01;

/// Fold an angle into the half-open range (-PI, PI]. The sign of the
/// result is the direction of the shorter arc.
pub fn normalize_angle(angle: f64) -> f64 {
    let mut folded = angle % TAU;
    if folded <= -PI {
        folded += TAU;
    } else if folded > PI {
        folded -= TAU;
    }
    folded
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

struct RotationSession {
    actor: ActorId,
    entity: EntityId,
    world: Arc<dyn WorldHandle>,
    target: Vec3,
    /// Computed on the world thread from live positions, then fixed.
    target_heading: OnceLock<f64>,
    ticks_left: AtomicU32,
    task: OnceLock<TaskHandle>,
}

// ---------------------------------------------------------------------------
// RotationController
// ---------------------------------------------------------------------------

pub struct RotationController {
    sessions: DashMap<ActorId, Arc<RotationSession>>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<TaskScheduler>,
    gate: ShutdownGate,
}

impl RotationController {
    pub fn new(dispatcher: Arc<Dispatcher>, clock: Arc<TaskScheduler>, gate: ShutdownGate) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher,
            clock,
            gate,
        }
    }

    /// Start turning an actor toward `target`. No result ever reaches the
    /// caller; every failure mode ends the loop quietly.
    pub fn start(self: &Arc<Self>, record: &ActorRecord, world: Arc<dyn WorldHandle>, target: Vec3) {
        if self.gate.is_closed() {
            return;
        }

        let session = Arc::new(RotationSession {
            actor: record.instance_id,
            entity: record.entity,
            world,
            target,
            target_heading: OnceLock::new(),
            ticks_left: AtomicU32::new(TICK_BUDGET),
            task: OnceLock::new(),
        });

        if let Some(previous) = self
            .sessions
            .insert(record.instance_id, Arc::clone(&session))
        {
            if let Some(task) = previous.task.get() {
                task.cancel();
            }
        }

        let stage = {
            let controller = Arc::clone(self);
            let session = Arc::clone(&session);
            Box::new(move |access: &mut dyn WorldAccess| {
                controller.stage_on_world(access, &session);
            })
        };
        if self.dispatcher.submit(&session.world, stage).is_err() {
            self.discard(&session, "stage dispatch failed");
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    /// Runs on the world thread: compute the goal heading from live
    /// positions and arm the stepping task.
    fn stage_on_world(self: &Arc<Self>, access: &mut dyn WorldAccess, session: &Arc<RotationSession>) {
        if !access.entity_valid(session.entity) {
            self.discard(session, "entity gone before staging");
            return;
        }
        let Some(pos) = access.position(session.entity) else {
            self.discard(session, "entity gone before staging");
            return;
        };

        if pos.horizontal_distance_sq(session.target) < MIN_DISPLACEMENT_SQ {
            self.discard(session, "target too close to face");
            return;
        }

        let goal = (session.target.z - pos.z).atan2(session.target.x - pos.x);
        let _ = session.target_heading.set(goal);

        let task = {
            let controller = Arc::clone(self);
            let session = Arc::clone(session);
            self.clock
                .schedule_repeating(TICK_INTERVAL, TICK_INTERVAL, move || {
                    controller.step_tick(&session)
                })
        };
        let _ = session.task.set(task);
    }

    /// Runs on the clock thread: liveness and budget, then one step on the
    /// world.
    fn step_tick(self: &Arc<Self>, session: &Arc<RotationSession>) -> Flow {
        if self.gate.is_closed() {
            self.discard(session, "shutting down");
            return Flow::Stop;
        }

        let current = match self.sessions.get(&session.actor) {
            Some(entry) => Arc::ptr_eq(entry.value(), session),
            None => false,
        };
        if !current {
            return Flow::Stop;
        }

        let left = session.ticks_left.load(Ordering::SeqCst);
        if left == 0 {
            self.discard(session, "tick budget exhausted");
            return Flow::Stop;
        }
        session.ticks_left.store(left - 1, Ordering::SeqCst);

        let step = {
            let controller = Arc::clone(self);
            let session = Arc::clone(session);
            Box::new(move |access: &mut dyn WorldAccess| {
                controller.step_on_world(access, &session);
            })
        };
        if self.dispatcher.submit(&session.world, step).is_err() {
            self.discard(session, "step dispatch failed");
            return Flow::Stop;
        }

        Flow::Continue
    }

    /// Runs on the world thread: apply one easing step or bow out.
    fn step_on_world(&self, access: &mut dyn WorldAccess, session: &Arc<RotationSession>) {
        if !access.entity_valid(session.entity) {
            self.discard(session, "entity gone mid-turn");
            return;
        }

        let engaged = access
            .role_state(session.entity)
            .map_or(false, RoleState::is_engaged);
        if engaged || access.interaction_target(session.entity).is_some() {
            self.discard(session, "actor engaged elsewhere");
            return;
        }

        let (Some(goal), Some(current)) = (
            session.target_heading.get().copied(),
            access.heading(session.entity),
        ) else {
            self.discard(session, "no heading available");
            return;
        };

        let diff = normalize_angle(goal - current);
        if diff.abs() < ALIGNED_EPSILON {
            self.discard(session, "aligned");
            return;
        }

        access.set_heading(
            session.entity,
            normalize_angle(current + STEP_FRACTION * diff),
        );
    }

    /// End a session without telling anyone. Safe to call from any thread,
    /// any number of times.
    fn discard(&self, session: &Arc<RotationSession>, reason: &'static str) {
        if let Some(task) = session.task.get() {
            task.cancel();
        }
        let removed = self
            .sessions
            .remove_if(&session.actor, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            debug!(actor = %session.actor, reason, "rotation ended");
        }
    }

    // -- teardown -----------------------------------------------------------

    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            if let Some(task) = entry.value().task.get() {
                task.cancel();
            }
        }
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_into_half_open_range() {
        assert!((normalize_angle(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-12);
        assert!((normalize_angle(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-12);
        assert_eq!(normalize_angle(PI), PI);
        assert_eq!(normalize_angle(-PI), PI);
        assert_eq!(normalize_angle(0.0), 0.0);
    }

    #[test]
    fn steps_converge_within_the_budget() {
        let goal = 1.5f64;
        let mut heading = 0.0f64;
        let mut steps = 0;
        while steps < TICK_BUDGET && normalize_angle(goal - heading).abs() >= ALIGNED_EPSILON {
            heading += STEP_FRACTION * normalize_angle(goal - heading);
            steps += 1;
        }
        assert!(normalize_angle(goal - heading).abs() < ALIGNED_EPSILON);
        assert!(steps < TICK_BUDGET, "1.5 rad aligns before the budget runs out");
    }

    #[test]
    fn steps_take_the_shorter_arc_across_the_seam() {
        // From +3.0 rad to -3.0 rad the short way is through PI, not zero.
        let diff = normalize_angle(-3.0 - 3.0);
        assert!(diff > 0.0, "short arc is the positive direction");
        assert!((diff - (TAU - 6.0)).abs() < 1e-12);
    }
}
