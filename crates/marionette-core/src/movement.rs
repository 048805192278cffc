//! Walk-to-point protocol: a waypoint marker on the actor's world, a
//! polling loop on the shared clock, and an exactly-once outcome.
//!
//! The walk itself is the engine's follow behavior chasing an intangible
//! marker; the controller only observes. Each poll runs on the world's own
//! thread, where it checks for arrival, for a stalled actor, and for the
//! absolute tick cap. Whatever happens first settles the ticket, cancels
//! the poll, and releases the actor and the marker exactly once.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use contracts::{ActorId, DirectorConfig, MoveFailure, MoveOutcome, Vec3};

use crate::dispatch::Dispatcher;
use crate::engine::{EntityId, MarkerSpec, RoleState, WorldAccess, WorldHandle};
use crate::lock;
use crate::registry::{ActorRecord, BusySet};
use crate::scheduler::{Flow, TaskHandle, TaskScheduler};
use crate::shutdown::ShutdownGate;

/// Squared distance at which a walk counts as arrived (3 units).
pub(crate) const ARRIVAL_DISTANCE_SQ: f64 = 9.0;
/// Squared displacement below which a poll counts as "no real progress"
/// (0.2 units).
pub(crate) const STUCK_EPSILON_SQ: f64 = 0.04;

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// Caller's half of one movement command. The outcome arrives exactly once;
/// the first successful read consumes it.
#[derive(Debug)]
pub struct MoveTicket {
    rx: mpsc::Receiver<MoveOutcome>,
}

impl MoveTicket {
    /// Block until the walk settles.
    pub fn wait(self) -> MoveOutcome {
        self.rx
            .recv()
            .unwrap_or(MoveOutcome::failure(MoveFailure::ShuttingDown))
    }

    /// Block up to `wait`. `None` means the walk is still in progress.
    pub fn wait_timeout(&self, wait: Duration) -> Option<MoveOutcome> {
        match self.rx.recv_timeout(wait) {
            Ok(outcome) => Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Some(MoveOutcome::failure(MoveFailure::ShuttingDown))
            }
        }
    }

    /// Non-blocking probe.
    pub fn try_outcome(&self) -> Option<MoveOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => {
                Some(MoveOutcome::failure(MoveFailure::ShuttingDown))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Progress anchor for stuck detection: where the actor last made real
/// progress, and when.
struct StuckAnchor {
    pos: Vec3,
    since: Instant,
}

/// One in-flight walk. Shared between the caller, the clock tick, and
/// world tasks; the `outcome_tx` slot is the settle-once gate.
struct MoveSession {
    actor: ActorId,
    entity: EntityId,
    world: Arc<dyn WorldHandle>,
    target: Vec3,
    ticks: AtomicU32,
    marker: OnceLock<EntityId>,
    poll: OnceLock<TaskHandle>,
    anchor: Mutex<Option<StuckAnchor>>,
    outcome_tx: Mutex<Option<mpsc::SyncSender<MoveOutcome>>>,
}

// ---------------------------------------------------------------------------
// MovementController
// ---------------------------------------------------------------------------

pub struct MovementController {
    sessions: DashMap<ActorId, Arc<MoveSession>>,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<TaskScheduler>,
    busy: Arc<BusySet>,
    gate: ShutdownGate,
    poll_interval: Duration,
    stuck_window: Duration,
    tick_cap: u32,
}

impl MovementController {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        clock: Arc<TaskScheduler>,
        busy: Arc<BusySet>,
        gate: ShutdownGate,
        config: &DirectorConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            dispatcher,
            clock,
            busy,
            gate,
            poll_interval: config.move_poll_interval(),
            stuck_window: config.move_stuck_window(),
            tick_cap: config.move_tick_cap,
        }
    }

    /// Begin a walk. Always returns a ticket; failures that prevent the
    /// walk from ever starting settle the ticket immediately.
    pub fn start(
        self: &Arc<Self>,
        record: &ActorRecord,
        world: Arc<dyn WorldHandle>,
        target: Vec3,
    ) -> MoveTicket {
        let (tx, rx) = mpsc::sync_channel(1);
        let ticket = MoveTicket { rx };
        let session = Arc::new(MoveSession {
            actor: record.instance_id,
            entity: record.entity,
            world,
            target,
            ticks: AtomicU32::new(0),
            marker: OnceLock::new(),
            poll: OnceLock::new(),
            anchor: Mutex::new(None),
            outcome_tx: Mutex::new(Some(tx)),
        });

        if self.gate.is_closed() {
            self.finish(&session, MoveOutcome::failure(MoveFailure::ShuttingDown));
            return ticket;
        }

        // The newest command owns the actor. The displaced session settles
        // first so its cleanup lands on the world queue ahead of our setup.
        if let Some(previous) = self
            .sessions
            .insert(record.instance_id, Arc::clone(&session))
        {
            debug!(actor = %record.instance_id, "walk superseded by a newer command");
            self.finish(&previous, MoveOutcome::failure(MoveFailure::Superseded));
        }
        self.busy.mark(record.instance_id);

        let setup = {
            let controller = Arc::clone(self);
            let session = Arc::clone(&session);
            Box::new(move |access: &mut dyn WorldAccess| {
                controller.stage_on_world(access, &session);
            })
        };
        if let Err(err) = self.dispatcher.submit(&session.world, setup) {
            debug!(actor = %session.actor, %err, "walk setup not dispatched");
            self.finish(
                &session,
                MoveOutcome::failure(MoveFailure::DomainUnavailable),
            );
            return ticket;
        }

        let poll = {
            let controller = Arc::clone(self);
            let session = Arc::clone(&session);
            self.clock
                .schedule_repeating(self.poll_interval, self.poll_interval, move || {
                    controller.poll_tick(&session)
                })
        };
        // If the session already settled, the first tick's liveness check
        // stops the orphaned poll.
        let _ = session.poll.set(poll);

        ticket
    }

    /// Number of walks currently in flight.
    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    // -- world-side stages --------------------------------------------------

    /// Runs on the world thread: spawn the waypoint marker and point the
    /// engine's follow behavior at it.
    fn stage_on_world(self: &Arc<Self>, access: &mut dyn WorldAccess, session: &Arc<MoveSession>) {
        if !access.entity_valid(session.entity) {
            self.finish_on_world(
                access,
                session,
                MoveOutcome::failure(MoveFailure::EntityLost),
            );
            return;
        }

        let marker = access.spawn_marker(MarkerSpec::waypoint(session.target));
        let _ = session.marker.set(marker);

        // Drop whatever the actor was doing, then lock onto the waypoint.
        access.set_role_state(session.entity, RoleState::Idle);
        access.set_interaction_target(session.entity, Some(marker));
        access.set_role_state(session.entity, RoleState::Follow);

        if let Some(pos) = access.position(session.entity) {
            *lock(&session.anchor) = Some(StuckAnchor {
                pos,
                since: Instant::now(),
            });
        }
    }

    /// Runs on the clock thread: checks liveness, counts the tick, and
    /// sends the real survey to the world.
    fn poll_tick(self: &Arc<Self>, session: &Arc<MoveSession>) -> Flow {
        if self.gate.is_closed() {
            self.finish(session, MoveOutcome::failure(MoveFailure::ShuttingDown));
            return Flow::Stop;
        }

        let current = match self.sessions.get(&session.actor) {
            Some(entry) => Arc::ptr_eq(entry.value(), session),
            None => false,
        };
        if !current {
            return Flow::Stop;
        }

        let tick = session.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let survey = {
            let controller = Arc::clone(self);
            let session = Arc::clone(session);
            Box::new(move |access: &mut dyn WorldAccess| {
                controller.survey_on_world(access, &session, tick);
            })
        };
        if let Err(err) = self.dispatcher.submit(&session.world, survey) {
            debug!(actor = %session.actor, %err, "walk poll not dispatched");
            self.finish(
                session,
                MoveOutcome::failure(MoveFailure::DomainUnavailable),
            );
            return Flow::Stop;
        }

        Flow::Continue
    }

    /// Runs on the world thread: the per-tick arrival / stuck / cap check.
    fn survey_on_world(
        self: &Arc<Self>,
        access: &mut dyn WorldAccess,
        session: &Arc<MoveSession>,
        tick: u32,
    ) {
        if !access.entity_valid(session.entity) {
            self.finish_on_world(
                access,
                session,
                MoveOutcome::failure(MoveFailure::EntityLost),
            );
            return;
        }
        let Some(pos) = access.position(session.entity) else {
            self.finish_on_world(
                access,
                session,
                MoveOutcome::failure(MoveFailure::EntityLost),
            );
            return;
        };

        if tick > self.tick_cap {
            self.finish_on_world(access, session, MoveOutcome::TimedOut { last_seen: Some(pos) });
            return;
        }

        if pos.distance_sq(session.target) <= ARRIVAL_DISTANCE_SQ {
            self.finish_on_world(access, session, MoveOutcome::Arrived { at: pos });
            return;
        }

        let stalled = {
            let mut anchor = lock(&session.anchor);
            match anchor.as_mut() {
                None => {
                    *anchor = Some(StuckAnchor {
                        pos,
                        since: Instant::now(),
                    });
                    false
                }
                Some(a) if a.pos.distance_sq(pos) > STUCK_EPSILON_SQ => {
                    a.pos = pos;
                    a.since = Instant::now();
                    false
                }
                Some(a) => a.since.elapsed() >= self.stuck_window,
            }
        };
        if stalled {
            self.finish_on_world(access, session, MoveOutcome::TimedOut { last_seen: Some(pos) });
        }
    }

    // -- settlement ---------------------------------------------------------

    /// Claim the right to settle this session. Exactly one caller per
    /// session gets the sender back; everyone else sees a no-op.
    fn begin_settle(&self, session: &Arc<MoveSession>) -> Option<mpsc::SyncSender<MoveOutcome>> {
        let tx = lock(&session.outcome_tx).take()?;

        if let Some(poll) = session.poll.get() {
            poll.cancel();
        }
        // Only the current map occupant clears the busy mark; a superseded
        // session's successor still owns the actor.
        let owned = self
            .sessions
            .remove_if(&session.actor, |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if owned {
            self.busy.clear(&session.actor);
        }
        Some(tx)
    }

    /// Settle from outside the world thread. Entity cleanup is dispatched
    /// separately, and skipped entirely once the gate is closed.
    fn finish(&self, session: &Arc<MoveSession>, outcome: MoveOutcome) {
        let Some(tx) = self.begin_settle(session) else {
            return;
        };

        if !self.gate.is_closed() {
            let entity = session.entity;
            let marker = session.marker.get().copied();
            let cleanup = Box::new(move |access: &mut dyn WorldAccess| {
                release_walk(access, entity, marker);
            });
            if let Err(err) = self.dispatcher.submit(&session.world, cleanup) {
                debug!(actor = %session.actor, %err, "walk cleanup not dispatched");
            }
        }

        debug!(actor = %session.actor, ?outcome, "walk settled");
        let _ = tx.send(outcome);
    }

    /// Settle from inside a world task, cleaning up inline.
    fn finish_on_world(
        &self,
        access: &mut dyn WorldAccess,
        session: &Arc<MoveSession>,
        outcome: MoveOutcome,
    ) {
        let Some(tx) = self.begin_settle(session) else {
            return;
        };

        release_walk(access, session.entity, session.marker.get().copied());
        debug!(actor = %session.actor, ?outcome, "walk settled");
        let _ = tx.send(outcome);
    }

    // -- teardown -----------------------------------------------------------

    /// First teardown step: stop the polls without settling anything yet.
    pub fn cancel_all_tasks(&self) {
        for entry in self.sessions.iter() {
            if let Some(poll) = entry.value().poll.get() {
                poll.cancel();
            }
        }
    }

    /// Settle every outstanding walk as shutting down. The gate is already
    /// closed, so no entity cleanup is attempted.
    pub fn settle_all_shutting_down(&self) {
        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for session in sessions {
            self.finish(&session, MoveOutcome::failure(MoveFailure::ShuttingDown));
        }
    }
}

/// Return the actor to idle and take the waypoint marker out of the world.
fn release_walk(access: &mut dyn WorldAccess, entity: EntityId, marker: Option<EntityId>) {
    if access.entity_valid(entity) {
        access.set_interaction_target(entity, None);
        access.set_role_state(entity, RoleState::Idle);
    }
    if let Some(marker) = marker {
        if access.entity_valid(marker) {
            access.remove_entity(marker);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ticket_stays_pending_until_the_outcome_lands() {
        let (tx, rx) = mpsc::sync_channel(1);
        let ticket = MoveTicket { rx };

        assert!(ticket.try_outcome().is_none());
        assert!(ticket.wait_timeout(Duration::from_millis(20)).is_none());

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            tx.send(MoveOutcome::Arrived {
                at: Vec3::new(9.0, 0.0, 0.0),
            })
            .unwrap();
        });

        let outcome = ticket.wait();
        assert!(outcome.arrived());
    }

    #[test]
    fn vanished_sender_reads_as_shutting_down() {
        let (tx, rx) = mpsc::sync_channel::<MoveOutcome>(1);
        let ticket = MoveTicket { rx };
        drop(tx);

        assert_eq!(
            ticket.wait(),
            MoveOutcome::failure(MoveFailure::ShuttingDown)
        );
    }

    #[test]
    fn stuck_epsilon_matches_point_two_units() {
        // 0.2 units of travel is the smallest move that counts as progress.
        let a = Vec3::new(0.0, 0.0, 0.0);
        let crawl = Vec3::new(0.19, 0.0, 0.0);
        let step = Vec3::new(0.21, 0.0, 0.0);
        assert!(a.distance_sq(crawl) <= STUCK_EPSILON_SQ);
        assert!(a.distance_sq(step) > STUCK_EPSILON_SQ);
    }
}
