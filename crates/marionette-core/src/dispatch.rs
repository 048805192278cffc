//! World resolution and the dispatch facade.
//!
//! Every command by every caller funnels through here: the router decides
//! *which* world context may run it (home world first, then the logged
//! fallback to the default world), and the dispatcher moves work onto that
//! context, with bounded, breaker-guarded waits for synchronous reads.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use contracts::{DirectorConfig, DirectorError, WorldName};

use crate::breaker::CircuitBreaker;
use crate::engine::{SimulationEngine, WorldAccess, WorldHandle, WorldTask};
use crate::shutdown::ShutdownGate;

// ---------------------------------------------------------------------------
// WorldRouter
// ---------------------------------------------------------------------------

/// Maps an actor's home world to a live execution context.
pub struct WorldRouter {
    engine: Arc<dyn SimulationEngine>,
    default_world: Option<WorldName>,
    fall_back: bool,
}

impl WorldRouter {
    pub fn new(engine: Arc<dyn SimulationEngine>, config: &DirectorConfig) -> Self {
        Self {
            engine,
            default_world: config.default_world.clone(),
            fall_back: config.fall_back_to_default_world,
        }
    }

    /// Resolve a command's execution context. Order is fixed: the home
    /// world if it still exists, else the default world (when fallback is
    /// enabled), else failure. Both non-primary paths are logged.
    pub fn resolve(&self, home: &WorldName) -> Result<Arc<dyn WorldHandle>, DirectorError> {
        if let Some(world) = self.engine.world(home) {
            return Ok(world);
        }

        if self.fall_back {
            if let Some(fallback) = &self.default_world {
                if fallback != home {
                    if let Some(world) = self.engine.world(fallback) {
                        warn!(
                            home = %home,
                            fallback = %fallback,
                            "home world gone; dispatching to default world"
                        );
                        return Ok(world);
                    }
                }
            }
        }

        warn!(home = %home, "no usable world for dispatch");
        Err(DirectorError::DomainUnavailable(home.clone()))
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Shutdown-aware task submission plus bounded synchronous reads.
pub struct Dispatcher {
    gate: ShutdownGate,
    read_timeout: Duration,
    trip_threshold: u32,
    breakers: DashMap<WorldName, Arc<CircuitBreaker>>,
}

impl Dispatcher {
    pub fn new(gate: ShutdownGate, config: &DirectorConfig) -> Self {
        Self {
            gate,
            read_timeout: config.sync_read_timeout(),
            trip_threshold: config.breaker_trip_threshold,
            breakers: DashMap::new(),
        }
    }

    /// Fire-and-forget submission. Refused during teardown and by closed
    /// world contexts; both turn into `DomainUnavailable`.
    pub fn submit(
        &self,
        world: &Arc<dyn WorldHandle>,
        task: WorldTask,
    ) -> Result<(), DirectorError> {
        if self.gate.is_closed() {
            debug!(world = %world.name(), "dispatch refused: shutting down");
            return Err(DirectorError::DomainUnavailable(world.name().clone()));
        }

        world.submit(task).map_err(|err| {
            debug!(world = %world.name(), %err, "dispatch refused by world");
            DirectorError::DomainUnavailable(world.name().clone())
        })
    }

    /// Submit `read` and block the calling thread for its value, at most
    /// `wait`. A dropped-unrun task (context closed mid-queue) reports
    /// `DomainUnavailable`, not `Timeout`.
    ///
    /// Every bounded dispatch feeds the world's breaker: a timeout extends
    /// the consecutive run, any success resets it to zero and closes an
    /// open breaker.
    pub fn await_value<T, F>(
        &self,
        world: &Arc<dyn WorldHandle>,
        wait: Duration,
        read: F,
    ) -> Result<T, DirectorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WorldAccess) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        self.submit(
            world,
            Box::new(move |access| {
                let _ = tx.send(read(access));
            }),
        )?;

        match rx.recv_timeout(wait) {
            Ok(value) => {
                self.breaker(world.name()).record_success();
                Ok(value)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let run = self.breaker(world.name()).record_timeout();
                if run == self.trip_threshold + 1 {
                    warn!(
                        world = %world.name(),
                        consecutive = run,
                        "world stopped answering; breaker open"
                    );
                }
                Err(DirectorError::Timeout(world.name().clone()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(DirectorError::DomainUnavailable(world.name().clone()))
            }
        }
    }

    /// Breaker-guarded synchronous read at the configured short timeout.
    /// An open breaker fails fast without submitting anything.
    pub fn read<T, F>(&self, world: &Arc<dyn WorldHandle>, read: F) -> Result<T, DirectorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn WorldAccess) -> T + Send + 'static,
    {
        if !self.breaker(world.name()).allows_read() {
            debug!(world = %world.name(), "read short-circuited: breaker open");
            return Err(DirectorError::Timeout(world.name().clone()));
        }
        self.await_value(world, self.read_timeout, read)
    }

    /// The breaker for one world, created on first use.
    pub fn breaker(&self, world: &WorldName) -> Arc<CircuitBreaker> {
        let entry = self
            .breakers
            .entry(world.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.trip_threshold)));
        Arc::clone(entry.value())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
