//! Cross-boundary contracts between the director, the simulation engine,
//! and embedding callers: ids, geometry, behavior data, command outcomes,
//! and the shared error taxonomy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Caller-visible identity of one spawned actor instance. Minted by the
/// director, never by the engine; engine entity handles stay internal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Mint a new random instance id.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External identity of an actor *type*, shared by every instance of that
/// type. Respawn scheduling and discovery operate on type ids.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ActorTypeId(pub String);

impl ActorTypeId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of one simulation world. Each world owns an exclusive
/// single-threaded execution context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct WorldName(pub String);

impl WorldName {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A point in world space. Y is the vertical axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance. Arrival and stuck checks compare against
    /// squared thresholds, so the root is never taken on hot paths.
    pub fn distance_sq(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Squared distance in the horizontal plane only.
    pub fn horizontal_distance_sq(self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        dx * dx + dz * dz
    }

    pub fn offset_y(self, dy: f64) -> Self {
        Self::new(self.x, self.y + dy, self.z)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// A world plus a point inside it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub world: WorldName,
    pub pos: Vec3,
}

impl Location {
    pub fn new(world: WorldName, pos: Vec3) -> Self {
        Self { world, pos }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.world, self.pos)
    }
}

// ---------------------------------------------------------------------------
// Behavior data
// ---------------------------------------------------------------------------

/// Static per-type behavior data applied to every spawned instance and
/// reapplied on respawn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BehaviorProfile {
    pub display_name: String,
    pub invulnerable: bool,
    pub knockback_immune: bool,
}

impl BehaviorProfile {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Self::default()
        }
    }
}

impl Default for BehaviorProfile {
    /// Controller-driven actors are shielded from world damage and
    /// knockback unless the profile says otherwise.
    fn default() -> Self {
        Self {
            display_name: String::new(),
            invulnerable: true,
            knockback_immune: true,
        }
    }
}

/// Which attack style an attack command engages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Melee,
    Ranged,
}

// ---------------------------------------------------------------------------
// Movement outcomes
// ---------------------------------------------------------------------------

/// Final state of one movement command. Delivered exactly once per command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// The actor came within arrival range of the target point.
    Arrived { at: Vec3 },
    /// The walk was abandoned: no progress inside the stuck window, or the
    /// absolute tick cap ran out.
    TimedOut { last_seen: Option<Vec3> },
    /// The walk never completed for a non-timeout reason.
    Failed { reason: MoveFailure },
}

impl MoveOutcome {
    pub fn arrived(&self) -> bool {
        matches!(self, MoveOutcome::Arrived { .. })
    }

    pub fn failure(reason: MoveFailure) -> Self {
        MoveOutcome::Failed { reason }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MoveFailure {
    /// The tracked entity handle went stale mid-walk.
    EntityLost,
    /// A newer movement command replaced this one.
    Superseded,
    /// The actor's world refused the dispatch.
    DomainUnavailable,
    /// Director teardown settled the walk before it finished.
    ShuttingDown,
}

impl fmt::Display for MoveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MoveFailure::EntityLost => "entity_lost",
            MoveFailure::Superseded => "superseded",
            MoveFailure::DomainUnavailable => "domain_unavailable",
            MoveFailure::ShuttingDown => "shutting_down",
        };
        write!(f, "{text}")
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Error surface shared by every director command. Background protocol
/// failures are folded into outcomes or logs instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorError {
    /// The instance id is not in the registry.
    NotTracked(ActorId),
    /// The registry entry existed but its entity handle is stale; the entry
    /// has been pruned.
    EntityInvalid(ActorId),
    /// No usable world: home world gone and fallback disabled or also gone,
    /// or dispatch was refused (teardown, closed context).
    DomainUnavailable(WorldName),
    /// A bounded synchronous read expired, or the world's circuit breaker
    /// is open.
    Timeout(WorldName),
    /// The engine does not expose the requested protocol or actor type.
    Unsupported(&'static str),
}

impl fmt::Display for DirectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectorError::NotTracked(id) => write!(f, "no tracked actor with id {id}"),
            DirectorError::EntityInvalid(id) => {
                write!(f, "entity handle for actor {id} is no longer valid")
            }
            DirectorError::DomainUnavailable(world) => {
                write!(f, "world '{world}' is unavailable for dispatch")
            }
            DirectorError::Timeout(world) => {
                write!(f, "synchronous read against world '{world}' timed out")
            }
            DirectorError::Unsupported(what) => write!(f, "engine does not support {what}"),
        }
    }
}

impl std::error::Error for DirectorError {}

// ---------------------------------------------------------------------------
// Director configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the director. The defaults mirror the live protocol
/// timings; tests shrink them to keep wall-clock time down.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DirectorConfig {
    /// World used when an actor's home world no longer exists.
    pub default_world: Option<WorldName>,
    /// When false, commands for actors whose home world is gone fail with
    /// `DomainUnavailable` instead of falling back.
    pub fall_back_to_default_world: bool,
    /// Upper bound on any synchronous read against a world context.
    pub sync_read_timeout_ms: u64,
    /// Consecutive dispatch timeouts tolerated per world before its
    /// breaker opens. Strictly more than this many trips the breaker.
    pub breaker_trip_threshold: u32,
    /// How long a spawn command may wait for the world to confirm.
    pub spawn_wait_ms: u64,
    /// Upper bound on follow/attack engagement setup. These dispatches go
    /// out even while the world's breaker is open.
    pub engage_wait_ms: u64,
    /// Wall-clock budget for whole-world scans (discovery, zombie sweeps).
    pub scan_wait_ms: u64,
    /// Cadence of the movement polling loop.
    pub move_poll_interval_ms: u64,
    /// A walk with no progress beyond the stuck epsilon for this long is
    /// abandoned.
    pub move_stuck_window_ms: u64,
    /// Absolute cap on movement polls per command.
    pub move_tick_cap: u32,
    /// Cadence of the lazy respawn checker.
    pub respawn_check_interval_ms: u64,
}

impl DirectorConfig {
    pub fn sync_read_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_read_timeout_ms)
    }

    pub fn spawn_wait(&self) -> Duration {
        Duration::from_millis(self.spawn_wait_ms)
    }

    pub fn engage_wait(&self) -> Duration {
        Duration::from_millis(self.engage_wait_ms)
    }

    pub fn scan_wait(&self) -> Duration {
        Duration::from_millis(self.scan_wait_ms)
    }

    pub fn move_poll_interval(&self) -> Duration {
        Duration::from_millis(self.move_poll_interval_ms)
    }

    pub fn move_stuck_window(&self) -> Duration {
        Duration::from_millis(self.move_stuck_window_ms)
    }

    pub fn respawn_check_interval(&self) -> Duration {
        Duration::from_millis(self.respawn_check_interval_ms)
    }
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            default_world: None,
            fall_back_to_default_world: true,
            sync_read_timeout_ms: 100,
            breaker_trip_threshold: 10,
            spawn_wait_ms: 1_000,
            engage_wait_ms: 500,
            scan_wait_ms: 2_000,
            move_poll_interval_ms: 250,
            move_stuck_window_ms: 3_000,
            move_tick_cap: 1_200,
            respawn_check_interval_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_sq_matches_hand_computation() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(4.0, 2.0, -1.0);
        assert_eq!(a.distance_sq(b), 9.0 + 16.0);
        assert_eq!(a.horizontal_distance_sq(b), 9.0 + 16.0);

        let c = Vec3::new(1.0, 10.0, 3.0);
        assert_eq!(a.distance_sq(c), 64.0);
        assert_eq!(a.horizontal_distance_sq(c), 0.0);
    }

    #[test]
    fn move_outcome_serializes_with_outcome_tag() {
        let outcome = MoveOutcome::Arrived {
            at: Vec3::new(9.0, 0.0, 0.0),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "arrived");
        assert_eq!(json["at"]["x"], 9.0);

        let back: MoveOutcome = serde_json::from_value(json).unwrap();
        assert!(back.arrived());
    }

    #[test]
    fn failed_outcome_round_trips_reason() {
        let outcome = MoveOutcome::failure(MoveFailure::Superseded);
        let json = serde_json::to_string(&outcome).unwrap();
        let back: MoveOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn config_defaults_cover_missing_fields() {
        let config: DirectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, DirectorConfig::default());
        assert_eq!(config.sync_read_timeout(), Duration::from_millis(100));
        assert!(config.fall_back_to_default_world);
    }

    #[test]
    fn behavior_profile_defaults_to_protected() {
        let profile = BehaviorProfile::named("Village Guide");
        assert_eq!(profile.display_name, "Village Guide");
        assert!(profile.invulnerable);
        assert!(profile.knockback_immune);
    }

    #[test]
    fn actor_ids_are_unique_and_display_as_uuid() {
        let a = ActorId::fresh();
        let b = ActorId::fresh();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);
    }
}
