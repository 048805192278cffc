//! Orchestration layer between an external NPC controller and the
//! simulation engine's single-threaded worlds.
//!
//! The controller speaks in instance ids and world coordinates; the engine
//! only accepts work on each world's own execution context. This crate owns
//! the translation: a registry of tracked actors, a shared clock for the
//! periodic protocol ticks, and per-concern controllers for movement,
//! rotation, thinking indicators and respawns, all behind [`NpcDirector`].
//!
//! Every public entry point is callable from any thread. Entity state is
//! only ever touched inside a task submitted to the owning world.

pub mod breaker;
pub mod director;
pub mod dispatch;
pub mod engine;
pub mod indicator;
pub mod movement;
pub mod registry;
pub mod respawn;
pub mod rotation;
pub mod scheduler;
pub mod shutdown;

#[cfg(test)]
mod testutil;

pub use director::NpcDirector;
pub use movement::MoveTicket;

/// Mutex lock that shrugs off poisoning. Critical sections here are short
/// slot reads and writes; a panicking holder cannot leave them half done.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
