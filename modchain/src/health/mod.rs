//! Module health tracking and circuit breaking.
//!
//! Both the [`HealthTracker`] and the [`CircuitBreaker`] operate on one
//! shared [`HealthArena`], so a module's outcome history and its circuit
//! live side by side in a single lock-guarded slot.

mod arena;
mod breaker;
mod record;
mod tracker;

pub use arena::HealthArena;
pub use breaker::{AttemptDecision, BreakerConfig, CircuitBreaker};
pub use record::{CircuitPhase, HealthRecord, ModuleSlot};
pub use tracker::{HealthConfig, HealthSnapshot, HealthTracker};
