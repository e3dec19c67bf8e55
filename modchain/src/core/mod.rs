//! Core domain model types for modchain.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Circuit, stage and run status enums
//! - Declared data kinds for stage payloads
//! - Attempt records and observability events

mod attempt;
mod event;
mod kind;
mod status;

pub use attempt::{AttemptRecord, FailureKind};
pub use event::EngineEvent;
pub use kind::DataKind;
pub use status::{CircuitState, RunStatus, StageStatus};
