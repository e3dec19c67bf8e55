//! Testing utilities for engines and pipelines.
//!
//! This module provides:
//! - Scripted modules that record their calls
//! - A harness wiring a registry, sink and cache into an engine
//! - Assertions over run and stage results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_run_completed, assert_run_status, assert_served_by, assert_stage_status,
};
pub use fixtures::TestHarness;
pub use mocks::ScriptedModule;
