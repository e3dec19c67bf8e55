//! Cooperative cancellation.
//!
//! A pipeline run owns a [`CancellationToken`]; each parallel stage group
//! gets a child token so a failing member can stop its siblings without
//! cancelling the run's caller.

mod token;

pub use token::{CancelCallback, CancellationToken};
