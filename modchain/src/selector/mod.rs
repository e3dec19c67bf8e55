//! Candidate ranking and the fallback loop.

mod decision;
mod fallback;

pub use decision::{FallbackDecision, RankedCandidate};
pub use fallback::{FallbackSelector, SelectorConfig};
