//! Ranked candidate lists.

use serde::Serialize;

/// One eligible module with the parts of its composite score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    /// The module id.
    pub module_id: String,
    /// Final ranking score.
    pub composite: f64,
    /// Health score (or descriptor prior) used.
    pub health: f64,
    /// Declared reliability used.
    pub reliability: f64,
    /// Recency bonus used.
    pub recency: f64,
    /// Sum of matching rule adjustments.
    pub rule_adjustment: f64,
}

/// The ranked candidates for one category and exclusion set.
///
/// Built fresh for every selection; never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackDecision {
    /// The category being served.
    pub category: String,
    /// Candidates, best first.
    pub candidates: Vec<RankedCandidate>,
}

impl FallbackDecision {
    /// Returns the best candidate.
    #[must_use]
    pub fn best(&self) -> Option<&RankedCandidate> {
        self.candidates.first()
    }

    /// Returns the candidate ids in rank order.
    #[must_use]
    pub fn module_ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.module_id.as_str()).collect()
    }

    /// Returns the number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Returns true if nothing is eligible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
