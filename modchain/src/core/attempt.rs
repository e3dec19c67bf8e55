//! Records of individual module attempts.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a single candidate attempt did not produce a stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The circuit refused the call or no executor was registered.
    Unavailable,
    /// The module returned an error.
    Execution,
    /// The module exceeded its time budget.
    Timeout,
    /// The stage input could not be adapted to the declared input kind.
    Transform,
    /// The attempt was abandoned because the stage was cancelled.
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::Execution => write!(f, "execution"),
            Self::Timeout => write!(f, "timeout"),
            Self::Transform => write!(f, "transform"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One failed attempt within a stage's fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// The module tried. Empty for transform failures, which happen before
    /// any module is chosen.
    pub module_id: String,
    /// The failure category.
    pub kind: FailureKind,
    /// The specific failure reason.
    pub reason: String,
}

impl AttemptRecord {
    /// Creates a new attempt record.
    #[must_use]
    pub fn new(module_id: impl Into<String>, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            kind,
            reason: reason.into(),
        }
    }
}
