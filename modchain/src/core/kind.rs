//! Data kinds declared on stage inputs and outputs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of payload a stage consumes or produces.
///
/// Kinds are declarations only: payloads are always carried as
/// `serde_json::Value`, and an edge between two different kinds is bridged
/// by a transformer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Plain text.
    Text,
    /// Image bytes or an image reference.
    Image,
    /// Audio bytes or an audio reference.
    Audio,
    /// Structured JSON data.
    Data,
    /// Accepts or produces anything; never needs a transformer.
    #[default]
    Any,
}

impl DataKind {
    /// Returns true if a payload of kind `self` can feed a `target` input
    /// without transformation.
    #[must_use]
    pub fn is_compatible_with(self, target: Self) -> bool {
        self == target || self == Self::Any || target == Self::Any
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Audio => write!(f, "audio"),
            Self::Data => write!(f, "data"),
            Self::Any => write!(f, "any"),
        }
    }
}
