//! Observability events produced by the engine.

use super::{CircuitState, RunStatus};
use serde::{Deserialize, Serialize};

/// A fire-and-forget notification emitted by an engine component.
///
/// The serialized form carries the dotted event name in `type`, so a
/// consumer can route on it without knowing the Rust enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    /// A module failed and the selector moved on to the next candidate.
    #[serde(rename = "module.fallback.triggered")]
    FallbackTriggered {
        /// The module that failed.
        module_id: String,
        /// The category being served.
        category: String,
        /// The failure reason.
        reason: String,
    },

    /// A module's circuit changed state.
    #[serde(rename = "circuit.stateChanged")]
    CircuitStateChanged {
        /// The module whose circuit moved.
        module_id: String,
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },

    /// A stage finished with an output.
    #[serde(rename = "pipeline.stage.completed")]
    StageCompleted {
        /// The run the stage belongs to.
        run_id: String,
        /// The stage id.
        stage_id: String,
        /// Whether the output came from the cache.
        cache_hit: bool,
        /// The module whose output was used.
        module_id: String,
    },

    /// A run was rolled back after an unrecoverable required-stage failure.
    #[serde(rename = "pipeline.rolledBack")]
    RolledBack {
        /// The rolled back run.
        run_id: String,
        /// Human readable reason, including the attempt trace.
        reason: String,
    },

    /// A run reached a terminal status.
    #[serde(rename = "pipeline.finished")]
    RunFinished {
        /// The finished run.
        run_id: String,
        /// Its terminal status.
        status: RunStatus,
    },
}

impl EngineEvent {
    /// Returns the dotted event name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::FallbackTriggered { .. } => "module.fallback.triggered",
            Self::CircuitStateChanged { .. } => "circuit.stateChanged",
            Self::StageCompleted { .. } => "pipeline.stage.completed",
            Self::RolledBack { .. } => "pipeline.rolledBack",
            Self::RunFinished { .. } => "pipeline.finished",
        }
    }

    /// Returns the event payload as JSON, without the `type` tag.
    #[must_use]
    pub fn data(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("type");
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let events = vec![
            EngineEvent::FallbackTriggered {
                module_id: "a".into(),
                category: "text".into(),
                reason: "boom".into(),
            },
            EngineEvent::CircuitStateChanged {
                module_id: "a".into(),
                from: CircuitState::Closed,
                to: CircuitState::Open,
            },
            EngineEvent::StageCompleted {
                run_id: "r".into(),
                stage_id: "s".into(),
                cache_hit: true,
                module_id: "a".into(),
            },
            EngineEvent::RolledBack {
                run_id: "r".into(),
                reason: "exhausted".into(),
            },
            EngineEvent::RunFinished {
                run_id: "r".into(),
                status: RunStatus::Completed,
            },
        ];

        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.event_type());
        }
    }

    #[test]
    fn test_event_data_drops_tag() {
        let event = EngineEvent::CircuitStateChanged {
            module_id: "ocr".into(),
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
        };
        let data = event.data();
        assert!(data.get("type").is_none());
        assert_eq!(data["from"], "half_open");
        assert_eq!(data["to"], "closed");
    }

    #[test]
    fn test_event_roundtrip() {
        let event = EngineEvent::RolledBack {
            run_id: "r1".into(),
            reason: "no candidates".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: EngineEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
