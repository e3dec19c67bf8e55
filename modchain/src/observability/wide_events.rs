//! Wide events: one self-contained payload per finished run.

use crate::pipeline::{PipelineRun, StageResult};
use serde_json::{json, Value};

/// Builds and logs run-level wide events.
#[derive(Debug, Clone)]
pub struct WideEventEmitter {
    /// Event type stamped on run payloads.
    pub run_event_type: String,
}

impl Default for WideEventEmitter {
    fn default() -> Self {
        Self {
            run_event_type: "pipeline.wide".to_string(),
        }
    }
}

impl WideEventEmitter {
    /// Creates a new wide event emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a stage payload.
    #[must_use]
    pub fn build_stage_payload(result: &StageResult) -> Value {
        let mut payload = json!({
            "stage": result.stage_id,
            "status": result.status.to_string(),
            "module_id": result.module_id,
            "cache_hit": result.cache_hit,
            "duration_ms": result.duration_ms,
            "attempts": result.attempts,
        });

        if let Some(err) = &result.error {
            payload["error"] = json!(err.to_string());
            payload["error_code"] = json!(err.code());
        }

        payload
    }

    /// Builds the payload for a run.
    #[must_use]
    pub fn build_run_payload(&self, run: &PipelineRun) -> Value {
        let stages: Vec<Value> = run
            .stage_results
            .iter()
            .map(Self::build_stage_payload)
            .collect();
        let failed_attempts: usize = run.stage_results.iter().map(|r| r.attempts.len()).sum();

        let mut payload = json!({
            "type": self.run_event_type,
            "run_id": run.run_id,
            "pipeline": run.pipeline,
            "status": run.status.to_string(),
            "started_at": run.started_at.to_rfc3339(),
            "finished_at": run.finished_at.map(|at| at.to_rfc3339()),
            "duration_ms": run.duration_ms(),
            "cache_hits": run.cache_hits(),
            "failed_attempts": failed_attempts,
            "stages": stages,
        });

        if let Some(err) = &run.error {
            payload["error"] = json!(err.to_dict());
        }

        payload
    }

    /// Logs the run payload as a single structured event.
    pub fn emit(&self, run: &PipelineRun) {
        let payload = self.build_run_payload(run);
        tracing::info!(
            target: "modchain::wide",
            event_type = %self.run_event_type,
            run_id = %run.run_id,
            payload = %payload,
            "Wide event"
        );
    }
}
