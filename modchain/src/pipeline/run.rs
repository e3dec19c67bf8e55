//! Run and stage result records.

use crate::core::{AttemptRecord, RunStatus, StageStatus};
use crate::errors::ModchainError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// The outcome of one stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    /// The stage id.
    pub stage_id: String,
    /// Final status.
    pub status: StageStatus,
    /// Output, when the stage completed.
    pub output: Option<Value>,
    /// The module whose output was used.
    pub module_id: Option<String>,
    /// Whether the output came from the cache.
    pub cache_hit: bool,
    /// Failed attempts, in order.
    pub attempts: Vec<AttemptRecord>,
    /// Wall time spent on the stage.
    pub duration_ms: f64,
    /// Why the stage did not complete.
    pub error: Option<ModchainError>,
}

impl StageResult {
    /// A completed stage.
    #[must_use]
    pub fn completed(
        stage_id: impl Into<String>,
        module_id: impl Into<String>,
        output: Value,
        cache_hit: bool,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Completed,
            output: Some(output),
            module_id: Some(module_id.into()),
            cache_hit,
            attempts: Vec::new(),
            duration_ms: 0.0,
            error: None,
        }
    }

    /// A stage that ended without an output.
    #[must_use]
    pub fn unfinished(
        stage_id: impl Into<String>,
        status: StageStatus,
        error: ModchainError,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            status,
            output: None,
            module_id: None,
            cache_hit: false,
            attempts: Vec::new(),
            duration_ms: 0.0,
            error: Some(error),
        }
    }

    /// Attaches the attempt trace.
    #[must_use]
    pub fn with_attempts(mut self, attempts: Vec<AttemptRecord>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// One execution of a pipeline definition.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    /// Unique run id.
    pub run_id: String,
    /// Name of the executed pipeline.
    pub pipeline: String,
    /// Current status.
    pub status: RunStatus,
    /// Per-stage results, in completion order within each group.
    pub stage_results: Vec<StageResult>,
    /// Final output, on success.
    pub output: Option<Value>,
    /// Terminal error, if the run did not complete.
    pub error: Option<ModchainError>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Starts a new run record.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            pipeline: pipeline.into(),
            status: RunStatus::Running,
            stage_results: Vec::new(),
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Appends a stage result.
    pub fn record_stage(&mut self, result: StageResult) {
        self.stage_results.push(result);
    }

    /// Moves the run to a terminal status.
    ///
    /// A run is finalized once; later calls are ignored and return false.
    pub fn finalize(
        &mut self,
        status: RunStatus,
        output: Option<Value>,
        error: Option<ModchainError>,
    ) -> bool {
        if self.status.is_terminal() {
            warn!(
                run_id = %self.run_id,
                current = ?self.status,
                requested = ?status,
                "Ignoring second finalize"
            );
            return false;
        }
        self.status = status;
        self.output = output;
        self.error = error;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Returns the result of a stage.
    #[must_use]
    pub fn stage(&self, stage_id: &str) -> Option<&StageResult> {
        self.stage_results.iter().find(|r| r.stage_id == stage_id)
    }

    /// Returns true if the run completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Number of stages served from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.stage_results.iter().filter(|r| r.cache_hit).count()
    }

    /// Wall time of the run so far, in milliseconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_ms(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_microseconds().unwrap_or(0) as f64 / 1000.0
    }
}
