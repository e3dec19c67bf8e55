//! Error types for the modchain engine.
//!
//! Every failure the engine can observe is a value: module errors are
//! recovered by the fallback loop, optional stages are skipped, and only an
//! exhausted required stage surfaces as [`ModchainError::PipelineRolledBack`]
//! on the finished [`PipelineRun`](crate::pipeline::PipelineRun).

use crate::core::{AttemptRecord, DataKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// The main error type for modchain operations.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModchainError {
    /// No module can serve the category (circuits open or no candidates left).
    #[error("No module available for category '{category}': {reason}")]
    ModuleUnavailable {
        /// The requested task category.
        category: String,
        /// Why nothing could be selected.
        reason: String,
    },

    /// A module returned an error while executing.
    #[error("Module '{module_id}' failed: {reason}")]
    ModuleExecutionFailed {
        /// The module that failed.
        module_id: String,
        /// The module's error message.
        reason: String,
    },

    /// Adapting a stage input from one data kind to another failed.
    #[error("Transform {from} -> {to} failed for stage '{stage_id}': {reason}")]
    TransformFailed {
        /// The stage whose input could not be adapted.
        stage_id: String,
        /// The producer's data kind.
        from: DataKind,
        /// The data kind the stage declares as input.
        to: DataKind,
        /// The transformer's error message.
        reason: String,
    },

    /// A required stage exhausted every candidate and the run was rolled back.
    #[error(
        "Pipeline run {run_id} rolled back at stage '{stage_id}': {}",
        format_attempts(attempts)
    )]
    PipelineRolledBack {
        /// The rolled back run.
        run_id: String,
        /// The stage that could not be completed.
        stage_id: String,
        /// Every module tried for that stage, with its failure reason.
        attempts: Vec<AttemptRecord>,
    },

    /// Two different cache fingerprints mapped onto the same key.
    ///
    /// Never fatal: the cache reports a miss and drops the entry.
    #[error("Cache corruption detected for key {key}")]
    CacheCorruption {
        /// The colliding cache key.
        key: String,
    },

    /// The pipeline definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The run was cancelled by its caller.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },
}

impl ModchainError {
    /// Creates a module unavailable error.
    #[must_use]
    pub fn unavailable(category: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModuleUnavailable {
            category: category.into(),
            reason: reason.into(),
        }
    }

    /// Returns a stable code for the error variant.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::ModuleUnavailable { .. } => "MODULE_UNAVAILABLE",
            Self::ModuleExecutionFailed { .. } => "MODULE_EXECUTION_FAILED",
            Self::TransformFailed { .. } => "TRANSFORM_FAILED",
            Self::PipelineRolledBack { .. } => "PIPELINE_ROLLED_BACK",
            Self::CacheCorruption { .. } => "CACHE_CORRUPTION",
            Self::Validation(_) => "PIPELINE_INVALID",
            Self::Cancelled { .. } => "CANCELLED",
        }
    }

    /// Returns the attempt trace carried by a rollback, if any.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::PipelineRolledBack { attempts, .. } => attempts,
            _ => &[],
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Self::PipelineRolledBack { attempts, .. } = self {
            map.insert(
                "attempts".to_string(),
                serde_json::to_value(attempts).unwrap_or_default(),
            );
        }
        map
    }
}

fn format_attempts(attempts: &[AttemptRecord]) -> String {
    if attempts.is_empty() {
        return "no candidate modules".to_string();
    }
    attempts
        .iter()
        .map(|a| format!("{} ({}: {})", a.module_id, a.kind, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    #[serde(default)]
    pub stages: Vec<String>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

/// Error returned by a module's `execute` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    /// The error message.
    pub message: String,
    /// Whether the call was abandoned because it exceeded its time budget.
    pub timed_out: bool,
}

impl ExecutionError {
    /// Creates a new execution error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timed_out: false,
        }
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self {
            message: format!("execution exceeded {}ms", limit.as_millis()),
            timed_out: true,
        }
    }
}

impl From<anyhow::Error> for ExecutionError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

/// Error returned by a stage-to-stage transformer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    /// Creates a new transform error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
