//! Pipeline definition and execution.
//!
//! This module provides:
//! - Pipeline and stage definitions with sequential and parallel groups
//! - Edge transformers between data kinds
//! - The executor, with fallback, caching and rollback
//! - Run and stage result records

mod definition;
mod executor;
mod run;
mod transform;


pub use definition::{ExecutionMode, PipelineDefinition, StageSpec};
pub use executor::{ExecutorConfig, PipelineExecutor};
pub use run::{PipelineRun, StageResult};
pub use transform::{Transformer, TransformerRegistry};
