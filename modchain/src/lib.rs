//! # Modchain
//!
//! An engine that runs multi-stage pipelines over interchangeable modules.
//!
//! Every stage names a module *category*. For each stage the engine:
//!
//! - **Selects** the best module of the category by health, declared
//!   reliability, recency and keyword rules
//! - **Falls back** to the next candidate when a module fails or times out
//! - **Breaks circuits** of modules that keep failing and probes them again
//!   after an exponential cool-down
//! - **Caches** stage outputs under a fingerprint of stage, input and module
//! - **Rolls back** the cache entries of a run when a required stage cannot
//!   be served
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use modchain::prelude::*;
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.register(
//!     ModuleDescriptor::new("tesseract", "ocr").with_reliability(0.9),
//!     Arc::new(FnModule::new("tesseract", |page: Value| Ok(page))),
//! );
//!
//! let engine = Engine::builder(registry)
//!     .config(EngineConfig::from_env()?)
//!     .build()?;
//!
//! let pipeline = PipelineDefinition::new("scan").stage(StageSpec::new("ocr", "ocr"));
//! let run = engine.run(&pipeline, json!("page")).await;
//! assert!(run.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cache;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod events;
pub mod health;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod selector;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::{CacheConfig, CacheStore, EvictionPolicy, Fingerprint, InMemoryCache};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::core::{
        AttemptRecord, CircuitState, DataKind, EngineEvent, FailureKind, RunStatus, StageStatus,
    };
    pub use crate::engine::{Engine, EngineBuilder};
    pub use crate::errors::{ExecutionError, ModchainError, PipelineValidationError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::health::{BreakerConfig, CircuitBreaker, HealthConfig, HealthTracker};
    pub use crate::pipeline::{
        ExecutionMode, PipelineDefinition, PipelineRun, StageResult, StageSpec,
        TransformerRegistry,
    };
    pub use crate::registry::{
        AsyncFnModule, FnModule, InMemoryRegistry, Module, ModuleDescriptor, ModuleRegistry,
        RuleCondition, SelectionRule,
    };
    pub use crate::selector::{FallbackSelector, SelectorConfig};
    pub use serde_json::{json, Value};
    pub use std::sync::Arc;
}
