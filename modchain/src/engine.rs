//! The assembled engine.
//!
//! [`EngineBuilder`] wires the health arena, tracker, breaker, selector,
//! cache and executor from one [`EngineConfig`] so that every component
//! shares the same health state and event sink.

use crate::cache::{CacheStore, InMemoryCache};
use crate::cancellation::CancellationToken;
use crate::config::{ConfigError, EngineConfig};
use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
use crate::health::{CircuitBreaker, HealthArena, HealthSnapshot, HealthTracker};
use crate::pipeline::{PipelineDefinition, PipelineExecutor, PipelineRun, TransformerRegistry};
use crate::registry::ModuleRegistry;
use crate::selector::FallbackSelector;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// A ready-to-run engine.
pub struct Engine {
    config: EngineConfig,
    tracker: Arc<HealthTracker>,
    breaker: Arc<CircuitBreaker>,
    selector: Arc<FallbackSelector>,
    cache: Option<Arc<dyn CacheStore>>,
    executor: PipelineExecutor,
    sink: Arc<dyn EventSink>,
}

impl Engine {
    /// Starts building an engine over a module registry.
    pub fn builder(registry: Arc<dyn ModuleRegistry>) -> EngineBuilder {
        EngineBuilder::new(registry)
    }

    /// Runs a pipeline.
    pub async fn run(&self, definition: &PipelineDefinition, input: Value) -> PipelineRun {
        self.executor.run(definition, input).await
    }

    /// Runs a pipeline that can be cancelled through `cancel`.
    pub async fn run_with_cancellation(
        &self,
        definition: &PipelineDefinition,
        input: Value,
        cancel: &CancellationToken,
    ) -> PipelineRun {
        self.executor
            .run_with_cancellation(definition, input, cancel)
            .await
    }

    /// The configuration the engine was built from.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The health tracker.
    pub fn tracker(&self) -> &Arc<HealthTracker> {
        &self.tracker
    }

    /// The circuit breaker.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The fallback selector.
    pub fn selector(&self) -> &Arc<FallbackSelector> {
        &self.selector
    }

    /// The stage output cache, if caching is enabled.
    pub fn cache(&self) -> Option<&Arc<dyn CacheStore>> {
        self.cache.as_ref()
    }

    /// The event sink.
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Health of every module with recorded history, sorted by id.
    ///
    /// Circuit states are read through the breaker, so an Open circuit whose
    /// cooldown has elapsed reports `HalfOpen`.
    pub fn health_report(&self) -> Vec<HealthSnapshot> {
        let mut ids = self.tracker.tracked_modules();
        ids.sort();
        ids.iter()
            .filter_map(|id| {
                self.tracker.snapshot(id).map(|mut snapshot| {
                    snapshot.circuit = self.breaker.state(id);
                    snapshot
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("caching", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    registry: Arc<dyn ModuleRegistry>,
    config: EngineConfig,
    sink: Option<Arc<dyn EventSink>>,
    cache: Option<Arc<dyn CacheStore>>,
    transformers: Option<Arc<TransformerRegistry>>,
}

impl EngineBuilder {
    /// Creates a builder with the default configuration.
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry,
            config: EngineConfig::default(),
            sink: None,
            cache: None,
            transformers: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Supplies a cache instead of the configured in-memory one.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Supplies the edge transformers.
    #[must_use]
    pub fn transformers(mut self, transformers: TransformerRegistry) -> Self {
        self.transformers = Some(Arc::new(transformers));
        self
    }

    /// Validates the configuration and assembles the engine.
    pub fn build(self) -> Result<Engine, ConfigError> {
        let Self {
            registry,
            config,
            sink,
            cache,
            transformers,
        } = self;
        config.validate()?;

        let sink = sink.unwrap_or_else(|| -> Arc<dyn EventSink> {
            if config.events.log_events {
                Arc::new(LoggingEventSink::default())
            } else {
                Arc::new(NoOpEventSink)
            }
        });

        let arena = Arc::new(HealthArena::new());
        let tracker = Arc::new(HealthTracker::new(Arc::clone(&arena), config.health.clone()));
        let breaker = Arc::new(CircuitBreaker::new(
            arena,
            config.breaker.clone(),
            Arc::clone(&sink),
        ));
        let selector = Arc::new(FallbackSelector::new(
            registry,
            Arc::clone(&tracker),
            Arc::clone(&breaker),
            Arc::clone(&sink),
            config.selector.clone(),
        ));

        let cache = match cache {
            Some(cache) => Some(cache),
            None if config.cache.enabled => {
                Some(Arc::new(InMemoryCache::from_config(&config.cache)) as Arc<dyn CacheStore>)
            }
            None => None,
        };

        let mut executor = PipelineExecutor::new(
            Arc::clone(&selector),
            Arc::clone(&breaker),
            Arc::clone(&sink),
        )
        .with_config(config.executor.clone());
        if let Some(cache) = &cache {
            executor = executor.with_cache(Arc::clone(cache));
        }
        if let Some(transformers) = transformers {
            executor = executor.with_transformers(transformers);
        }

        info!(
            caching = cache.is_some(),
            max_attempts = config.selector.max_attempts,
            failure_threshold = config.breaker.failure_threshold,
            "Engine assembled"
        );

        Ok(Engine {
            config,
            tracker,
            breaker,
            selector,
            cache,
            executor,
            sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CircuitState, RunStatus};
    use crate::events::CollectingEventSink;
    use crate::pipeline::StageSpec;
    use crate::registry::{FnModule, InMemoryRegistry, ModuleDescriptor};
    use serde_json::json;

    fn registry() -> Arc<InMemoryRegistry> {
        let registry = InMemoryRegistry::new();
        registry.register(
            ModuleDescriptor::new("upper", "text"),
            Arc::new(FnModule::new("upper", |input: Value| {
                Ok(json!(input.as_str().unwrap_or_default().to_uppercase()))
            })),
        );
        Arc::new(registry)
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.selector.max_attempts = 0;
        let result = Engine::builder(registry()).config(config).build();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_cache_follows_config() {
        let engine = Engine::builder(registry()).build().unwrap();
        assert!(engine.cache().is_some());

        let mut config = EngineConfig::default();
        config.cache.enabled = false;
        let engine = Engine::builder(registry()).config(config).build().unwrap();
        assert!(engine.cache().is_none());
    }

    #[tokio::test]
    async fn test_run_and_report() {
        let sink = Arc::new(CollectingEventSink::new());
        let engine = Engine::builder(registry())
            .sink(sink.clone())
            .build()
            .unwrap();
        let definition = PipelineDefinition::new("shout").stage(StageSpec::new("up", "text"));

        let run = engine.run(&definition, json!("hi")).await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output, Some(json!("HI")));

        let report = engine.health_report();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].module_id, "upper");
        assert_eq!(report[0].total_successes, 1);
        assert_eq!(report[0].circuit, CircuitState::Closed);
        assert_eq!(sink.events_of_type("pipeline.finished").len(), 1);
    }
}
