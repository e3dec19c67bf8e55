//! Test fixtures for engine testing.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{EvictionPolicy, InMemoryCache};
use crate::config::{ConfigError, EngineConfig};
use crate::engine::Engine;
use crate::events::CollectingEventSink;
use crate::registry::{InMemoryRegistry, ModuleDescriptor};

use super::ScriptedModule;

/// An in-memory registry, a collecting sink and a cache, ready to be turned
/// into an [`Engine`].
#[derive(Debug)]
pub struct TestHarness {
    /// Registered modules.
    pub registry: Arc<InMemoryRegistry>,
    /// Every event the engine emits.
    pub sink: Arc<CollectingEventSink>,
    /// The stage output cache.
    pub cache: Arc<InMemoryCache>,
    /// Configuration handed to the engine.
    pub config: EngineConfig,
}

impl TestHarness {
    /// Creates a harness with the default configuration and no jitter.
    #[must_use]
    pub fn new() -> Self {
        let mut config = EngineConfig::default();
        config.breaker.jitter_ratio = 0.0;
        Self::with_config(config)
    }

    /// Creates a harness with a given configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(InMemoryRegistry::new()),
            sink: Arc::new(CollectingEventSink::new()),
            cache: Arc::new(InMemoryCache::new(config.cache.eviction)),
            config,
        }
    }

    /// Shortens the breaker cooldown.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.breaker = self
            .config
            .breaker
            .with_cooldown(cooldown)
            .with_max_cooldown(cooldown * 8);
        self
    }

    /// Switches the cache to TTL eviction.
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        let policy = EvictionPolicy::Ttl {
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            max_entries: self.config.cache.eviction.max_entries(),
        };
        self.config.cache.eviction = policy;
        self.cache = Arc::new(InMemoryCache::new(policy));
        self
    }

    /// Registers a scripted module and returns a handle for inspecting it.
    pub fn module(&self, descriptor: ModuleDescriptor, module: ScriptedModule) -> Arc<ScriptedModule> {
        let module = Arc::new(module);
        self.registry.register(descriptor, module.clone());
        module
    }

    /// Registers an echo module under `id` in `category`.
    pub fn echo(&self, id: &str, category: &str) -> Arc<ScriptedModule> {
        self.module(ModuleDescriptor::new(id, category), ScriptedModule::echo(id))
    }

    /// Builds an engine over the harness.
    ///
    /// Each call builds a fresh engine with its own health state; build once
    /// per test when runs must share health.
    pub fn engine(&self) -> Result<Engine, ConfigError> {
        Engine::builder(self.registry.clone())
            .config(self.config.clone())
            .sink(self.sink.clone())
            .cache(self.cache.clone())
            .build()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
