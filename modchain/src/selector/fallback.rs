//! Similarity-ranked fallback selection.

use super::{FallbackDecision, RankedCandidate};
use crate::core::EngineEvent;
use crate::errors::ModchainError;
use crate::events::EventSink;
use crate::health::{CircuitBreaker, HealthTracker};
use crate::registry::{ModuleDescriptor, ModuleRegistry, SelectionSignals};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for candidate ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Weight of the health score.
    pub health_weight: f64,
    /// Weight of the declared reliability.
    pub reliability_weight: f64,
    /// Weight of the recency bonus.
    pub recency_weight: f64,
    /// A module tried this long ago (or never) gets the full recency bonus.
    pub recency_window_ms: u64,
    /// Maximum candidates tried per stage.
    pub max_attempts: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            health_weight: 0.6,
            reliability_weight: 0.3,
            recency_weight: 0.1,
            recency_window_ms: 30_000,
            max_attempts: 3,
        }
    }
}

impl SelectorConfig {
    /// Creates a new selector config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the three ranking weights.
    #[must_use]
    pub fn with_weights(mut self, health: f64, reliability: f64, recency: f64) -> Self {
        self.health_weight = health;
        self.reliability_weight = reliability;
        self.recency_weight = recency;
        self
    }

    /// Sets the recency window.
    #[must_use]
    pub fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the per-stage attempt bound.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn recency_bonus(&self, since_last_attempt: Option<Duration>) -> f64 {
        match since_last_attempt {
            None => 1.0,
            Some(_) if self.recency_window_ms == 0 => 1.0,
            Some(elapsed) => {
                (elapsed.as_secs_f64() * 1000.0 / self.recency_window_ms as f64).min(1.0)
            }
        }
    }
}

/// Picks the module to run for a category and drives the fallback chain.
pub struct FallbackSelector {
    registry: Arc<dyn ModuleRegistry>,
    tracker: Arc<HealthTracker>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn EventSink>,
    config: SelectorConfig,
}

impl FallbackSelector {
    /// Creates a selector.
    #[must_use]
    pub fn new(
        registry: Arc<dyn ModuleRegistry>,
        tracker: Arc<HealthTracker>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn EventSink>,
        config: SelectorConfig,
    ) -> Self {
        Self {
            registry,
            tracker,
            breaker,
            sink,
            config,
        }
    }

    /// Returns the selector's configuration.
    #[must_use]
    pub fn config(&self) -> &SelectorConfig {
        &self.config
    }

    /// Returns the registry the selector reads from.
    #[must_use]
    pub fn registry(&self) -> &Arc<dyn ModuleRegistry> {
        &self.registry
    }

    /// Ranks every eligible module of `category`.
    ///
    /// Eligible means registered for the category (or declared as an
    /// alternative of a module that is excluded or circuit-blocked), not in
    /// `excluded`, and not blocked by its own circuit.
    pub fn rank(
        &self,
        category: &str,
        excluded: &HashSet<String>,
        signals: &SelectionSignals,
    ) -> FallbackDecision {
        let mut candidates: Vec<RankedCandidate> = self
            .candidate_pool(category, excluded)
            .into_iter()
            .filter(|descriptor| self.breaker.is_selectable(&descriptor.id))
            .map(|descriptor| self.score(&descriptor, signals))
            .collect();

        candidates.sort_by(|a, b| {
            b.composite
                .total_cmp(&a.composite)
                .then_with(|| b.reliability.total_cmp(&a.reliability))
                .then_with(|| a.module_id.cmp(&b.module_id))
        });

        debug!(
            category,
            excluded = excluded.len(),
            ranked = ?candidates.iter().map(|c| c.module_id.as_str()).collect::<Vec<_>>(),
            "Ranked candidates"
        );

        FallbackDecision {
            category: category.to_string(),
            candidates,
        }
    }

    /// Returns the best eligible module of `category`.
    pub fn select_candidate(
        &self,
        category: &str,
        excluded: &HashSet<String>,
    ) -> Result<String, ModchainError> {
        self.select_candidate_with(category, excluded, &SelectionSignals::new())
    }

    /// Like [`select_candidate`](Self::select_candidate), with rule signals.
    pub fn select_candidate_with(
        &self,
        category: &str,
        excluded: &HashSet<String>,
        signals: &SelectionSignals,
    ) -> Result<String, ModchainError> {
        self.rank(category, excluded, signals)
            .candidates
            .into_iter()
            .next()
            .map(|candidate| candidate.module_id)
            .ok_or_else(|| {
                let reason = if excluded.is_empty() {
                    "no eligible modules"
                } else {
                    "every candidate failed or is unavailable"
                };
                ModchainError::unavailable(category, reason)
            })
    }

    /// Records a failure, excludes the module and selects the next one.
    ///
    /// `trial` tells whether the failed attempt held the module's half-open
    /// trial slot (see [`AttemptDecision::is_trial`](crate::health::AttemptDecision::is_trial)).
    pub fn record_failure_and_advance(
        &self,
        module_id: &str,
        category: &str,
        excluded: &mut HashSet<String>,
        latency_ms: f64,
        reason: &str,
        trial: bool,
    ) -> Result<String, ModchainError> {
        self.record_failure_and_advance_with(
            module_id,
            category,
            excluded,
            latency_ms,
            reason,
            trial,
            &SelectionSignals::new(),
        )
    }

    /// Like [`record_failure_and_advance`](Self::record_failure_and_advance),
    /// with rule signals for the next selection.
    pub fn record_failure_and_advance_with(
        &self,
        module_id: &str,
        category: &str,
        excluded: &mut HashSet<String>,
        latency_ms: f64,
        reason: &str,
        trial: bool,
        signals: &SelectionSignals,
    ) -> Result<String, ModchainError> {
        self.tracker.record_outcome(module_id, false, latency_ms);
        self.breaker.on_outcome(module_id, false, trial);
        excluded.insert(module_id.to_string());

        warn!(module_id, category, reason, "Module failed, falling back");
        self.sink.try_emit(EngineEvent::FallbackTriggered {
            module_id: module_id.to_string(),
            category: category.to_string(),
            reason: reason.to_string(),
        });

        self.select_candidate_with(category, excluded, signals)
    }

    /// Records a success for the module.
    pub fn record_success(&self, module_id: &str, latency_ms: f64, trial: bool) {
        self.tracker.record_outcome(module_id, true, latency_ms);
        self.breaker.on_outcome(module_id, true, trial);
    }

    fn candidate_pool(&self, category: &str, excluded: &HashSet<String>) -> Vec<ModuleDescriptor> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut pool = Vec::new();
        let mut blocked: Vec<String> = excluded.iter().cloned().collect();

        for descriptor in self.registry.find_by_category(category) {
            if excluded.contains(&descriptor.id) || !seen.insert(descriptor.id.clone()) {
                continue;
            }
            if !self.breaker.is_selectable(&descriptor.id) {
                blocked.push(descriptor.id.clone());
            }
            pool.push(descriptor);
        }

        // Alternatives declared by modules that already failed or whose
        // circuit is open.
        blocked.sort();
        for failed_id in &blocked {
            let Some(descriptor) = self.registry.describe(failed_id) else {
                continue;
            };
            for alternative in descriptor.alternatives {
                if excluded.contains(&alternative) || seen.contains(&alternative) {
                    continue;
                }
                if let Some(alt) = self.registry.describe(&alternative) {
                    seen.insert(alt.id.clone());
                    pool.push(alt);
                }
            }
        }

        pool
    }

    fn score(&self, descriptor: &ModuleDescriptor, signals: &SelectionSignals) -> RankedCandidate {
        let health = self
            .tracker
            .score_with_prior(&descriptor.id, descriptor.success_rate_prior);
        let reliability = descriptor.reliability();
        let recency = self
            .config
            .recency_bonus(self.tracker.since_last_attempt(&descriptor.id));
        let rule_adjustment = descriptor.rule_adjustment(signals);

        let composite = self.config.health_weight * health
            + self.config.reliability_weight * reliability
            + self.config.recency_weight * recency
            + rule_adjustment;

        RankedCandidate {
            module_id: descriptor.id.clone(),
            composite,
            health,
            reliability,
            recency,
            rule_adjustment,
        }
    }
}

impl std::fmt::Debug for FallbackSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackSelector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
