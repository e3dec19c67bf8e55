//! Rolling health scores per module.

use super::{CircuitPhase, HealthArena, HealthRecord};
use crate::core::CircuitState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Configuration for health scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of most recent outcomes used for the recent success ratio.
    pub recent_window: usize,
    /// Weight of the recent ratio; the lifetime ratio gets the remainder.
    pub recent_weight: f64,
    /// Smoothing factor for the latency moving average.
    pub latency_alpha: f64,
    /// Latency at which the full latency penalty applies.
    pub latency_budget_ms: f64,
    /// Maximum score deducted for slow modules.
    pub latency_weight: f64,
    /// Score reported for modules with no history.
    pub neutral_score: f64,
    /// Scores below this mark a module as degraded.
    pub degraded_threshold: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            recent_window: 10,
            recent_weight: 0.7,
            latency_alpha: 0.3,
            latency_budget_ms: 5000.0,
            latency_weight: 0.2,
            neutral_score: 0.8,
            degraded_threshold: 0.5,
        }
    }
}

impl HealthConfig {
    /// Creates a new health config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the recent outcome window.
    #[must_use]
    pub fn with_recent_window(mut self, window: usize) -> Self {
        self.recent_window = window.max(1);
        self
    }

    /// Sets the neutral score for untested modules.
    #[must_use]
    pub fn with_neutral_score(mut self, score: f64) -> Self {
        self.neutral_score = score.clamp(0.0, 1.0);
        self
    }

    /// Sets the degraded threshold.
    #[must_use]
    pub fn with_degraded_threshold(mut self, threshold: f64) -> Self {
        self.degraded_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Sets the latency budget.
    #[must_use]
    pub fn with_latency_budget_ms(mut self, budget: f64) -> Self {
        self.latency_budget_ms = budget;
        self
    }

    /// Computes the score of a record under this configuration.
    #[must_use]
    pub fn score(&self, record: &HealthRecord) -> f64 {
        let (Some(recent), Some(lifetime)) = (record.recent_ratio(), record.lifetime_ratio()) else {
            return self.neutral_score;
        };

        let recent_weight = self.recent_weight.clamp(0.0, 1.0);
        let base = recent_weight * recent + (1.0 - recent_weight) * lifetime;

        let penalty = match record.ewma_latency_ms {
            Some(latency) if self.latency_budget_ms > 0.0 => {
                self.latency_weight * (latency / self.latency_budget_ms).min(1.0)
            }
            _ => 0.0,
        };

        (base - penalty).clamp(0.0, 1.0)
    }
}

/// Read-only copy of a module's health for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// The module id.
    pub module_id: String,
    /// Current score.
    pub score: f64,
    /// Whether the score is below the degraded threshold.
    pub degraded: bool,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Lifetime attempts.
    pub total_attempts: u64,
    /// Lifetime successes.
    pub total_successes: u64,
    /// Smoothed latency.
    pub ewma_latency_ms: Option<f64>,
    /// Circuit state as last stored (not lazily advanced).
    pub circuit: CircuitState,
}

/// Records per-module outcomes and scores modules.
#[derive(Debug)]
pub struct HealthTracker {
    arena: Arc<HealthArena>,
    config: HealthConfig,
}

impl HealthTracker {
    /// Creates a tracker over a shared arena.
    #[must_use]
    pub fn new(arena: Arc<HealthArena>, config: HealthConfig) -> Self {
        Self { arena, config }
    }

    /// Returns the tracker's configuration.
    #[must_use]
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Records one attempt outcome.
    pub fn record_outcome(&self, module_id: &str, success: bool, latency_ms: f64) {
        let now = Instant::now();
        let config = &self.config;
        let (attempts, failures) = self.arena.update(module_id, |slot| {
            slot.record.apply(
                success,
                latency_ms,
                config.latency_alpha,
                config.recent_window,
                now,
            );
            (slot.record.total_attempts, slot.record.consecutive_failures)
        });

        debug!(
            module_id,
            success,
            latency_ms,
            attempts,
            consecutive_failures = failures,
            "Recorded module outcome"
        );
    }

    /// Returns the module's score in `[0, 1]`.
    #[must_use]
    pub fn score(&self, module_id: &str) -> f64 {
        self.arena
            .snapshot(module_id)
            .map_or(self.config.neutral_score, |slot| self.config.score(&slot.record))
    }

    /// Like [`score`](Self::score), but a module without history scores
    /// `prior` instead of the configured neutral score.
    #[must_use]
    pub fn score_with_prior(&self, module_id: &str, prior: Option<f64>) -> f64 {
        let neutral = prior.map_or(self.config.neutral_score, |p| p.clamp(0.0, 1.0));
        self.arena
            .snapshot(module_id)
            .filter(|slot| !slot.record.is_empty())
            .map_or(neutral, |slot| self.config.score(&slot.record))
    }

    /// Returns true if the module's score is below the degraded threshold.
    #[must_use]
    pub fn is_degraded(&self, module_id: &str) -> bool {
        self.score(module_id) < self.config.degraded_threshold
    }

    /// Time since the module's last attempt, if it has one.
    #[must_use]
    pub fn since_last_attempt(&self, module_id: &str) -> Option<Duration> {
        self.arena
            .snapshot(module_id)
            .and_then(|slot| slot.record.last_attempt_at)
            .map(|at| at.elapsed())
    }

    /// Returns a diagnostic snapshot of a tracked module.
    #[must_use]
    pub fn snapshot(&self, module_id: &str) -> Option<HealthSnapshot> {
        self.arena.snapshot(module_id).map(|slot| {
            let score = self.config.score(&slot.record);
            HealthSnapshot {
                module_id: module_id.to_string(),
                score,
                degraded: score < self.config.degraded_threshold,
                consecutive_failures: slot.record.consecutive_failures,
                total_attempts: slot.record.total_attempts,
                total_successes: slot.record.total_successes,
                ewma_latency_ms: slot.record.ewma_latency_ms,
                circuit: slot.circuit.state(),
            }
        })
    }

    /// Clears a module's history and closes its circuit.
    pub fn reset(&self, module_id: &str) {
        self.arena.update_existing(module_id, |slot| {
            slot.record.reset();
            slot.circuit = CircuitPhase::Closed;
            slot.reopen_count = 0;
        });
    }

    /// Returns the ids of every module with recorded history.
    #[must_use]
    pub fn tracked_modules(&self) -> Vec<String> {
        self.arena.module_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> HealthTracker {
        HealthTracker::new(Arc::new(HealthArena::new()), HealthConfig::default())
    }

    #[test]
    fn test_untested_module_gets_neutral_score() {
        let tracker = tracker();
        assert!((tracker.score("fresh") - 0.8).abs() < f64::EPSILON);
        assert!(!tracker.is_degraded("fresh"));
        assert!(tracker.snapshot("fresh").is_none());
    }

    #[test]
    fn test_perfect_fast_module_scores_high() {
        let tracker = tracker();
        for _ in 0..5 {
            tracker.record_outcome("fast", true, 0.0);
        }
        assert!((tracker.score("fast") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_degrade_module() {
        let tracker = tracker();
        for _ in 0..4 {
            tracker.record_outcome("flaky", false, 10.0);
        }
        assert!(tracker.score("flaky") < 0.1);
        assert!(tracker.is_degraded("flaky"));
    }

    #[test]
    fn test_recent_outcomes_weigh_more_than_lifetime() {
        let config = HealthConfig::default().with_recent_window(4);
        let tracker = HealthTracker::new(Arc::new(HealthArena::new()), config);

        // Long bad history, then a good recent streak.
        for _ in 0..12 {
            tracker.record_outcome("recovering", false, 0.0);
        }
        for _ in 0..4 {
            tracker.record_outcome("recovering", true, 0.0);
        }

        // recent = 1.0, lifetime = 0.25 -> 0.7 + 0.075
        let score = tracker.score("recovering");
        assert!((score - 0.775).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn test_latency_penalty() {
        let config = HealthConfig::default().with_latency_budget_ms(1000.0);
        let tracker = HealthTracker::new(Arc::new(HealthArena::new()), config);

        tracker.record_outcome("slow", true, 5000.0);
        tracker.record_outcome("quick", true, 100.0);

        assert!((tracker.score("slow") - 0.8).abs() < 1e-9);
        assert!((tracker.score("quick") - 0.98).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let tracker = tracker();
        tracker.record_outcome("m", false, 20.0);
        tracker.record_outcome("m", true, 40.0);

        let snapshot = tracker.snapshot("m").unwrap();
        assert_eq!(snapshot.total_attempts, 2);
        assert_eq!(snapshot.total_successes, 1);
        assert_eq!(snapshot.circuit, CircuitState::Closed);
        assert!(tracker.since_last_attempt("m").is_some());

        tracker.reset("m");
        assert!((tracker.score("m") - 0.8).abs() < f64::EPSILON);
        assert_eq!(tracker.tracked_modules(), vec!["m".to_string()]);
    }

    #[test]
    fn test_prior_only_applies_without_history() {
        let tracker = tracker();
        assert!((tracker.score_with_prior("m", Some(0.4)) - 0.4).abs() < f64::EPSILON);
        assert!((tracker.score_with_prior("m", None) - 0.8).abs() < f64::EPSILON);

        tracker.record_outcome("m", true, 0.0);
        assert!((tracker.score_with_prior("m", Some(0.4)) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: HealthConfig = serde_json::from_str(r#"{"neutral_score": 0.6}"#).unwrap();
        assert!((config.neutral_score - 0.6).abs() < f64::EPSILON);
        assert_eq!(config.recent_window, 10);
    }
}
