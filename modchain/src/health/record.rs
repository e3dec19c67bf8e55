//! Per-module health and circuit state.

use crate::core::CircuitState;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Outcome counters for one module.
///
/// Created on the module's first attempt and updated on every attempt after
/// that. Records are never removed; [`HealthRecord::reset`] clears them on
/// explicit request.
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Attempts recorded over the module's lifetime.
    pub total_attempts: u64,
    /// Successes recorded over the module's lifetime.
    pub total_successes: u64,
    /// Exponentially weighted latency of all attempts.
    pub ewma_latency_ms: Option<f64>,
    /// When the last failure was recorded.
    pub last_failure_at: Option<Instant>,
    /// When the last attempt of any outcome was recorded.
    pub last_attempt_at: Option<Instant>,
    /// The most recent outcomes, newest last.
    recent: VecDeque<bool>,
    /// Timestamps of the current failure streak, oldest first.
    streak: VecDeque<Instant>,
}

impl HealthRecord {
    /// Applies one attempt outcome.
    pub fn apply(
        &mut self,
        success: bool,
        latency_ms: f64,
        latency_alpha: f64,
        recent_capacity: usize,
        now: Instant,
    ) {
        self.total_attempts += 1;
        self.last_attempt_at = Some(now);

        let latency_ms = latency_ms.max(0.0);
        self.ewma_latency_ms = Some(match self.ewma_latency_ms {
            Some(previous) => latency_alpha * latency_ms + (1.0 - latency_alpha) * previous,
            None => latency_ms,
        });

        self.recent.push_back(success);
        while self.recent.len() > recent_capacity.max(1) {
            self.recent.pop_front();
        }

        if success {
            self.total_successes += 1;
            self.consecutive_failures = 0;
            self.streak.clear();
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.last_failure_at = Some(now);
            self.streak.push_back(now);
        }
    }

    /// Returns true if no attempt has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_attempts == 0
    }

    /// Success ratio over the module's lifetime.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn lifetime_ratio(&self) -> Option<f64> {
        (self.total_attempts > 0).then(|| self.total_successes as f64 / self.total_attempts as f64)
    }

    /// Success ratio over the recent outcome window.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn recent_ratio(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let successes = self.recent.iter().filter(|ok| **ok).count();
        Some(successes as f64 / self.recent.len() as f64)
    }

    /// Number of streak failures recorded within `window` before `now`.
    #[must_use]
    pub fn failures_within(&self, window: Duration, now: Instant) -> usize {
        self.streak
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= window)
            .count()
    }

    /// Forgets streak failures older than `window` and keeps at most the
    /// newest `keep` of the rest.
    pub fn trim_streak(&mut self, window: Duration, keep: usize, now: Instant) {
        while self
            .streak
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > window)
        {
            self.streak.pop_front();
        }
        while self.streak.len() > keep.max(1) {
            self.streak.pop_front();
        }
    }

    /// Clears all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Internal circuit state.
///
/// `Open` always carries the instant it opened and its cool-down; `HalfOpen`
/// tracks the single trial slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CircuitPhase {
    /// Calls flow.
    #[default]
    Closed,
    /// Calls are refused until `opened_at + cooldown`.
    Open {
        /// When the circuit opened.
        opened_at: Instant,
        /// How long it stays open.
        cooldown: Duration,
    },
    /// One trial decides the next state.
    HalfOpen {
        /// Whether the trial slot is taken.
        trial_in_flight: bool,
    },
}

impl CircuitPhase {
    /// Returns the externally visible state.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        match self {
            Self::Closed => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Everything the engine tracks about one module, guarded by one lock.
#[derive(Debug, Clone, Default)]
pub struct ModuleSlot {
    /// Outcome counters.
    pub record: HealthRecord,
    /// Circuit state.
    pub circuit: CircuitPhase,
    /// Consecutive re-opens from `HalfOpen`, drives cool-down backoff.
    pub reopen_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_tracks_counters() {
        let mut record = HealthRecord::default();
        let now = Instant::now();

        record.apply(true, 100.0, 0.5, 10, now);
        record.apply(false, 300.0, 0.5, 10, now);
        record.apply(false, 300.0, 0.5, 10, now);

        assert_eq!(record.total_attempts, 3);
        assert_eq!(record.total_successes, 1);
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.failures_within(Duration::from_secs(1), now), 2);
        // 100 -> 200 -> 250
        assert!((record.ewma_latency_ms.unwrap() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_clears_streak() {
        let mut record = HealthRecord::default();
        let now = Instant::now();
        record.apply(false, 1.0, 0.3, 10, now);
        record.apply(true, 1.0, 0.3, 10, now);

        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.failures_within(Duration::from_secs(60), now), 0);
        assert!(record.last_failure_at.is_some());
    }

    #[test]
    fn test_recent_window_is_bounded() {
        let mut record = HealthRecord::default();
        let now = Instant::now();
        for _ in 0..5 {
            record.apply(false, 1.0, 0.3, 3, now);
        }
        for _ in 0..3 {
            record.apply(true, 1.0, 0.3, 3, now);
        }

        assert_eq!(record.recent_ratio(), Some(1.0));
        assert!((record.lifetime_ratio().unwrap() - 3.0 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_outside_window_are_ignored() {
        let mut record = HealthRecord::default();
        let start = Instant::now();
        record.apply(false, 1.0, 0.3, 10, start);
        record.apply(false, 1.0, 0.3, 10, start + Duration::from_secs(30));

        let later = start + Duration::from_secs(45);
        assert_eq!(record.failures_within(Duration::from_secs(20), later), 1);
        assert_eq!(record.consecutive_failures, 2);
    }

    #[test]
    fn test_trim_streak() {
        let mut record = HealthRecord::default();
        let start = Instant::now();
        for i in 0..10 {
            record.apply(false, 1.0, 0.3, 10, start + Duration::from_secs(i));
        }
        let now = start + Duration::from_secs(9);

        record.trim_streak(Duration::from_secs(5), 100, now);
        assert_eq!(record.streak.len(), 6);

        record.trim_streak(Duration::from_secs(60), 3, now);
        assert_eq!(record.streak.len(), 3);
        assert_eq!(record.failures_within(Duration::from_secs(2), now), 3);
        assert_eq!(record.consecutive_failures, 10);
    }

    #[test]
    fn test_reset() {
        let mut record = HealthRecord::default();
        record.apply(false, 1.0, 0.3, 10, Instant::now());
        record.reset();
        assert!(record.is_empty());
        assert!(record.recent_ratio().is_none());
    }
}
