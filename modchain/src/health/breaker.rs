//! Per-module circuit breakers.
//!
//! The breaker shares the [`HealthArena`] with the health tracker: the
//! tracker appends outcomes to the record, the breaker reads the failure
//! streak from the same slot to decide transitions.

use super::{CircuitPhase, HealthArena, ModuleSlot};
use crate::core::{CircuitState, EngineEvent};
use crate::events::EventSink;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Configuration for circuit breaking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// The failures must all fall within this sliding window.
    pub failure_window_ms: u64,
    /// Initial cool-down before an open circuit allows a trial.
    pub cooldown_ms: u64,
    /// Cool-down multiplier applied per consecutive failed trial.
    pub backoff_multiplier: f64,
    /// Upper bound for the backed-off cool-down.
    pub max_cooldown_ms: u64,
    /// Random extra cool-down as a fraction of the computed cool-down.
    pub jitter_ratio: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            failure_window_ms: 60_000,
            cooldown_ms: 30_000,
            backoff_multiplier: 2.0,
            max_cooldown_ms: 300_000,
            jitter_ratio: 0.0,
        }
    }
}

impl BreakerConfig {
    /// Creates a new breaker config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Sets the sliding failure window.
    #[must_use]
    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window_ms = duration_ms(window);
        self
    }

    /// Sets the initial cool-down.
    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_ms = duration_ms(cooldown);
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the cool-down cap.
    #[must_use]
    pub fn with_max_cooldown(mut self, cap: Duration) -> Self {
        self.max_cooldown_ms = duration_ms(cap);
        self
    }

    /// Sets the jitter ratio.
    #[must_use]
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.max(0.0);
        self
    }

    /// Cool-down after `reopen_count` consecutive failed trials.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn cooldown_for(&self, reopen_count: u32) -> Duration {
        let base = self.cooldown_ms as f64;
        let exponent = reopen_count.min(32) as i32;
        let backed_off = (base * self.backoff_multiplier.max(1.0).powi(exponent))
            .min(self.max_cooldown_ms.max(self.cooldown_ms) as f64);

        let jittered = if self.jitter_ratio > 0.0 && backed_off > 0.0 {
            backed_off * (1.0 + rand::thread_rng().gen_range(0.0..=self.jitter_ratio))
        } else {
            backed_off
        };

        Duration::from_millis(jittered.round() as u64)
    }

    fn failure_window(&self) -> Duration {
        Duration::from_millis(self.failure_window_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whether an execution attempt may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    /// The attempt may run.
    Allowed {
        /// Whether this attempt holds the single `HalfOpen` trial slot. Only
        /// its outcome decides the circuit.
        trial: bool,
    },
    /// The attempt must not run.
    Denied {
        /// How long until the circuit may admit a call again.
        retry_after: Duration,
    },
}

impl AttemptDecision {
    /// Returns true if the attempt may run.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Returns true if the attempt holds the half-open trial slot.
    #[must_use]
    pub const fn is_trial(&self) -> bool {
        matches!(self, Self::Allowed { trial: true })
    }
}

type Transition = (CircuitState, CircuitState);

/// Gates module executions per module.
pub struct CircuitBreaker {
    arena: Arc<HealthArena>,
    config: BreakerConfig,
    sink: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    /// Creates a breaker over a shared arena.
    #[must_use]
    pub fn new(arena: Arc<HealthArena>, config: BreakerConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            arena,
            config,
            sink,
        }
    }

    /// Returns the breaker's configuration.
    #[must_use]
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Returns the module's state, moving `Open` to `HalfOpen` if its
    /// cool-down has elapsed.
    #[must_use]
    pub fn state(&self, module_id: &str) -> CircuitState {
        let now = Instant::now();
        let observed = self.arena.update_existing(module_id, |slot| {
            let transition = promote_if_cooled(slot, now);
            (slot.circuit.state(), transition)
        });

        match observed {
            Some((state, transition)) => {
                self.publish(module_id, transition);
                state
            }
            None => CircuitState::Closed,
        }
    }

    /// Returns true if the selector may offer this module: not open and no
    /// half-open trial in flight.
    #[must_use]
    pub fn is_selectable(&self, module_id: &str) -> bool {
        let now = Instant::now();
        let observed = self.arena.update_existing(module_id, |slot| {
            let transition = promote_if_cooled(slot, now);
            let selectable = match slot.circuit {
                CircuitPhase::Closed => true,
                CircuitPhase::Open { .. } => false,
                CircuitPhase::HalfOpen { trial_in_flight } => !trial_in_flight,
            };
            (selectable, transition)
        });

        match observed {
            Some((selectable, transition)) => {
                self.publish(module_id, transition);
                selectable
            }
            None => true,
        }
    }

    /// Decides whether an execution attempt may proceed.
    ///
    /// In `HalfOpen` the first caller takes the trial slot; everyone else is
    /// denied until the trial reports its outcome.
    pub fn allow_attempt(&self, module_id: &str) -> AttemptDecision {
        let now = Instant::now();
        let observed = self.arena.update_existing(module_id, |slot| {
            let transition = promote_if_cooled(slot, now);
            let decision = match slot.circuit {
                CircuitPhase::Closed => AttemptDecision::Allowed { trial: false },
                CircuitPhase::Open {
                    opened_at,
                    cooldown,
                } => AttemptDecision::Denied {
                    retry_after: cooldown.saturating_sub(now.saturating_duration_since(opened_at)),
                },
                CircuitPhase::HalfOpen {
                    ref mut trial_in_flight,
                } => {
                    if *trial_in_flight {
                        AttemptDecision::Denied {
                            retry_after: Duration::ZERO,
                        }
                    } else {
                        *trial_in_flight = true;
                        AttemptDecision::Allowed { trial: true }
                    }
                }
            };
            (decision, transition)
        });

        let Some((decision, transition)) = observed else {
            return AttemptDecision::Allowed { trial: false };
        };
        self.publish(module_id, transition);

        if let AttemptDecision::Denied { retry_after } = decision {
            debug!(module_id, retry_after_ms = duration_ms(retry_after), "Attempt denied by circuit");
        }
        decision
    }

    /// Evaluates the circuit after an outcome has been recorded in the
    /// module's health record. Returns the transition, if one happened.
    ///
    /// `trial` must be [`AttemptDecision::is_trial`] of the attempt that
    /// produced the outcome. While `HalfOpen`, outcomes of other attempts
    /// (admitted before the circuit opened) leave the circuit alone.
    pub fn on_outcome(&self, module_id: &str, success: bool, trial: bool) -> Option<Transition> {
        let now = Instant::now();
        let config = &self.config;
        let transition = self.arena.update(module_id, |slot| {
            let promoted = promote_if_cooled(slot, now);
            let evaluated = evaluate_outcome(slot, success, trial, config, now);
            slot.record.trim_streak(
                config.failure_window(),
                config.failure_threshold as usize,
                now,
            );
            merge(promoted, evaluated)
        });

        self.publish(module_id, transition);
        transition
    }

    /// Returns an abandoned half-open trial slot without a verdict.
    ///
    /// Used when the trial was cancelled before the module answered.
    pub fn release_trial(&self, module_id: &str) {
        self.arena.update_existing(module_id, |slot| {
            if let CircuitPhase::HalfOpen {
                ref mut trial_in_flight,
            } = slot.circuit
            {
                *trial_in_flight = false;
            }
        });
    }

    /// Remaining cool-down of an open circuit.
    #[must_use]
    pub fn remaining_cooldown(&self, module_id: &str) -> Option<Duration> {
        let now = Instant::now();
        self.arena
            .snapshot(module_id)
            .and_then(|slot| match slot.circuit {
                CircuitPhase::Open {
                    opened_at,
                    cooldown,
                } => Some(cooldown.saturating_sub(now.saturating_duration_since(opened_at))),
                _ => None,
            })
            .filter(|remaining| !remaining.is_zero())
    }

    /// Waits until an open circuit's cool-down has elapsed, then returns the
    /// (lazily advanced) state.
    pub async fn wait_until_ready(&self, module_id: &str) -> CircuitState {
        if let Some(remaining) = self.remaining_cooldown(module_id) {
            tokio::time::sleep(remaining).await;
        }
        self.state(module_id)
    }

    fn publish(&self, module_id: &str, transition: Option<Transition>) {
        let Some((from, to)) = transition else {
            return;
        };

        if to == CircuitState::Open {
            warn!(module_id, %from, %to, "Circuit opened");
        } else {
            info!(module_id, %from, %to, "Circuit state changed");
        }

        self.sink.try_emit(EngineEvent::CircuitStateChanged {
            module_id: module_id.to_string(),
            from,
            to,
        });
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("tracked_modules", &self.arena.len())
            .finish()
    }
}

fn promote_if_cooled(slot: &mut ModuleSlot, now: Instant) -> Option<Transition> {
    if let CircuitPhase::Open {
        opened_at,
        cooldown,
    } = slot.circuit
    {
        if now.saturating_duration_since(opened_at) >= cooldown {
            slot.circuit = CircuitPhase::HalfOpen {
                trial_in_flight: false,
            };
            return Some((CircuitState::Open, CircuitState::HalfOpen));
        }
    }
    None
}

fn evaluate_outcome(
    slot: &mut ModuleSlot,
    success: bool,
    trial: bool,
    config: &BreakerConfig,
    now: Instant,
) -> Option<Transition> {
    match (slot.circuit, success) {
        (CircuitPhase::HalfOpen { .. }, _) if !trial => None,
        (CircuitPhase::Closed, false) => {
            let failures = slot.record.failures_within(config.failure_window(), now);
            if failures >= config.failure_threshold.max(1) as usize {
                slot.reopen_count = 0;
                slot.circuit = CircuitPhase::Open {
                    opened_at: now,
                    cooldown: config.cooldown_for(0),
                };
                return Some((CircuitState::Closed, CircuitState::Open));
            }
            None
        }
        (CircuitPhase::HalfOpen { .. }, true) => {
            slot.reopen_count = 0;
            slot.circuit = CircuitPhase::Closed;
            Some((CircuitState::HalfOpen, CircuitState::Closed))
        }
        (CircuitPhase::HalfOpen { .. }, false) => {
            slot.reopen_count = slot.reopen_count.saturating_add(1);
            slot.circuit = CircuitPhase::Open {
                opened_at: now,
                cooldown: config.cooldown_for(slot.reopen_count),
            };
            Some((CircuitState::HalfOpen, CircuitState::Open))
        }
        // Late outcomes from calls admitted before the circuit opened do not
        // move an open circuit.
        (CircuitPhase::Closed, true) | (CircuitPhase::Open { .. }, _) => None,
    }
}

fn merge(first: Option<Transition>, second: Option<Transition>) -> Option<Transition> {
    match (first, second) {
        (Some((from, _)), Some((_, to))) => Some((from, to)),
        (Some(t), None) | (None, Some(t)) => Some(t),
        (None, None) => None,
    }
}
