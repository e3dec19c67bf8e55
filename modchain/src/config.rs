//! Engine configuration.
//!
//! Configuration is layered: defaults, then an optional JSON document, then
//! `MODCHAIN_*` environment variables.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `MODCHAIN_FAILURE_THRESHOLD` | `breaker.failure_threshold` |
//! | `MODCHAIN_FAILURE_WINDOW_MS` | `breaker.failure_window_ms` |
//! | `MODCHAIN_COOLDOWN_MS` | `breaker.cooldown_ms` |
//! | `MODCHAIN_MAX_COOLDOWN_MS` | `breaker.max_cooldown_ms` |
//! | `MODCHAIN_BACKOFF_MULTIPLIER` | `breaker.backoff_multiplier` |
//! | `MODCHAIN_JITTER_RATIO` | `breaker.jitter_ratio` |
//! | `MODCHAIN_NEUTRAL_SCORE` | `health.neutral_score` |
//! | `MODCHAIN_DEGRADED_THRESHOLD` | `health.degraded_threshold` |
//! | `MODCHAIN_MAX_ATTEMPTS` | `selector.max_attempts` |
//! | `MODCHAIN_RECENCY_WINDOW_MS` | `selector.recency_window_ms` |
//! | `MODCHAIN_CACHE_ENABLED` | `cache.enabled` |
//! | `MODCHAIN_CACHE_MAX_ENTRIES` | `cache.eviction` capacity |
//! | `MODCHAIN_CACHE_TTL_MS` | switches `cache.eviction` to TTL |
//! | `MODCHAIN_MODULE_TIMEOUT_MS` | `executor.module_timeout_ms` |
//! | `MODCHAIN_WIDE_EVENTS` | `executor.wide_events` |
//! | `MODCHAIN_LOG_EVENTS` | `events.log_events` |
//! | `MODCHAIN_LOG_LEVEL` | `logging.level` |
//! | `MODCHAIN_LOG_FORMAT` | `logging.format` (`pretty` or `json`) |

use crate::cache::{CacheConfig, EvictionPolicy};
use crate::health::{BreakerConfig, HealthConfig};
use crate::observability::{LogFormat, LoggingConfig};
use crate::pipeline::ExecutorConfig;
use crate::selector::SelectorConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment variable held an unparsable value.
    #[error("Invalid value '{value}' for {var}")]
    Env {
        /// The variable name.
        var: String,
        /// The raw value.
        value: String,
    },

    /// A field holds a value the engine cannot work with.
    #[error("Invalid {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Event configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Log every event through `tracing` when no sink is supplied.
    pub log_events: bool,
}

/// Configuration for the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Health scoring.
    pub health: HealthConfig,
    /// Circuit breaking.
    pub breaker: BreakerConfig,
    /// Candidate ranking.
    pub selector: SelectorConfig,
    /// Stage output caching.
    pub cache: CacheConfig,
    /// Pipeline execution.
    pub executor: ExecutorConfig,
    /// Events.
    pub events: EventsConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds the default configuration with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Applies `MODCHAIN_*` environment variables.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Overrides { lookup };

        if let Some(v) = env.parse("MODCHAIN_FAILURE_THRESHOLD")? {
            self.breaker.failure_threshold = v;
        }
        if let Some(v) = env.parse("MODCHAIN_FAILURE_WINDOW_MS")? {
            self.breaker.failure_window_ms = v;
        }
        if let Some(v) = env.parse("MODCHAIN_COOLDOWN_MS")? {
            self.breaker.cooldown_ms = v;
        }
        if let Some(v) = env.parse("MODCHAIN_MAX_COOLDOWN_MS")? {
            self.breaker.max_cooldown_ms = v;
        }
        if let Some(v) = env.parse("MODCHAIN_BACKOFF_MULTIPLIER")? {
            self.breaker.backoff_multiplier = v;
        }
        if let Some(v) = env.parse("MODCHAIN_JITTER_RATIO")? {
            self.breaker.jitter_ratio = v;
        }
        if let Some(v) = env.parse("MODCHAIN_NEUTRAL_SCORE")? {
            self.health.neutral_score = v;
        }
        if let Some(v) = env.parse("MODCHAIN_DEGRADED_THRESHOLD")? {
            self.health.degraded_threshold = v;
        }
        if let Some(v) = env.parse("MODCHAIN_MAX_ATTEMPTS")? {
            self.selector.max_attempts = v;
        }
        if let Some(v) = env.parse("MODCHAIN_RECENCY_WINDOW_MS")? {
            self.selector.recency_window_ms = v;
        }
        if let Some(v) = env.flag("MODCHAIN_CACHE_ENABLED")? {
            self.cache.enabled = v;
        }

        let max_entries = env
            .parse("MODCHAIN_CACHE_MAX_ENTRIES")?
            .unwrap_or_else(|| self.cache.eviction.max_entries());
        let ttl_ms = env
            .parse("MODCHAIN_CACHE_TTL_MS")?
            .or_else(|| self.cache.eviction.ttl().map(|ttl| duration_ms(ttl.as_millis())));
        self.cache.eviction = match ttl_ms {
            Some(ttl_ms) => EvictionPolicy::Ttl {
                ttl_ms,
                max_entries,
            },
            None => EvictionPolicy::Lru { max_entries },
        };

        if let Some(v) = env.parse("MODCHAIN_MODULE_TIMEOUT_MS")? {
            self.executor.module_timeout_ms = Some(v);
        }
        if let Some(v) = env.flag("MODCHAIN_WIDE_EVENTS")? {
            self.executor.wide_events = v;
        }
        if let Some(v) = env.flag("MODCHAIN_LOG_EVENTS")? {
            self.events.log_events = v;
        }
        if let Some(v) = env.raw("MODCHAIN_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(value) = env.raw("MODCHAIN_LOG_FORMAT") {
            self.logging.format = match value.to_lowercase().as_str() {
                "pretty" | "text" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::Env {
                        var: "MODCHAIN_LOG_FORMAT".to_string(),
                        value,
                    })
                }
            };
        }

        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit = |field: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::invalid(field, format!("{value} is outside [0, 1]")))
            }
        };

        unit("health.recent_weight", self.health.recent_weight)?;
        unit("health.latency_alpha", self.health.latency_alpha)?;
        unit("health.neutral_score", self.health.neutral_score)?;
        unit("health.degraded_threshold", self.health.degraded_threshold)?;
        if self.health.recent_window == 0 {
            return Err(ConfigError::invalid("health.recent_window", "must be at least 1"));
        }
        if self.health.latency_weight < 0.0 {
            return Err(ConfigError::invalid("health.latency_weight", "must not be negative"));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("breaker.failure_threshold", "must be at least 1"));
        }
        if self.breaker.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("breaker.backoff_multiplier", "must be at least 1.0"));
        }
        if self.breaker.jitter_ratio < 0.0 {
            return Err(ConfigError::invalid("breaker.jitter_ratio", "must not be negative"));
        }
        if self.breaker.max_cooldown_ms < self.breaker.cooldown_ms {
            return Err(ConfigError::invalid(
                "breaker.max_cooldown_ms",
                "must not be below breaker.cooldown_ms",
            ));
        }

        for (field, weight) in [
            ("selector.health_weight", self.selector.health_weight),
            ("selector.reliability_weight", self.selector.reliability_weight),
            ("selector.recency_weight", self.selector.recency_weight),
        ] {
            if weight < 0.0 {
                return Err(ConfigError::invalid(field, "must not be negative"));
            }
        }
        if self.selector.max_attempts == 0 {
            return Err(ConfigError::invalid("selector.max_attempts", "must be at least 1"));
        }

        if self.cache.eviction.max_entries() == 0 {
            return Err(ConfigError::invalid("cache.eviction.max_entries", "must be at least 1"));
        }
        if self.executor.module_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("executor.module_timeout_ms", "must be positive"));
        }

        Ok(())
    }
}

struct Overrides<F> {
    lookup: F,
}

impl<F> Overrides<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, var: &str) -> Result<Option<T>, ConfigError> {
        self.raw(var)
            .map(|value| {
                value.parse().map_err(|_| ConfigError::Env {
                    var: var.to_string(),
                    value,
                })
            })
            .transpose()
    }

    fn flag(&self, var: &str) -> Result<Option<bool>, ConfigError> {
        self.raw(var)
            .map(|value| match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Env {
                    var: var.to_string(),
                    value,
                }),
            })
            .transpose()
    }
}

fn duration_ms(ms: u128) -> u64 {
    u64::try_from(ms).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.selector.max_attempts, 3);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_partial_json() {
        let config = EngineConfig::from_json_str(
            r#"{
                "breaker": {"failure_threshold": 5},
                "cache": {"eviction": {"policy": "ttl", "ttl_ms": 1000, "max_entries": 10}},
                "executor": {"module_timeout_ms": 250}
            }"#,
        )
        .unwrap();

        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.cooldown_ms, 30_000);
        assert_eq!(
            config.cache.eviction,
            EvictionPolicy::Ttl {
                ttl_ms: 1000,
                max_entries: 10
            }
        );
        assert_eq!(config.executor.module_timeout_ms, Some(250));
        assert!(matches!(
            EngineConfig::from_json_str("{"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::default()
            .with_overrides_from(lookup(&[
                ("MODCHAIN_FAILURE_THRESHOLD", "7"),
                ("MODCHAIN_COOLDOWN_MS", " 500 "),
                ("MODCHAIN_MAX_ATTEMPTS", "4"),
                ("MODCHAIN_CACHE_TTL_MS", "60000"),
                ("MODCHAIN_CACHE_MAX_ENTRIES", "16"),
                ("MODCHAIN_LOG_EVENTS", "yes"),
                ("MODCHAIN_MODULE_TIMEOUT_MS", ""),
                ("MODCHAIN_LOG_FORMAT", "JSON"),
                ("MODCHAIN_WIDE_EVENTS", "1"),
            ]))
            .unwrap();

        assert_eq!(config.breaker.failure_threshold, 7);
        assert_eq!(config.breaker.cooldown_ms, 500);
        assert_eq!(config.selector.max_attempts, 4);
        assert_eq!(
            config.cache.eviction,
            EvictionPolicy::Ttl {
                ttl_ms: 60_000,
                max_entries: 16
            }
        );
        assert!(config.events.log_events);
        assert!(config.executor.wide_events);
        assert_eq!(config.executor.module_timeout_ms, None);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_env_parse_errors() {
        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[("MODCHAIN_FAILURE_THRESHOLD", "three")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value 'three' for MODCHAIN_FAILURE_THRESHOLD");

        let err = EngineConfig::default()
            .with_overrides_from(lookup(&[("MODCHAIN_CACHE_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        let mut config = EngineConfig::default();
        config.breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.selector.recency_weight = -0.1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("selector.recency_weight"));

        let mut config = EngineConfig::default();
        config.health.neutral_score = 1.5;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.breaker.max_cooldown_ms = 10;
        assert!(config.validate().is_err());
    }
}
