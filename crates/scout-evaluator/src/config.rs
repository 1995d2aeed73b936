//! Evaluator configuration.
//!
//! Defaults match the documented thresholds; every value can be overridden
//! from the environment and then again by the caller (the CLI applies flags
//! on top of [`EvaluatorConfig::from_env`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIDENCE_THRESHOLD_ENV: &str = "CONFIDENCE_THRESHOLD";
pub const SCORE_THRESHOLD_ENV: &str = "SCORE_THRESHOLD";
pub const CALL_TIMEOUT_ENV: &str = "SCOUT_CALL_TIMEOUT_SECS";
pub const CONCURRENCY_ENV: &str = "SCOUT_CONCURRENCY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Classifications below this confidence are dropped.
    pub confidence_threshold: f64,
    /// Scores below this are dropped.
    pub score_threshold: u8,
    /// Upper bound on each classifier / scorer invocation.
    #[serde(with = "duration_secs")]
    pub call_timeout: Duration,
    /// Maximum chunks evaluated at once.
    pub concurrency: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            score_threshold: 50,
            call_timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl EvaluatorConfig {
    /// Defaults overridden by any of `CONFIDENCE_THRESHOLD`,
    /// `SCORE_THRESHOLD`, `SCOUT_CALL_TIMEOUT_SECS`, `SCOUT_CONCURRENCY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from an arbitrary
    /// source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(raw) = get(CONFIDENCE_THRESHOLD_ENV) {
            config.confidence_threshold = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: CONFIDENCE_THRESHOLD_ENV,
                expected: "a number in [0, 1]",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get(SCORE_THRESHOLD_ENV) {
            config.score_threshold = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: SCORE_THRESHOLD_ENV,
                expected: "an integer in [0, 100]",
                value: raw.clone(),
            })?;
        }
        if let Some(raw) = get(CALL_TIMEOUT_ENV) {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: CALL_TIMEOUT_ENV,
                expected: "a whole number of seconds",
                value: raw.clone(),
            })?;
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = get(CONCURRENCY_ENV) {
            config.concurrency = raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: CONCURRENCY_ENV,
                expected: "a positive integer",
                value: raw.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                name: CONFIDENCE_THRESHOLD_ENV,
                expected: "a number in [0, 1]",
                value: self.confidence_threshold.to_string(),
            });
        }
        if self.score_threshold > 100 {
            return Err(ConfigError::InvalidValue {
                name: SCORE_THRESHOLD_ENV,
                expected: "an integer in [0, 100]",
                value: self.score_threshold.to_string(),
            });
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: CALL_TIMEOUT_ENV,
                expected: "a whole number of seconds",
                value: "0".to_string(),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: CONCURRENCY_ENV,
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = EvaluatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EvaluatorConfig::default());
        assert_eq!(config.score_threshold, 50);
        assert!((config.confidence_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn env_overrides() {
        let config = EvaluatorConfig::from_lookup(lookup(&[
            (CONFIDENCE_THRESHOLD_ENV, "0.8"),
            (SCORE_THRESHOLD_ENV, " 65 "),
            (CALL_TIMEOUT_ENV, "5"),
            (CONCURRENCY_ENV, "16"),
        ]))
        .unwrap();
        assert_eq!(config.score_threshold, 65);
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency, 16);
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(EvaluatorConfig::from_lookup(lookup(&[(CONFIDENCE_THRESHOLD_ENV, "1.5")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup(&[(SCORE_THRESHOLD_ENV, "101")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup(&[(SCORE_THRESHOLD_ENV, "abc")])).is_err());
        assert!(EvaluatorConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, "0")])).is_err());
    }
}
