//! Engine configuration.
//!
//! Defaults are overlaid with `BATCHIO_*` environment variables by
//! [`EngineConfig::from_env`], or read from JSON by [`EngineConfig::from_json`].
//! Durations are expressed in milliseconds in both forms.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_PASSES};
use crate::retry::BackoffConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub backoff: BackoffConfig,
    /// Largest chunk a batch write submits at once.
    pub max_batch_size: usize,
    /// Cap on batch-write passes over the remainder.
    pub max_passes: u32,
    /// Concurrent slots for a [`Limiter`](crate::limiter::Limiter).
    pub limiter_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_passes: DEFAULT_MAX_PASSES,
            limiter_size: 8,
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with any `BATCHIO_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "BATCHIO_INITIAL_INTERVAL_MS")? {
            config.backoff.initial_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "BATCHIO_MAX_INTERVAL_MS")? {
            config.backoff.max_interval = Duration::from_millis(ms);
        }
        // 0 disables the elapsed budget.
        if let Some(ms) = parse_var::<u64>(&lookup, "BATCHIO_MAX_ELAPSED_MS")? {
            config.backoff.max_elapsed = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(m) = parse_var::<f64>(&lookup, "BATCHIO_MULTIPLIER")? {
            config.backoff.multiplier = m;
        }
        if let Some(f) = parse_var::<f64>(&lookup, "BATCHIO_RANDOMIZATION_FACTOR")? {
            config.backoff.randomization_factor = f;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "BATCHIO_MAX_RETRIES")? {
            config.backoff.max_retries = Some(n);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "BATCHIO_MAX_BATCH_SIZE")? {
            config.max_batch_size = n;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "BATCHIO_MAX_PASSES")? {
            config.max_passes = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "BATCHIO_LIMITER_SIZE")? {
            config.limiter_size = n;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.backoff;
        if b.initial_interval > b.max_interval {
            return Err(ConfigError::Invalid(format!(
                "initial interval {:?} exceeds max interval {:?}",
                b.initial_interval, b.max_interval
            )));
        }
        if !(b.multiplier >= 1.0 && b.multiplier.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "multiplier must be >= 1, got {}",
                b.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&b.randomization_factor) {
            return Err(ConfigError::Invalid(format!(
                "randomization factor must be within [0, 1], got {}",
                b.randomization_factor
            )));
        }
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max batch size must be >= 1".into()));
        }
        if self.max_passes == 0 {
            return Err(ConfigError::Invalid("max passes must be >= 1".into()));
        }
        if self.limiter_size == 0 {
            return Err(ConfigError::Invalid("limiter size must be >= 1".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
    }
}

/// Serde adapter: `Duration` as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serde adapter: `Option<Duration>` as integer milliseconds or null.
pub(crate) mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
